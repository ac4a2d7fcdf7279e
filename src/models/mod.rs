mod aggregate;
mod meal_slot;
mod mutation;
mod nutrition_record;
mod resolved_item;

pub use aggregate::{DailyAggregate, Goal};
pub use meal_slot::MealSlot;
pub use mutation::{DiaryMutation, MutationKind, SyncState};
pub use nutrition_record::{tokenize, NutritionRecord};
pub use resolved_item::ResolvedItem;
