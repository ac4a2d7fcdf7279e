mod config_cmd;
mod diary;
mod food;
mod log;
mod stats;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use diary::DiaryCommand;
pub use food::FoodCommand;
pub use log::LogCommand;
pub use stats::StatsCommand;
pub use sync_cmd::SyncCommand;
