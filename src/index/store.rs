//! SQLite persistence for nutrition records and selection history.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::NutritionRecord;

pub struct FoodRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    version: i64,
    name: String,
    brand: Option<String>,
    serving_unit: String,
    serving_size: f64,
    nutrients: String,
    barcodes: String,
    search_tokens: String,
}

#[derive(sqlx::FromRow)]
struct SelectionRow {
    record_id: String,
    count: i64,
    last_selected_at: Option<String>,
}

/// Historical selection stats for one record, used by search tie-breaks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SelectionStats {
    pub count: i64,
    pub last_selected_at: Option<DateTime<Utc>>,
}

impl FoodRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert one record version. Versions are immutable rows; the primary
    /// key (id, version) rejects accidental rewrites.
    pub async fn insert(&self, record: &NutritionRecord) -> Result<()> {
        let nutrients = serde_json::to_string(&record.nutrients_per_serving)?;
        let barcodes = serde_json::to_string(&record.barcodes)?;
        let search_tokens = serde_json::to_string(&record.search_tokens)?;

        sqlx::query(
            r#"
            INSERT INTO nutrition_records
                (id, version, name, brand, serving_unit, serving_size, nutrients, barcodes, search_tokens)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.version as i64)
        .bind(&record.name)
        .bind(&record.brand)
        .bind(&record.serving_unit)
        .bind(record.serving_size)
        .bind(&nutrients)
        .bind(&barcodes)
        .bind(&search_tokens)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load every persisted record version, ordered by id then version.
    pub async fn load_all(&self) -> Result<Vec<NutritionRecord>> {
        let rows: Vec<RecordRow> =
            sqlx::query_as("SELECT * FROM nutrition_records ORDER BY id, version")
                .fetch_all(&self.pool)
                .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(hydrate_record(row)?);
        }
        Ok(records)
    }

    pub async fn load_selections(&self) -> Result<Vec<(Uuid, SelectionStats)>> {
        let rows: Vec<SelectionRow> = sqlx::query_as("SELECT * FROM selection_counts")
            .fetch_all(&self.pool)
            .await?;

        let mut selections = Vec::with_capacity(rows.len());
        for row in rows {
            let id = Uuid::parse_str(&row.record_id)
                .map_err(|e| Error::CorruptLocalState(format!("bad record id: {}", e)))?;
            let last_selected_at = row
                .last_selected_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            selections.push((
                id,
                SelectionStats {
                    count: row.count,
                    last_selected_at,
                },
            ));
        }
        Ok(selections)
    }

    pub async fn bump_selection(&self, record_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO selection_counts (record_id, count, last_selected_at)
            VALUES (?, 1, ?)
            ON CONFLICT (record_id)
            DO UPDATE SET count = count + 1, last_selected_at = excluded.last_selected_at
            "#,
        )
        .bind(record_id.to_string())
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn hydrate_record(row: RecordRow) -> Result<NutritionRecord> {
    let id = Uuid::parse_str(&row.id)
        .map_err(|e| Error::CorruptLocalState(format!("bad record id: {}", e)))?;

    Ok(NutritionRecord {
        id,
        version: row.version as u32,
        name: row.name,
        brand: row.brand,
        serving_unit: row.serving_unit,
        serving_size: row.serving_size,
        nutrients_per_serving: serde_json::from_str(&row.nutrients)?,
        barcodes: serde_json::from_str(&row.barcodes)?,
        search_tokens: serde_json::from_str(&row.search_tokens)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    async fn setup() -> (FoodRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(temp_dir.path().join("test.db")).await.unwrap();
        (FoodRepository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_insert_and_load_record() {
        let (repo, _tmp) = setup().await;

        let record = NutritionRecord::new("Apple, raw", 100.0, "g")
            .with_barcode("012345")
            .with_nutrient("calories", 52.0);
        repo.insert(&record).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], record);
    }

    #[tokio::test]
    async fn test_versions_are_separate_rows() {
        let (repo, _tmp) = setup().await;

        let v1 = NutritionRecord::new("Oats", 40.0, "g").with_nutrient("calories", 150.0);
        let v2 = v1.next_version().with_nutrient("calories", 155.0);
        repo.insert(&v1).await.unwrap();
        repo.insert(&v2).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].version, 1);
        assert_eq!(loaded[1].version, 2);
        assert_eq!(loaded[0].id, loaded[1].id);
    }

    #[tokio::test]
    async fn test_duplicate_version_rejected() {
        let (repo, _tmp) = setup().await;

        let record = NutritionRecord::new("Rice", 45.0, "g");
        repo.insert(&record).await.unwrap();
        assert!(repo.insert(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_bump_selection_accumulates() {
        let (repo, _tmp) = setup().await;
        let id = Uuid::new_v4();
        let at = Utc::now();

        repo.bump_selection(id, at).await.unwrap();
        repo.bump_selection(id, at).await.unwrap();

        let selections = repo.load_selections().await.unwrap();
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].0, id);
        assert_eq!(selections[0].1.count, 2);
        assert!(selections[0].1.last_selected_at.is_some());
    }
}
