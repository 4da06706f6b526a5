use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use satlog_normalize::temporal::CIVIL_OFFSET_SECONDS;
use satlog_normalize::CanonicalRecord;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row, Transaction};

use super::{
    BatchAudit, Category, DailyCount, DuplicatePolicy, IngestTransaction, PageRequest,
    RecordFilter, RecordPage, RecordStore, StageAction, StoredRecord,
};
use crate::db::DbPool;
use crate::error::StoreError;

const RECORD_COLUMNS: &str = "id, plan_id, start_time, customer, satellite, station, \
                              task_result, task_type, raw, created_at, updated_at";

const INSERT_SKIP: &str = r#"
    INSERT INTO task_records (
        plan_id, start_time, customer, satellite, station, task_result, task_type, raw
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (plan_id) DO NOTHING
    RETURNING id
"#;

// xmax is zero only for rows created by this statement
const INSERT_UPSERT: &str = r#"
    INSERT INTO task_records (
        plan_id, start_time, customer, satellite, station, task_result, task_type, raw
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (plan_id) DO UPDATE SET
        start_time = EXCLUDED.start_time,
        customer = EXCLUDED.customer,
        satellite = EXCLUDED.satellite,
        station = EXCLUDED.station,
        task_result = EXCLUDED.task_result,
        task_type = EXCLUDED.task_type,
        raw = EXCLUDED.raw,
        updated_at = now()
    RETURNING (xmax = 0) AS inserted
"#;

const UPDATE_RECORD: &str = r#"
    UPDATE task_records SET
        plan_id = $1,
        start_time = $2,
        customer = $3,
        satellite = $4,
        station = $5,
        task_result = $6,
        task_type = $7,
        raw = $8,
        updated_at = now()
    WHERE id = $9
"#;

/// Postgres-backed record store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl IngestTransaction for PgTransaction {
    async fn stage(
        &mut self,
        record: &CanonicalRecord,
        policy: DuplicatePolicy,
    ) -> Result<StageAction, StoreError> {
        let sql = match policy {
            DuplicatePolicy::Skip => INSERT_SKIP,
            DuplicatePolicy::Upsert => INSERT_UPSERT,
        };

        let row = sqlx::query(sql)
            .bind(&record.plan_id)
            .bind(record.start_time)
            .bind(&record.customer)
            .bind(&record.satellite)
            .bind(&record.station)
            .bind(&record.task_result)
            .bind(&record.task_type)
            .bind(&record.raw)
            .fetch_optional(&mut *self.tx)
            .await?;

        let action = match (policy, row) {
            (DuplicatePolicy::Skip, Some(_)) => StageAction::Inserted,
            (DuplicatePolicy::Skip, None) => StageAction::Skipped,
            (DuplicatePolicy::Upsert, Some(row)) => {
                if row.try_get::<bool, _>("inserted")? {
                    StageAction::Inserted
                } else {
                    StageAction::Updated
                }
            }
            (DuplicatePolicy::Upsert, None) => {
                return Err(sqlx::Error::RowNotFound.into());
            }
        };
        Ok(action)
    }

    async fn record_batch(&mut self, audit: &BatchAudit) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO import_batches (
                batch_id, digest, duplicate_policy, total, inserted, updated, skipped, failed
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(audit.batch_id)
        .bind(&audit.digest)
        .bind(audit.policy.as_str())
        .bind(audit.total as i64)
        .bind(audit.inserted as i64)
        .bind(audit.updated as i64)
        .bind(audit.skipped as i64)
        .bind(audit.failed as i64)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PgTransaction { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn IngestTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn list(
        &self,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<RecordPage, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT count(*) FROM task_records");
        push_filter(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {RECORD_COLUMNS} FROM task_records"
        ));
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY start_time ASC, id ASC LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset);

        let rows = select.build().fetch_all(&self.pool).await?;
        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RecordPage { records, total })
    }

    async fn get(&self, id: i64) -> Result<Option<StoredRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM task_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(record_from_row)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn update(
        &self,
        id: i64,
        record: &CanonicalRecord,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let row = sqlx::query(&format!("{UPDATE_RECORD} RETURNING {RECORD_COLUMNS}"))
            .bind(&record.plan_id)
            .bind(record.start_time)
            .bind(&record.customer)
            .bind(&record.satellite)
            .bind(&record.station)
            .bind(&record.task_result)
            .bind(&record.task_type)
            .bind(&record.raw)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::PlanIdTaken {
                    plan_id: record.plan_id.clone().unwrap_or_default(),
                },
                other => StoreError::Database(other),
            })?;

        row.as_ref()
            .map(record_from_row)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM task_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_plan(&self, plan_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM task_records WHERE plan_id = $1")
            .bind(plan_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn daily_counts(
        &self,
        category: Category,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<DailyCount>, StoreError> {
        // Category::column is a closed set, never caller text.
        let sql = format!(
            r#"
            SELECT
                ((start_time AT TIME ZONE 'UTC') + make_interval(secs => $1))::date AS day,
                {column} AS category,
                count(*) AS count
            FROM task_records
            WHERE ($2::timestamptz IS NULL OR start_time >= $2)
              AND ($3::timestamptz IS NULL OR start_time <= $3)
            GROUP BY 1, 2
            ORDER BY 1, 2
            "#,
            column = category.column(),
        );

        let rows = sqlx::query(&sql)
            .bind(f64::from(CIVIL_OFFSET_SECONDS))
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<DailyCount, StoreError> {
                Ok(DailyCount {
                    day: row.try_get::<NaiveDate, _>("day")?,
                    category: row.try_get("category")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let removed: i64 = sqlx::query_scalar("SELECT count(*) FROM task_records")
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query("TRUNCATE TABLE task_records, import_batches RESTART IDENTITY")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(removed as u64)
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &RecordFilter) {
    builder.push(" WHERE TRUE");

    if let Some(start) = filter.start {
        builder.push(" AND start_time >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        builder.push(" AND start_time <= ").push_bind(end);
    }

    for (column, values) in [
        ("customer", &filter.customers),
        ("satellite", &filter.satellites),
        ("station", &filter.stations),
    ] {
        if !values.is_empty() {
            builder
                .push(format!(" AND {column} = ANY("))
                .push_bind(values.clone())
                .push(")");
        }
    }

    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", escape_like(search));
        builder.push(" AND (");
        {
            let mut columns = builder.separated(" OR ");
            for column in ["plan_id", "customer", "satellite", "station"] {
                columns
                    .push(format!("{column} ILIKE "))
                    .push_bind_unseparated(pattern.clone());
            }
        }
        builder.push(")");
    }
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn record_from_row(row: &PgRow) -> Result<StoredRecord, sqlx::Error> {
    let raw: Value = row.try_get("raw")?;
    Ok(StoredRecord {
        id: row.try_get("id")?,
        record: CanonicalRecord {
            plan_id: row.try_get("plan_id")?,
            start_time: row.try_get("start_time")?,
            customer: row.try_get("customer")?,
            satellite: row.try_get("satellite")?,
            station: row.try_get("station")?,
            task_result: row.try_get("task_result")?,
            task_type: row.try_get("task_type")?,
            raw,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("卫星"), "卫星");
    }
}
