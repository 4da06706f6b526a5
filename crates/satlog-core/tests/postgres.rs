use std::env;
use std::sync::Arc;

use anyhow::Result;
use satlog_core::config::{DatabaseConfig, IngestConfig};
use satlog_core::store::{Category, StageAction};
use satlog_core::{
    db, AllowAll, DuplicatePolicy, EditError, IngestCoordinator, IngestRequest, ListParams,
    PgStore, QueryService, RecordEditor, RecordStore, StatsParams,
};
use satlog_normalize::{render_civil, ValidationPolicy};
use serde_json::json;
use tokio::runtime::Runtime;

fn test_database_url(test: &str) -> Option<String> {
    match env::var("SATLOG_TEST_DATABASE_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("Skipping {test} because SATLOG_TEST_DATABASE_URL is not set");
            None
        }
    }
}

async fn fresh_store(database_url: &str) -> Result<Arc<PgStore>> {
    let pool = db::connect(database_url, &DatabaseConfig::default()).await?;
    db::run_migrations(&pool).await?;
    let store = Arc::new(PgStore::new(pool));
    store.clear().await?;
    Ok(store)
}

#[test]
fn postgres_ingest_roundtrip() -> Result<()> {
    let Some(database_url) = test_database_url("postgres_ingest_roundtrip") else {
        return Ok(());
    };

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let store = fresh_store(&database_url).await?;
        let coordinator = IngestCoordinator::new(
            store.clone(),
            Arc::new(AllowAll),
            &IngestConfig::default(),
            ValidationPolicy::default(),
        );

        let records = vec![
            json!({"计划ID": "P1", "开始时间": "2025-03-01 09:30:00", "所属客户": "Acme"}),
            json!({"计划ID": "P2", "开始时间": "not-a-date"}),
            json!({"开始时间": 45658.000775462963, "所属客户": "Acme"}),
        ];

        let report = coordinator
            .ingest(IngestRequest {
                records: records.clone(),
                ..IngestRequest::default()
            })
            .await?;
        assert_eq!(report.inserted_count, 2);
        assert_eq!(report.failed_count, 1);

        let again = coordinator
            .ingest(IngestRequest {
                records: records.clone(),
                ..IngestRequest::default()
            })
            .await?;
        assert_eq!(again.inserted_count, 1, "rows without a plan id never collide");
        assert_eq!(again.outcomes[0].action, Some(StageAction::Skipped));

        let upsert = coordinator
            .ingest(IngestRequest {
                records: vec![json!({
                    "计划ID": "P1",
                    "开始时间": "2025-03-01 10:00:00",
                    "所属客户": "Beta",
                })],
                policy: Some(DuplicatePolicy::Upsert),
                ..IngestRequest::default()
            })
            .await?;
        assert_eq!(upsert.updated_count, 1);

        let (batches,): (i64,) = sqlx::query_as("SELECT count(*) FROM import_batches")
            .fetch_one(store.pool())
            .await?;
        assert_eq!(batches, 3);

        let query = QueryService::new(store.clone());
        let page = query.list(&ListParams::default()).await?;
        assert_eq!(page.total, 3);

        let first = &page.records[0];
        assert_eq!(render_civil(&first.record.start_time), "2025-01-01 00:01:07");

        let p1 = page
            .records
            .iter()
            .find(|r| r.record.plan_id.as_deref() == Some("P1"))
            .expect("P1 listed");
        assert_eq!(p1.record.customer.as_deref(), Some("Beta"));
        assert_eq!(render_civil(&p1.record.start_time), "2025-03-01 10:00:00");
        assert!(p1.updated_at >= p1.created_at);

        let search = query
            .list(&ListParams {
                q: Some("bet".into()),
                ..ListParams::default()
            })
            .await?;
        assert_eq!(search.total, 1);

        let stats = query
            .aggregate(&StatsParams {
                group_by: Some("month".into()),
                category: Some("customer".into()),
                ..StatsParams::default()
            })
            .await?;
        assert_eq!(stats.labels, vec!["2025-01", "2025-03"]);
        assert_eq!(stats.series[0].label, "Acme");
        assert_eq!(stats.series[0].data, vec![2, 0]);

        let counts = store.daily_counts(Category::Station, None, None).await?;
        assert!(counts.iter().all(|c| c.category.is_none()));

        let dry = coordinator
            .ingest(IngestRequest {
                records: vec![json!({"计划ID": "D1", "开始时间": "2025-03-01"})],
                dry_run: true,
                ..IngestRequest::default()
            })
            .await?;
        assert_eq!(dry.inserted_count, 1);
        assert_eq!(query.list(&ListParams::default()).await?.total, 3);

        let editor = RecordEditor::new(store.clone(), Arc::new(AllowAll), ValidationPolicy::default());
        let edited = editor
            .update(
                p1.id,
                &json!({"planId": "P1X", "startTime": "2025-05-01 8:00 PM", "customer": "Beta"}),
                None,
            )
            .await?;
        assert_eq!(render_civil(&edited.record.start_time), "2025-05-01 20:00:00");
        assert_eq!(edited.created_at, p1.created_at);
        assert!(edited.updated_at >= p1.updated_at);

        let plan_less = page
            .records
            .iter()
            .find(|r| r.record.plan_id.is_none())
            .expect("plan-less record listed");
        let err = editor
            .update(plan_less.id, &json!({"planId": "P1X", "startTime": "2025-03-01"}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::Conflict(_)), "{err:?}");

        editor.delete(plan_less.id, None).await?;
        assert!(store.get(plan_less.id).await?.is_none());
        assert!(matches!(
            editor.delete(plan_less.id, None).await.unwrap_err(),
            EditError::NotFound(_)
        ));
        assert_eq!(editor.delete_by_plan("P1X", None).await?, 1);

        assert_eq!(store.clear().await?, 1);
        Ok(())
    })
}
