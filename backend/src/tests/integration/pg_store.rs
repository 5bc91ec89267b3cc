// Postgres store tests. Skipped unless TEST_DATABASE_URL points at a scratch database.

use ekklesia_shared::{Action, MessageDirection, NewMessage, Trigger};
use futures::future::join_all;
use serial_test::serial;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::automations::{AutomationRunner, ConversationResolver, ExecutorRegistry, PgNotifyOutbox, RunStatus, RunnerSettings};
use crate::store::{AutomationStore, PgAutomationStore, StoreError};

async fn test_pool() -> Option<PgPool> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    for table in ["automation_runs", "person_tags", "messages", "conversations", "channel_configs", "persons", "automations"] {
        sqlx::query(&format!("TRUNCATE TABLE {} CASCADE", table))
            .execute(&pool)
            .await
            .expect("Failed to clean table");
    }

    Some(pool)
}

async fn insert_tenant(pool: &PgPool, phone: Option<&str>) -> (Uuid, Uuid, Uuid) {
    let tenant_id = Uuid::new_v4();
    let person_id = Uuid::new_v4();
    let channel_id = Uuid::new_v4();

    sqlx::query("INSERT INTO persons (id, tenant_id, name, phone) VALUES ($1, $2, $3, $4)")
        .bind(person_id)
        .bind(tenant_id)
        .bind("Ana Souza")
        .bind(phone)
        .execute(pool)
        .await
        .unwrap();

    sqlx::query("INSERT INTO channel_configs (id, tenant_id, provider, instance_name) VALUES ($1, $2, 'whatsapp', 'igreja')")
        .bind(channel_id)
        .bind(tenant_id)
        .execute(pool)
        .await
        .unwrap();

    (tenant_id, person_id, channel_id)
}

async fn insert_automation(pool: &PgPool, tenant_id: Uuid, actions: &[Action]) -> Uuid {
    insert_raw_automation(pool, tenant_id, serde_json::to_value(actions).unwrap()).await
}

async fn insert_raw_automation(pool: &PgPool, tenant_id: Uuid, actions: serde_json::Value) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO automations (id, tenant_id, name, trigger_config, actions) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(tenant_id)
    .bind("Boas-vindas")
    .bind(serde_json::to_value(Trigger::FormSubmission).unwrap())
    .bind(actions)
    .execute(pool)
    .await
    .unwrap();
    id
}

#[tokio::test]
#[serial]
async fn test_pg_automation_keeps_action_order() {
    let Some(pool) = test_pool().await else { return };
    let (tenant_id, _, _) = insert_tenant(&pool, None).await;
    let actions = vec![
        Action::add_tag("b"),
        Action::send_message("Oi @nome"),
        Action::add_tag("a"),
    ];
    let id = insert_automation(&pool, tenant_id, &actions).await;

    let store = PgAutomationStore::new(pool);
    let automation = store.fetch_automation(id).await.unwrap().unwrap();

    assert_eq!(automation.actions, actions);
    assert_eq!(automation.trigger, Trigger::FormSubmission);
    assert!(automation.is_active);
}

#[tokio::test]
#[serial]
async fn test_pg_concurrent_resolution_creates_one_conversation() {
    let Some(pool) = test_pool().await else { return };
    let (_, _, channel_id) = insert_tenant(&pool, Some("+5511999999999")).await;
    let store: Arc<dyn AutomationStore> = Arc::new(PgAutomationStore::new(pool.clone()));
    let resolver = ConversationResolver::new(store);

    let tasks = (0..8).map(|_| {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve(channel_id, "+5511999999999", Some("Ana Souza")).await })
    });
    let ids: HashSet<Uuid> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().id)
        .collect();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
async fn test_pg_duplicate_tag_is_unique_violation() {
    let Some(pool) = test_pool().await else { return };
    let (_, person_id, _) = insert_tenant(&pool, None).await;
    let store = PgAutomationStore::new(pool);

    store.insert_person_tag(person_id, "vip").await.unwrap();
    let err = store.insert_person_tag(person_id, "vip").await.unwrap_err();

    assert!(matches!(err, StoreError::UniqueViolation(_)));
}

#[tokio::test]
#[serial]
async fn test_pg_message_requires_conversation() {
    let Some(pool) = test_pool().await else { return };
    let store = PgAutomationStore::new(pool);

    let err = store
        .append_message(NewMessage::automated_text(Uuid::new_v4(), "Oi".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Database(_)));
}

#[tokio::test]
#[serial]
async fn test_pg_full_run_twice() {
    let Some(pool) = test_pool().await else { return };
    let (tenant_id, person_id, _) = insert_tenant(&pool, Some("+5511999999999")).await;
    let automation_id = insert_automation(
        &pool,
        tenant_id,
        &[Action::send_message("Bem-vindo @nome"), Action::add_tag("vip")],
    )
    .await;

    let store: Arc<dyn AutomationStore> = Arc::new(PgAutomationStore::new(pool.clone()));
    let outbox = Arc::new(PgNotifyOutbox::new(pool.clone(), "outbound_messages"));
    let runner = AutomationRunner::new(
        store.clone(),
        ExecutorRegistry::standard(store, outbox),
        RunnerSettings {
            pacing: Duration::ZERO,
            run_timeout: None,
        },
    );

    let first = runner.run(automation_id, person_id).await.unwrap();
    runner.run(automation_id, person_id).await.unwrap();

    let contents: Vec<(String, MessageDirection)> =
        sqlx::query_as("SELECT content, direction FROM messages ORDER BY created_at")
            .fetch_all(&pool)
            .await
            .unwrap();
    let conversations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
        .fetch_one(&pool)
        .await
        .unwrap();
    let tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM person_tags")
        .fetch_one(&pool)
        .await
        .unwrap();
    let runs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM automation_runs")
        .fetch_one(&pool)
        .await
        .unwrap();

    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(contents.len(), 2);
    assert!(contents.iter().all(|(content, direction)| {
        content == "Bem-vindo Ana" && *direction == MessageDirection::Outbound
    }));
    assert_eq!(conversations, 1);
    assert_eq!(tags, 1);
    assert_eq!(runs, 2);
}

#[tokio::test]
#[serial]
async fn test_pg_malformed_stored_action_fails_alone() {
    let Some(pool) = test_pool().await else { return };
    let (tenant_id, person_id, _) = insert_tenant(&pool, Some("+5511999999999")).await;
    let automation_id = insert_raw_automation(
        &pool,
        tenant_id,
        serde_json::json!([
            { "type": "send_message", "message_template": null },
            { "type": "add_tag", "tag_id": "vip" },
        ]),
    )
    .await;

    let store: Arc<dyn AutomationStore> = Arc::new(PgAutomationStore::new(pool.clone()));
    let runner = AutomationRunner::new(
        store.clone(),
        ExecutorRegistry::standard(store, Arc::new(PgNotifyOutbox::new(pool.clone(), "outbound_messages"))),
        RunnerSettings {
            pacing: Duration::ZERO,
            run_timeout: None,
        },
    );

    let report = runner.run(automation_id, person_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert!(!report.entries[0].succeeded());
    assert!(report.entries[1].succeeded());

    let tags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM person_tags")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(tags, 1);
}
