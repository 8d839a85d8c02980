//! One suite, run against both deployment stores

use shipyard::errors::DeployError;
use shipyard::models::deployment::DeployStatus;
use shipyard::store::{DeploymentStore, MemoryStore, SqliteStore};
use tokio_test::{assert_err, assert_ok};

async fn sqlite() -> SqliteStore {
    SqliteStore::connect("sqlite::memory:", 1).await.unwrap()
}

async fn upsert_is_unique_per_owner_and_app(store: &dyn DeploymentStore) {
    let first = store.upsert("u1", "acme").await.unwrap();
    assert_eq!(first.deploy_status, DeployStatus::Preparing);
    assert!(!first.has_resource());

    let again = store.upsert("u1", "acme").await.unwrap();
    assert_eq!(again.id, first.id);
    assert!(again.updated_at >= first.updated_at);

    let other_owner = store.upsert("u2", "acme").await.unwrap();
    assert_ne!(other_owner.id, first.id);
}

async fn resource_and_status_updates(store: &dyn DeploymentStore) {
    let row = store.upsert("u1", "shop").await.unwrap();
    store
        .set_resource(row.id, "shipyard-9", "https://shipyard-9.example")
        .await
        .unwrap();

    let found = store.find_by_resource("shipyard-9").await.unwrap().unwrap();
    assert_eq!(found.application_name, "shop");
    assert_eq!(found.url().as_deref(), Some("https://shipyard-9.example"));

    store
        .set_status("shipyard-9", DeployStatus::Error, Some("npm ERR!"))
        .await
        .unwrap();
    let found = store.find("u1", "shop").await.unwrap().unwrap();
    assert_eq!(found.deploy_status, DeployStatus::Error);
    assert_eq!(found.deploy_error.as_deref(), Some("npm ERR!"));

    // Clearing the error on the next build
    store
        .set_status("shipyard-9", DeployStatus::Building, None)
        .await
        .unwrap();
    let found = store.find("u1", "shop").await.unwrap().unwrap();
    assert_eq!(found.deploy_status, DeployStatus::Building);
    assert_eq!(found.deploy_error, None);
}

async fn missing_rows(store: &dyn DeploymentStore) {
    assert!(store.find("nobody", "nothing").await.unwrap().is_none());
    assert!(store.find_by_resource("shipyard-404").await.unwrap().is_none());
    let err = store
        .set_status("shipyard-404", DeployStatus::Deployed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::NotFound(_)));
    assert_err!(store.set_resource(404, "x", "y").await);
}

#[tokio::test]
async fn test_memory_store() {
    let store = MemoryStore::new();
    upsert_is_unique_per_owner_and_app(&store).await;
    resource_and_status_updates(&store).await;
    missing_rows(&store).await;
}

#[tokio::test]
async fn test_sqlite_store() {
    let store = sqlite().await;
    upsert_is_unique_per_owner_and_app(&store).await;
    resource_and_status_updates(&store).await;
    missing_rows(&store).await;
}

#[tokio::test]
async fn test_sqlite_schema_is_idempotent() {
    let store = sqlite().await;
    store.ensure_schema().await.unwrap();
    store.ensure_schema().await.unwrap();
    assert_ok!(store.upsert("u1", "acme").await);
}
