use backup_orchestrator::filter::ScopeFilter;
use backup_orchestrator::fs::FilesystemSpace;
use backup_orchestrator::manifest::{FqtnWithId, TokenMap};
use backup_orchestrator::purge::{purge_decommissioned, PurgePolicy, StaticMembership};
use backup_orchestrator::restore::{restore_node, DownloadRestorer, RestoreMapping, RestoreOutcome};
use backup_orchestrator::storage::{LocalStorage, Storage};
use backup_orchestrator::transfer::{download_backup, upload_backup, UploadRequest};
use backup_orchestrator::verify::verify_backup;
use backup_orchestrator::{schema, OrchestratorError};
use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const SCHEMA: &str = "CREATE KEYSPACE shop WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 1};
CREATE TABLE shop.orders (id int PRIMARY KEY, customer text);
CREATE INDEX orders_idx ON shop.orders (customer);
CREATE KEYSPACE system_auth WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 1};
CREATE TABLE system_auth.roles (role text PRIMARY KEY);";

fn stage(root: &Path) {
    for (dir, file, content) in [
        ("shop/orders-5a1c", "nb-1-big-Data.db", "order-rows"),
        ("shop/orders-5a1c", "nb-1-big-Index.db", "idx"),
        ("shop/orders-5a1c/.orders_idx", "nb-1-big-Data.db", "customer"),
        ("system_auth/roles-9f00", "nb-1-big-Data.db", "roles"),
    ] {
        fs::create_dir_all(root.join(dir)).unwrap();
        fs::write(root.join(dir).join(file), content).unwrap();
    }
}

fn tokenmap(nodes: &[&str]) -> TokenMap {
    TokenMap(nodes.iter().enumerate().map(|(i, n)| (i.to_string(), n.to_string())).collect())
}

async fn back_up(storage: &dyn Storage, node: &str, backup: &str) {
    let staged = TempDir::new().unwrap();
    stage(staged.path());
    upload_backup(
        storage,
        UploadRequest {
            node,
            backup,
            staged_root: staged.path(),
            filter: &ScopeFilter::default(),
            schema: SCHEMA,
            tokenmap: &tokenmap(&["node1", "node2"]),
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_backup_then_scoped_download() {
    let bucket = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    let storage = LocalStorage::new(bucket.path(), Some("cluster-a"));
    back_up(&storage, "node1", "daily").await;

    let report = verify_backup(&storage, "node1", "daily").await.unwrap();
    assert!(report.is_valid());
    assert_eq!(report.checked, 4);

    let destination = target.path().join("restore");
    // System keyspaces stay in scope alongside a table selection unless ignored.
    assert!(ScopeFilter::new(Vec::<String>::new(), ["shop.orders"], false).retains("system_auth", "roles-9f00"));
    let filter = ScopeFilter::new(Vec::<String>::new(), ["shop.orders"], true);
    let report = download_backup(&storage, "node1", "daily", &filter, &destination, &FilesystemSpace)
        .await
        .unwrap();

    assert_eq!(report.transferred, vec![FqtnWithId::new("shop", "orders-5a1c")]);
    assert_eq!(report.objects, 3);
    assert_eq!(report.bytes, 21);
    let table = destination.join("shop/orders-5a1c");
    assert_eq!(fs::read_to_string(table.join("nb-1-big-Data.db")).unwrap(), "order-rows");
    assert_eq!(fs::read_to_string(table.join(".orders_idx/nb-1-big-Data.db")).unwrap(), "customer");
    assert!(!destination.join("system_auth").exists());
    for meta in ["manifest.json", "schema.cql", "tokenmap.json"] {
        assert!(destination.join(meta).is_file(), "{} not downloaded", meta);
    }

    let catalog = schema::parse(&fs::read_to_string(destination.join("schema.cql")).unwrap());
    let shop = catalog.keyspace("shop").unwrap();
    assert_eq!(shop.tables.len(), 1);
    assert_eq!(shop.indices.len(), 1);

    // Downloading over an existing table directory is refused up front.
    let again = download_backup(&storage, "node1", "daily", &filter, &destination, &FilesystemSpace).await;
    assert!(matches!(again, Err(OrchestratorError::DestinationExists(_))));
}

#[tokio::test]
async fn test_cross_node_restore_stages_source_backup() {
    let bucket = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(LocalStorage::new(bucket.path(), None));
    back_up(storage.as_ref(), "old-node", "daily").await;

    let mapping = RestoreMapping::from_json(
        r#"{"in_place": false, "host_map": {"new-node": {"source": "old-node", "seed": false}}}"#,
    )
    .unwrap();
    let restorer = DownloadRestorer::new(storage.clone(), staging.path().to_path_buf(), Arc::new(FilesystemSpace));
    let filter = ScopeFilter::new(["shop"], Vec::<String>::new(), true);

    let outcome = restore_node(storage.as_ref(), &restorer, "new-node", Some(&mapping), "daily", filter)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RestoreOutcome::Restored { source: "old-node".into(), backup: "daily".into(), in_place: false }
    );
    assert!(staging.path().join("daily/shop/orders-5a1c/nb-1-big-Data.db").is_file());
    assert!(!staging.path().join("daily/system_auth").exists());
}

#[tokio::test]
async fn test_purge_after_node_leaves_cluster() {
    let bucket = TempDir::new().unwrap();
    let storage = LocalStorage::new(bucket.path(), None);
    back_up(&storage, "node1", "daily").await;
    back_up(&storage, "node2", "daily").await;

    let live = StaticMembership(tokenmap(&["node1"]));
    let within_grace = purge_decommissioned(&storage, &live, PurgePolicy::default(), Utc::now())
        .await
        .unwrap();
    assert_eq!(within_grace.decommissioned, BTreeSet::from(["node2".to_string()]));
    assert_eq!(within_grace.retained_within_grace, 1);
    assert_eq!(within_grace.objects_purged, 0);

    let later = Utc::now() + Duration::days(11);
    let report = purge_decommissioned(&storage, &live, PurgePolicy::default(), later).await.unwrap();
    assert_eq!(report.backups_purged, 1);
    assert_eq!(report.objects_purged, 7);
    assert_eq!(report.bytes_purged, 26);
    assert!(storage.list_node_backups("node2").await.unwrap().is_empty());
    assert_eq!(storage.list_node_backups("node1").await.unwrap().len(), 1);
}
