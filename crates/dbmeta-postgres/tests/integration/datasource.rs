use std::sync::Arc;

use dbmeta_cache::Freshness;
use dbmeta_postgres::{Database, DataSourceError, DatabaseEntry, DatabaseRecord};

use crate::{Monitor, names, setup_datasource, setup_server_datasource};

fn database_names(databases: &[Arc<Database>]) -> Vec<String> {
    names(databases, |db| db.name().to_owned())
}

#[tokio::test]
async fn test_single_database_mode() {
    let (datasource, catalog) = setup_datasource(|_| {});
    assert!(matches!(
        datasource.default_instance(),
        Err(DataSourceError::NotConnected)
    ));

    datasource.initialize(&Monitor::new()).await.unwrap();

    assert_eq!(database_names(&datasource.databases()), ["inventory"]);
    let inventory = datasource.default_instance().unwrap();
    assert_eq!(inventory.name(), "inventory");
    // never read from the server
    assert_eq!(inventory.info().oid, 0);

    // only the settings preload talks to the server
    assert_eq!(catalog.queries(), 1);
    assert!(datasource.setting_cache().is_fully_cached());
}

#[tokio::test]
async fn test_default_database_without_url() {
    let (datasource, _catalog) = setup_datasource(|config| config.url = None);
    datasource.initialize(&Monitor::new()).await.unwrap();

    assert_eq!(datasource.active_database_name(), "postgres");
    assert_eq!(datasource.default_instance().unwrap().name(), "postgres");
}

#[tokio::test]
async fn test_read_database_list() {
    let (datasource, catalog) = setup_server_datasource();
    datasource.initialize(&Monitor::new()).await.unwrap();

    // templates and databases that refuse connections are hidden
    assert_eq!(
        database_names(&datasource.databases()),
        ["billing", "inventory", "postgres"]
    );
    // resolved through `current_database()`
    assert_eq!(datasource.active_database_name(), "inventory");
    assert_eq!(datasource.default_instance().unwrap().info().oid, 16384);
    assert_eq!(catalog.queries(), 3);
}

#[tokio::test]
async fn test_database_list_filters() {
    let (datasource, _catalog) = setup_datasource(|config| {
        config.read_database_list = true;
        config.show_templates = true;
        config.show_unavailable = true;
    });
    datasource.initialize(&Monitor::new()).await.unwrap();
    assert_eq!(datasource.databases().len(), 6);

    let (datasource, _catalog) = setup_datasource(|config| {
        config.read_database_list = true;
        config.database = Some("template1".into());
    });
    datasource.initialize(&Monitor::new()).await.unwrap();
    assert_eq!(
        database_names(&datasource.databases()),
        ["billing", "inventory", "postgres", "template1"]
    );
    assert_eq!(datasource.default_instance().unwrap().name(), "template1");
}

#[tokio::test]
async fn test_default_instance_fallback() {
    let (datasource, catalog) = setup_datasource(|config| {
        config.read_database_list = true;
        config.database = Some("dropped".into());
    });
    let monitor = Monitor::new();
    datasource.initialize(&monitor).await.unwrap();
    assert_eq!(datasource.default_instance().unwrap().name(), "postgres");

    catalog.update(|document| document.databases.retain(|db| db.record.name != "postgres"));
    datasource.refresh(&monitor).await.unwrap();
    assert_eq!(datasource.default_instance().unwrap().name(), "billing");

    catalog.update(|document| document.databases.clear());
    datasource.refresh(&monitor).await.unwrap();
    assert!(matches!(
        datasource.default_instance(),
        Err(DataSourceError::NoDatabases)
    ));
}

#[tokio::test]
async fn test_set_active_database() {
    let (datasource, _catalog) = setup_server_datasource();
    datasource.initialize(&Monitor::new()).await.unwrap();

    let inventory = datasource.database("inventory").unwrap();
    let billing = datasource.database("billing").unwrap();
    assert!(!datasource.set_active_database(&inventory));
    assert!(datasource.set_active_database(&billing));
    assert!(Arc::ptr_eq(&datasource.default_instance().unwrap(), &billing));
}

#[tokio::test]
async fn test_refresh_preserves_databases() {
    let (datasource, catalog) = setup_server_datasource();
    let monitor = Monitor::new();
    datasource.initialize(&monitor).await.unwrap();

    let inventory = datasource.database("inventory").unwrap();
    let billing = datasource.database("billing").unwrap();
    inventory.schemas(&monitor).await.unwrap();
    billing.schemas(&monitor).await.unwrap();
    assert!(datasource.setting("work_mem").is_some());

    catalog.update(|document| {
        document.databases.retain(|db| db.record.name != "billing");
        document.databases.push(DatabaseEntry {
            record: DatabaseRecord {
                oid: 16600,
                name: "reports".into(),
                allow_connections: true,
                ..Default::default()
            },
            schemas: Vec::new(),
        });
    });

    let changes = datasource.refresh(&monitor).await.unwrap();
    assert_eq!(database_names(&changes.added), ["reports"]);
    assert_eq!(database_names(&changes.removed), ["billing"]);
    assert_eq!(database_names(&changes.updated), ["inventory", "postgres"]);
    assert_eq!(
        database_names(&datasource.databases()),
        ["inventory", "postgres", "reports"]
    );

    // the surviving database keeps its instance and its schemas
    assert!(Arc::ptr_eq(&datasource.database("inventory").unwrap(), &inventory));
    assert!(inventory.schema_cache().is_fully_cached());
    // the removed one drops its nested cache
    assert_eq!(billing.schema_cache().freshness(), Freshness::Empty);
    assert!(billing.schema_cache().get_cached_objects().is_empty());

    // settings are read again on next use
    assert_eq!(datasource.setting_cache().freshness(), Freshness::Empty);
    assert!(datasource.setting("work_mem").is_none());
}

#[tokio::test]
async fn test_failed_initialize_can_be_retried() {
    let (datasource, catalog) = setup_server_datasource();
    let monitor = Monitor::new();

    catalog.set_offline(Some("could not connect to server"));
    let err = datasource.initialize(&monitor).await.unwrap_err();
    assert!(matches!(err, DataSourceError::Cache(_)));
    assert!(!err.is_cancelled());
    assert!(datasource.databases().is_empty());

    catalog.set_offline(None);
    datasource.initialize(&monitor).await.unwrap();
    assert_eq!(datasource.databases().len(), 3);
}

#[tokio::test]
async fn test_settings_preload_failure_is_ignored() {
    let (datasource, catalog) = setup_datasource(|_| {});
    let monitor = Monitor::new();

    catalog.set_offline(Some("permission denied for view pg_settings"));
    datasource.initialize(&monitor).await.unwrap();
    assert_eq!(datasource.default_instance().unwrap().name(), "inventory");
    assert_eq!(datasource.setting_cache().freshness(), Freshness::Empty);

    catalog.set_offline(None);
    let work_mem = datasource.get_setting(&monitor, "work_mem").await.unwrap();
    assert_eq!(work_mem.unwrap().value().setting, "4096");
}

#[tokio::test]
async fn test_cancelled_initialize() {
    let (datasource, catalog) = setup_server_datasource();
    let monitor = Monitor::new();
    monitor.cancel();

    let err = datasource.initialize(&monitor).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(catalog.queries(), 0);
    assert_eq!(datasource.database_cache().freshness(), Freshness::Empty);
}
