use std::sync::Arc;

use dbmeta_cache::Freshness;
use dbmeta_postgres::RelationKind;

use crate::{Monitor, names, setup_server_datasource};

#[tokio::test]
async fn test_cache_structure_depth() {
    let (datasource, catalog) = setup_server_datasource();
    let monitor = Monitor::new();
    datasource.initialize(&monitor).await.unwrap();
    let initialized = catalog.queries();

    datasource.cache_structure(&monitor, 2).await.unwrap();
    // one schema listing per database
    assert_eq!(catalog.queries(), initialized + 3);
    let inventory = datasource.database("inventory").unwrap();
    assert!(inventory.schema_cache().is_fully_cached());
    let public = inventory.schema("public").unwrap();
    assert_eq!(public.table_cache().freshness(), Freshness::Empty);

    datasource.cache_structure(&monitor, 3).await.unwrap();
    // one table listing per schema, schemas are not read again
    assert_eq!(catalog.queries(), initialized + 3 + 4);
    let tables = public.table_cache().get_cached_objects();
    assert_eq!(
        names(&tables, |t| t.name().to_owned()),
        ["low_stock", "products", "stock"]
    );
    assert_eq!(public.table("low_stock").unwrap().kind(), RelationKind::View);
    assert_eq!(public.table("stock").unwrap().rows(), Some(98000));

    datasource.cache_structure(&monitor, 3).await.unwrap();
    assert_eq!(catalog.queries(), initialized + 7);
}

#[tokio::test]
async fn test_schema_rename_keeps_instance() {
    let (datasource, catalog) = setup_server_datasource();
    let monitor = Monitor::new();
    datasource.initialize(&monitor).await.unwrap();

    let inventory = datasource.database("inventory").unwrap();
    inventory.schemas(&monitor).await.unwrap();
    let audit = inventory.schema("audit").unwrap();
    audit.tables(&monitor).await.unwrap();

    catalog.update(|document| {
        let inventory = document
            .databases
            .iter_mut()
            .find(|db| db.record.name == "inventory")
            .unwrap();
        for schema in &mut inventory.schemas {
            if schema.record.name == "audit" {
                schema.record.name = "history".into();
            }
        }
    });

    let changes = inventory.refresh_schemas(&monitor).await.unwrap();
    assert!(changes.is_unchanged());
    assert_eq!(changes.updated.len(), 2);

    assert!(inventory.schema("audit").is_none());
    let history = inventory.schema("history").unwrap();
    assert!(Arc::ptr_eq(&history, &audit));
    assert_eq!(audit.name(), "history");
    assert!(audit.table_cache().is_fully_cached());
    assert!(audit.table("events").is_some());
    assert_eq!(audit.table_cache().name(), "tables of schema 16500 in inventory");
}

#[tokio::test]
async fn test_recreated_database_drops_schemas() {
    let (datasource, catalog) = setup_server_datasource();
    let monitor = Monitor::new();
    datasource.initialize(&monitor).await.unwrap();

    let billing = datasource.database("billing").unwrap();
    billing.schemas(&monitor).await.unwrap();

    catalog.update(|document| {
        for db in &mut document.databases {
            if db.record.name == "billing" {
                db.record.oid = 17000;
            }
        }
    });
    datasource.refresh(&monitor).await.unwrap();

    assert!(Arc::ptr_eq(&datasource.database("billing").unwrap(), &billing));
    assert_eq!(billing.info().oid, 17000);
    assert_eq!(billing.schema_cache().freshness(), Freshness::Empty);
}

#[tokio::test]
async fn test_partial_structure_failure() {
    let (datasource, catalog) = setup_server_datasource();
    let monitor = Monitor::new();
    datasource.initialize(&monitor).await.unwrap();

    catalog.set_offline(Some("terminating connection due to administrator command"));
    let err = datasource.cache_structure(&monitor, 3).await.unwrap_err();
    assert!(!err.is_cancelled());

    // the database list itself was already loaded and is unaffected
    assert_eq!(datasource.databases().len(), 3);
    for database in datasource.databases() {
        assert!(!database.schema_cache().is_fully_cached());
    }
}

#[tokio::test]
async fn test_cancelled_structure_load() {
    let (datasource, catalog) = setup_server_datasource();
    datasource.initialize(&Monitor::new()).await.unwrap();
    let initialized = catalog.queries();

    let monitor = Monitor::new();
    monitor.cancel();
    let err = datasource.cache_structure(&monitor, 3).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(catalog.queries(), initialized);
}
