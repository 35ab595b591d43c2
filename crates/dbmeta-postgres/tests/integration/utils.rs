use std::sync::Arc;

use dbmeta_postgres::{ConnectionConfig, PgDataSource, SharedCatalog, SnapshotCatalog};
use dbmeta_test as test;

pub use dbmeta_cache::Monitor;

/// Setup tests and create a data source over the `catalog.yaml` fixture.
///
/// The returned catalog is the one the data source reads from. Use it to change the
/// server side, or to count queries. The `update_config` closure can modify the
/// connection settings before the data source is created.
pub fn setup_datasource(
    update_config: impl FnOnce(&mut ConnectionConfig),
) -> (PgDataSource, Arc<SnapshotCatalog>) {
    test::setup();

    let catalog = Arc::new(SnapshotCatalog::from_path(&test::fixture("catalog.yaml")).unwrap());

    let mut config = ConnectionConfig {
        url: Some("jdbc:postgresql://localhost:5432/inventory".into()),
        ..Default::default()
    };
    update_config(&mut config);

    let shared: SharedCatalog = catalog.clone();
    (PgDataSource::new(config, shared), catalog)
}

/// Like [`setup_datasource`], but reads the full database list and lets the server
/// report the current database.
pub fn setup_server_datasource() -> (PgDataSource, Arc<SnapshotCatalog>) {
    setup_datasource(|config| {
        config.url = None;
        config.read_database_list = true;
    })
}

pub fn names<T>(objects: &[Arc<T>], name: impl Fn(&T) -> String) -> Vec<String> {
    objects.iter().map(|object| name(object)).collect()
}
