use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dbmeta_cache::{ConnectionError, Monitor};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::catalog::{
    Catalog, DatabaseFilter, DatabaseRecord, SchemaRecord, SettingRecord, TableRecord,
};

/// The contents of a catalog snapshot file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CatalogDocument {
    /// The answer to `current_database()`.
    pub current_database: Option<String>,
    /// Delay applied to every query, to mimic a remote server.
    #[serde(with = "humantime_serde")]
    pub latency: Option<Duration>,
    pub databases: Vec<DatabaseEntry>,
    pub settings: Vec<SettingRecord>,
}

/// One database of a [`CatalogDocument`], with its schemas.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DatabaseEntry {
    #[serde(flatten)]
    pub record: DatabaseRecord,
    #[serde(default)]
    pub schemas: Vec<SchemaEntry>,
}

/// One schema of a [`DatabaseEntry`], with its tables.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SchemaEntry {
    #[serde(flatten)]
    pub record: SchemaRecord,
    #[serde(default)]
    pub tables: Vec<TableRecord>,
}

/// A [`Catalog`] that answers from an in-memory [`CatalogDocument`].
///
/// The document can be replaced at any time to simulate changes on the server, for
/// instance to drive a refresh. Going offline makes every query fail with
/// [`ConnectionError::ConnectionLost`].
#[derive(Debug, Default)]
pub struct SnapshotCatalog {
    document: RwLock<CatalogDocument>,
    offline: RwLock<Option<String>>,
    queries: AtomicUsize,
}

impl SnapshotCatalog {
    pub fn new(document: CatalogDocument) -> Self {
        Self {
            document: RwLock::new(document),
            ..Default::default()
        }
    }

    /// Parses a YAML snapshot.
    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source).map(Self::new)
    }

    /// Reads a YAML snapshot from a file.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Applies `f` to the served document.
    pub fn update(&self, f: impl FnOnce(&mut CatalogDocument)) {
        f(&mut self.document.write());
    }

    /// Makes all following queries fail with the given reason, or succeed again with `None`.
    pub fn set_offline(&self, reason: Option<&str>) {
        *self.offline.write() = reason.map(String::from);
    }

    /// The number of queries answered so far, including failed ones.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    async fn query<T>(&self, f: impl FnOnce(&CatalogDocument) -> T) -> Result<T, ConnectionError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let latency = self.document.read().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let offline = self.offline.read().clone();
        if let Some(reason) = offline {
            return Err(ConnectionError::ConnectionLost(reason));
        }
        Ok(f(&self.document.read()))
    }
}

fn find_database<'d>(
    document: &'d CatalogDocument,
    name: &str,
) -> Result<&'d DatabaseEntry, ConnectionError> {
    document
        .databases
        .iter()
        .find(|db| db.record.name == name)
        .ok_or_else(|| ConnectionError::QueryFailed(format!("database \"{name}\" does not exist")))
}

impl Catalog for SnapshotCatalog {
    fn list_databases<'a>(
        &'a self,
        _monitor: &'a Monitor,
        filter: &'a DatabaseFilter,
    ) -> BoxFuture<'a, Result<Vec<DatabaseRecord>, ConnectionError>> {
        Box::pin(self.query(|document| {
            let mut rows: Vec<DatabaseRecord> = document
                .databases
                .iter()
                .map(|db| &db.record)
                .filter(|record| filter.matches(record))
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.name.cmp(&b.name));
            rows
        }))
    }

    fn current_database<'a>(
        &'a self,
        _monitor: &'a Monitor,
    ) -> BoxFuture<'a, Result<Option<String>, ConnectionError>> {
        Box::pin(self.query(|document| document.current_database.clone()))
    }

    fn list_settings<'a>(
        &'a self,
        _monitor: &'a Monitor,
    ) -> BoxFuture<'a, Result<Vec<SettingRecord>, ConnectionError>> {
        Box::pin(self.query(|document| {
            let mut rows = document.settings.clone();
            rows.sort_by(|a, b| a.name.cmp(&b.name));
            rows
        }))
    }

    fn lookup_setting<'a>(
        &'a self,
        _monitor: &'a Monitor,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<SettingRecord>, ConnectionError>> {
        Box::pin(self.query(move |document| {
            document
                .settings
                .iter()
                .find(|setting| setting.name.eq_ignore_ascii_case(name))
                .cloned()
        }))
    }

    fn list_schemas<'a>(
        &'a self,
        _monitor: &'a Monitor,
        database: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SchemaRecord>, ConnectionError>> {
        Box::pin(async move {
            let rows = self
                .query(|document| -> Result<Vec<SchemaRecord>, ConnectionError> {
                    let db = find_database(document, database)?;
                    let mut rows: Vec<SchemaRecord> =
                        db.schemas.iter().map(|s| s.record.clone()).collect();
                    rows.sort_by(|a, b| a.name.cmp(&b.name));
                    Ok(rows)
                })
                .await;
            rows.and_then(|rows| rows)
        })
    }

    fn list_tables<'a>(
        &'a self,
        _monitor: &'a Monitor,
        database: &'a str,
        schema: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TableRecord>, ConnectionError>> {
        Box::pin(async move {
            let rows = self
                .query(|document| -> Result<Vec<TableRecord>, ConnectionError> {
                    let db = find_database(document, database)?;
                    // a schema that went away has no tables
                    let mut rows = db
                        .schemas
                        .iter()
                        .find(|s| s.record.name == schema)
                        .map(|s| s.tables.clone())
                        .unwrap_or_default();
                    rows.sort_by(|a, b| a.name.cmp(&b.name));
                    Ok(rows)
                })
                .await;
            rows.and_then(|rows| rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
current_database: app
latency: 1ms
databases:
  - oid: 16384
    name: app
    schemas:
      - oid: 2200
        name: public
        tables:
          - { oid: 3, name: users, rows: 10 }
          - { oid: 4, name: active_users, kind: view }
  - { oid: 1, name: template1, is_template: true }
settings:
  - { name: work_mem, setting: "4096", unit: kB }
"#;

    #[test]
    fn test_parse_document() {
        let catalog = SnapshotCatalog::from_yaml(DOCUMENT).unwrap();
        let document = catalog.document.read();
        assert_eq!(document.latency, Some(Duration::from_millis(1)));
        assert_eq!(document.databases.len(), 2);

        let app = &document.databases[0];
        assert!(app.record.allow_connections);
        assert!(!app.record.is_template);
        assert_eq!(app.schemas[0].tables[1].kind, crate::RelationKind::View);
        assert_eq!(app.schemas[0].tables[1].rows, None);
        assert_eq!(document.settings[0].unit.as_deref(), Some("kB"));
    }

    #[tokio::test]
    async fn test_queries() {
        let catalog = SnapshotCatalog::from_yaml(DOCUMENT).unwrap();
        let monitor = Monitor::new();

        let databases = catalog
            .list_databases(&monitor, &DatabaseFilter::default())
            .await
            .unwrap();
        assert_eq!(databases.len(), 1);

        let tables = catalog.list_tables(&monitor, "app", "public").await.unwrap();
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["active_users", "users"]);

        let setting = catalog.lookup_setting(&monitor, "WORK_MEM").await.unwrap();
        assert_eq!(setting.unwrap().setting, "4096");

        let err = catalog.list_schemas(&monitor, "gone").await.unwrap_err();
        assert!(matches!(err, ConnectionError::QueryFailed(_)));
        assert_eq!(catalog.queries(), 4);
    }

    #[tokio::test]
    async fn test_offline() {
        let catalog = SnapshotCatalog::from_yaml(DOCUMENT).unwrap();
        catalog.set_offline(Some("server closed the connection unexpectedly"));
        let err = catalog.current_database(&Monitor::new()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::ConnectionLost(_)));

        catalog.set_offline(None);
        let current = catalog.current_database(&Monitor::new()).await.unwrap();
        assert_eq!(current.as_deref(), Some("app"));
    }
}
