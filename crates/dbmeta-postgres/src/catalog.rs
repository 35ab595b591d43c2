//! The connection contract of the PostgreSQL model.
//!
//! A [`Catalog`] answers the handful of `pg_catalog` queries the metadata caches need.
//! Query execution itself lives outside of this crate, [`SnapshotCatalog`] serves the
//! same answers from a static document.
//!
//! [`SnapshotCatalog`]: crate::SnapshotCatalog

use std::sync::Arc;

use dbmeta_cache::{ConnectionError, Monitor};
use futures::future::BoxFuture;
use serde::Deserialize;

/// A row of `pg_database`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseRecord {
    pub oid: u64,
    pub name: String,
    pub owner: Option<String>,
    pub encoding: Option<String>,
    pub is_template: bool,
    #[serde(default = "default_true")]
    pub allow_connections: bool,
}

/// A row of `pg_settings`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettingRecord {
    pub name: String,
    pub setting: String,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

/// A row of `pg_namespace`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchemaRecord {
    pub oid: u64,
    pub name: String,
    pub owner: Option<String>,
}

/// The kind of a relation, from `pg_class.relkind`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    #[default]
    Table,
    View,
    MaterializedView,
    ForeignTable,
    PartitionedTable,
}

/// A row of `pg_class`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TableRecord {
    pub oid: u64,
    pub name: String,
    pub kind: RelationKind,
    /// The planner's row estimate, `pg_class.reltuples`.
    pub rows: Option<u64>,
}

fn default_true() -> bool {
    true
}

/// Restricts the database listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatabaseFilter {
    /// Include template databases.
    pub show_templates: bool,
    /// Include databases that do not accept connections.
    pub show_unavailable: bool,
    /// A database that is listed even if it is a template.
    ///
    /// This is the database named in the connection settings.
    pub include: Option<String>,
}

impl DatabaseFilter {
    /// Whether the database described by `record` passes this filter.
    pub fn matches(&self, record: &DatabaseRecord) -> bool {
        if !self.show_unavailable && !record.allow_connections {
            return false;
        }
        self.show_templates
            || !record.is_template
            || self.include.as_deref() == Some(record.name.as_str())
    }
}

/// Catalog queries against a PostgreSQL server.
///
/// Every listing returns rows in the order the server sorts them, which is by name.
pub trait Catalog: Send + Sync + 'static {
    /// `SELECT db.oid, db.* FROM pg_catalog.pg_database db`
    fn list_databases<'a>(
        &'a self,
        monitor: &'a Monitor,
        filter: &'a DatabaseFilter,
    ) -> BoxFuture<'a, Result<Vec<DatabaseRecord>, ConnectionError>>;

    /// `SELECT current_database()`
    fn current_database<'a>(
        &'a self,
        monitor: &'a Monitor,
    ) -> BoxFuture<'a, Result<Option<String>, ConnectionError>>;

    /// `SELECT * FROM pg_catalog.pg_settings`
    fn list_settings<'a>(
        &'a self,
        monitor: &'a Monitor,
    ) -> BoxFuture<'a, Result<Vec<SettingRecord>, ConnectionError>>;

    /// `SELECT * FROM pg_catalog.pg_settings WHERE name = $1`
    fn lookup_setting<'a>(
        &'a self,
        monitor: &'a Monitor,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<SettingRecord>, ConnectionError>>;

    /// Lists the schemas of one database.
    fn list_schemas<'a>(
        &'a self,
        monitor: &'a Monitor,
        database: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SchemaRecord>, ConnectionError>>;

    /// Lists the relations of one schema.
    fn list_tables<'a>(
        &'a self,
        monitor: &'a Monitor,
        database: &'a str,
        schema: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TableRecord>, ConnectionError>>;
}

/// A reference counted [`Catalog`] handle, shared by all caches of one data source.
pub type SharedCatalog = Arc<dyn Catalog>;

#[cfg(test)]
mod tests {
    use super::*;

    fn database(name: &str, is_template: bool, allow_connections: bool) -> DatabaseRecord {
        DatabaseRecord {
            name: name.into(),
            is_template,
            allow_connections,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_filter() {
        let filter = DatabaseFilter::default();
        assert!(filter.matches(&database("app", false, true)));
        assert!(!filter.matches(&database("template1", true, true)));
        assert!(!filter.matches(&database("archive", false, false)));
    }

    #[test]
    fn test_filter_includes_connection_database() {
        let filter = DatabaseFilter {
            include: Some("template1".into()),
            ..Default::default()
        };
        assert!(filter.matches(&database("template1", true, true)));
        assert!(!filter.matches(&database("template0", true, true)));
        // unavailable databases stay hidden even when named
        assert!(!filter.matches(&database("template1", true, false)));
    }

    #[test]
    fn test_filter_show_all() {
        let filter = DatabaseFilter {
            show_templates: true,
            show_unavailable: true,
            include: None,
        };
        assert!(filter.matches(&database("template0", true, false)));
    }
}
