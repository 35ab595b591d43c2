use std::sync::Arc;

use dbmeta_cache::{
    CacheConfig, CacheContainer, CacheError, CacheObject, CacheSource, ConnectionError, Identity,
    Monitor, ObjectCache,
};
use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::catalog::{RelationKind, SchemaRecord, SharedCatalog, TableRecord};
use crate::database::Database;

/// A schema (`pg_namespace`) of a [`Database`].
///
/// Schemas are keyed by their object id, so a schema that was renamed on the server
/// keeps its instance and its table cache when the schemas are refreshed.
pub struct Schema {
    oid: u64,
    database: String,
    name: RwLock<String>,
    owner: RwLock<Option<String>>,
    tables: ObjectCache<TableSource>,
}

impl Schema {
    pub fn oid(&self) -> u64 {
        self.oid
    }

    /// The current name of this schema.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn owner(&self) -> Option<String> {
        self.owner.read().clone()
    }

    /// The name of the database this schema belongs to.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The cache of this schema's tables, views and other relations.
    pub fn table_cache(&self) -> &ObjectCache<TableSource> {
        &self.tables
    }

    /// Returns all tables, reading them on first use.
    pub async fn tables(&self, monitor: &Monitor) -> Result<Vec<Arc<Table>>, CacheError> {
        self.tables.get_all_objects(monitor, self).await
    }

    /// Looks up a cached table.
    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get_cached_object(name)
    }
}

impl CacheObject for Schema {
    fn identity(&self) -> Identity<'_> {
        Identity::Id(self.oid)
    }

    fn evicted(&self) {
        self.tables.clear_cache();
    }
}

impl CacheContainer for Schema {
    fn cache_structure<'a>(
        &'a self,
        monitor: &'a Monitor,
        depth: u32,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            if depth > 0 {
                self.tables(monitor).await?;
            }
            Ok(())
        })
    }
}

/// Reads the schemas of a [`Database`].
pub struct SchemaSource {
    catalog: SharedCatalog,
}

impl SchemaSource {
    pub(crate) fn new(catalog: SharedCatalog) -> Self {
        Self { catalog }
    }
}

impl CacheSource for SchemaSource {
    type Owner = Database;
    type Record = SchemaRecord;
    type Object = Schema;

    fn list_all<'a>(
        &'a self,
        monitor: &'a Monitor,
        owner: &'a Database,
    ) -> BoxFuture<'a, Result<Vec<SchemaRecord>, ConnectionError>> {
        self.catalog.list_schemas(monitor, owner.name())
    }

    fn construct(&self, owner: &Database, record: SchemaRecord) -> Option<Schema> {
        // named by oid, which survives renames
        let cache_name = format!("tables of schema {} in {}", record.oid, owner.name());
        Some(Schema {
            oid: record.oid,
            database: owner.name().into(),
            name: RwLock::new(record.name),
            owner: RwLock::new(record.owner),
            tables: ObjectCache::new(
                CacheConfig::named(&cache_name),
                TableSource {
                    catalog: Arc::clone(&self.catalog),
                },
            ),
        })
    }

    fn merge(&self, existing: &Schema, fresh: Schema) {
        let name = fresh.name.into_inner();
        if *existing.name.read() != name {
            tracing::debug!(schema = existing.oid, %name, "Schema was renamed");
        }
        *existing.name.write() = name;
        *existing.owner.write() = fresh.owner.into_inner();
    }
}

/// A relation of a [`Schema`]: a table, view or similar.
#[derive(Debug)]
pub struct Table {
    oid: u64,
    name: String,
    kind: RelationKind,
    rows: RwLock<Option<u64>>,
}

impl Table {
    pub fn oid(&self) -> u64 {
        self.oid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// The estimated number of rows, if the table was analyzed.
    pub fn rows(&self) -> Option<u64> {
        *self.rows.read()
    }
}

impl CacheObject for Table {
    fn identity(&self) -> Identity<'_> {
        Identity::Name(&self.name)
    }
}

/// Reads the relations of a [`Schema`].
pub struct TableSource {
    catalog: SharedCatalog,
}

impl CacheSource for TableSource {
    type Owner = Schema;
    type Record = TableRecord;
    type Object = Table;

    fn list_all<'a>(
        &'a self,
        monitor: &'a Monitor,
        owner: &'a Schema,
    ) -> BoxFuture<'a, Result<Vec<TableRecord>, ConnectionError>> {
        Box::pin(async move {
            let schema = owner.name();
            self.catalog
                .list_tables(monitor, owner.database(), &schema)
                .await
        })
    }

    fn construct(&self, _owner: &Schema, record: TableRecord) -> Option<Table> {
        Some(Table {
            oid: record.oid,
            name: record.name,
            kind: record.kind,
            rows: RwLock::new(record.rows),
        })
    }

    fn merge(&self, existing: &Table, fresh: Table) {
        *existing.rows.write() = fresh.rows.into_inner();
    }
}
