use std::sync::Arc;

use dbmeta_cache::{
    CacheConfig, CacheContainer, CacheError, CacheObject, CacheSource, ChangeSet,
    ConnectionError, Identity, Monitor, ObjectCache,
};
use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::catalog::{DatabaseRecord, SharedCatalog};
use crate::schema::{Schema, SchemaSource};
use crate::PgDataSource;

/// The mutable attributes of a [`Database`], refreshed from `pg_database`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// The object id, `0` for databases that were never read from the server.
    pub oid: u64,
    pub owner: Option<String>,
    pub encoding: Option<String>,
    pub is_template: bool,
    pub allow_connections: bool,
}

/// One database on the server.
///
/// A database owns the cache of its schemas. The schemas are dropped when the database
/// leaves the database cache, and kept when a refresh finds the database again.
pub struct Database {
    name: String,
    info: RwLock<DatabaseInfo>,
    schemas: ObjectCache<SchemaSource>,
}

impl Database {
    fn new(catalog: SharedCatalog, record: DatabaseRecord) -> Self {
        let DatabaseRecord {
            oid,
            name,
            owner,
            encoding,
            is_template,
            allow_connections,
        } = record;

        let cache_name = format!("schemas of {name}");
        Self {
            schemas: ObjectCache::new(CacheConfig::named(&cache_name), SchemaSource::new(catalog)),
            name,
            info: RwLock::new(DatabaseInfo {
                oid,
                owner,
                encoding,
                is_template,
                allow_connections,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> DatabaseInfo {
        self.info.read().clone()
    }

    /// The cache of this database's schemas.
    pub fn schema_cache(&self) -> &ObjectCache<SchemaSource> {
        &self.schemas
    }

    /// Returns all schemas, reading them on first use.
    pub async fn schemas(&self, monitor: &Monitor) -> Result<Vec<Arc<Schema>>, CacheError> {
        self.schemas.get_all_objects(monitor, self).await
    }

    /// Looks up a cached schema by its current name.
    pub fn schema(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas
            .get_cached_objects()
            .into_iter()
            .find(|schema| schema.name() == name)
    }

    /// Reads the schemas again, keeping unchanged and renamed ones.
    pub async fn refresh_schemas(&self, monitor: &Monitor) -> Result<ChangeSet<Schema>, CacheError> {
        self.schemas.refresh_objects(monitor, self).await
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("info", &*self.info.read())
            .field("schemas", &self.schemas)
            .finish()
    }
}

impl CacheObject for Database {
    fn identity(&self) -> Identity<'_> {
        Identity::Name(&self.name)
    }

    fn evicted(&self) {
        self.schemas.clear_cache();
    }
}

impl CacheContainer for Database {
    fn cache_structure<'a>(
        &'a self,
        monitor: &'a Monitor,
        depth: u32,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(self.schemas.cache_structure(monitor, self, depth))
    }
}

/// Reads the databases of a [`PgDataSource`].
pub struct DatabaseSource {
    catalog: SharedCatalog,
}

impl DatabaseSource {
    pub(crate) fn new(catalog: SharedCatalog) -> Self {
        Self { catalog }
    }

    /// Creates a database that is only known by name.
    pub(crate) fn placeholder(&self, name: &str) -> Database {
        Database::new(Arc::clone(&self.catalog), placeholder_record(name))
    }
}

fn placeholder_record(name: &str) -> DatabaseRecord {
    DatabaseRecord {
        name: name.into(),
        allow_connections: true,
        ..Default::default()
    }
}

impl CacheSource for DatabaseSource {
    type Owner = PgDataSource;
    type Record = DatabaseRecord;
    type Object = Database;

    fn list_all<'a>(
        &'a self,
        monitor: &'a Monitor,
        owner: &'a PgDataSource,
    ) -> BoxFuture<'a, Result<Vec<DatabaseRecord>, ConnectionError>> {
        Box::pin(async move {
            let config = owner.config();
            if !config.read_database_list {
                // only the active database is shown
                return Ok(vec![placeholder_record(&owner.active_database_name())]);
            }
            let filter = config.database_filter();
            self.catalog.list_databases(monitor, &filter).await
        })
    }

    fn construct(&self, _owner: &PgDataSource, record: DatabaseRecord) -> Option<Database> {
        Some(Database::new(Arc::clone(&self.catalog), record))
    }

    fn merge(&self, existing: &Database, fresh: Database) {
        let fresh = fresh.info.into_inner();
        let mut info = existing.info.write();
        if info.oid != 0 && info.oid != fresh.oid {
            // dropped and created again under the same name
            tracing::debug!(database = existing.name(), "Database was recreated");
            existing.schemas.clear_cache();
        }
        *info = fresh;
    }
}
