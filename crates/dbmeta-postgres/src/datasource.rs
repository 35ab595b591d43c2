use std::sync::Arc;

use dbmeta_cache::{
    CacheConfig, CacheError, ChangeSet, KeyPolicy, Monitor, ObjectCache,
};
use parking_lot::RwLock;

use crate::catalog::SharedCatalog;
use crate::config::{ConnectionConfig, DEFAULT_DATABASE};
use crate::database::{Database, DatabaseSource};
use crate::error::DataSourceError;
use crate::setting::{Setting, SettingSource};

/// The metadata model of one PostgreSQL server connection.
///
/// The data source owns the cache of databases, each of which owns its schema cache,
/// and so on down to tables. Server settings are cached alongside the databases and can
/// be resolved one by one without reading all of them.
pub struct PgDataSource {
    config: ConnectionConfig,
    catalog: SharedCatalog,
    active: RwLock<Option<String>>,
    databases: ObjectCache<DatabaseSource>,
    settings: ObjectCache<SettingSource>,
}

impl PgDataSource {
    /// Creates a data source that is not initialized yet.
    pub fn new(config: ConnectionConfig, catalog: SharedCatalog) -> Self {
        let databases = ObjectCache::new(
            CacheConfig::named("databases"),
            DatabaseSource::new(Arc::clone(&catalog)),
        )
        .with_listener(|changes: &ChangeSet<Database>| {
            for database in &changes.added {
                tracing::debug!(database = database.name(), "Database appeared");
            }
            for database in &changes.removed {
                tracing::debug!(database = database.name(), "Database disappeared");
            }
        });

        // setting names are case insensitive in postgres
        let settings = ObjectCache::new(
            CacheConfig::named("settings").with_key_policy(KeyPolicy::Lowercase),
            SettingSource::new(Arc::clone(&catalog)),
        );

        Self {
            active: RwLock::new(config.configured_database()),
            config,
            catalog,
            databases,
            settings,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// Connects the data source and reads its databases.
    ///
    /// Unless the configuration asks for the full database list, only the active
    /// database is registered, without asking the server. Settings are preloaded on a
    /// best effort basis, failing to read them does not fail the initialization.
    pub async fn initialize(&self, monitor: &Monitor) -> Result<(), DataSourceError> {
        monitor.begin_task("Initialize PostgreSQL data source");

        if self.config.read_database_list {
            self.databases.get_all_objects(monitor, self).await?;
            if self.active.read().is_none() {
                let current = tokio::select! {
                    biased;
                    _ = monitor.cancelled() => return Err(CacheError::Cancelled.into()),
                    current = self.catalog.current_database(monitor) => current?,
                };
                tracing::debug!(database = ?current, "Resolved current database");
                *self.active.write() = current;
            }
        } else {
            let active = self.active_database_name();
            let database = self.databases.source().placeholder(&active);
            self.databases.set_cache(vec![database]);
        }

        self.active
            .write()
            .get_or_insert_with(|| DEFAULT_DATABASE.into());

        match self.settings.get_all_objects(monitor, self).await {
            Ok(settings) => tracing::debug!(settings = settings.len(), "Preloaded settings"),
            Err(err) if err.is_cancelled() => return Err(err.into()),
            Err(err) => tracing::warn!(error = %err, "Failed to preload settings"),
        }

        Ok(())
    }

    /// The name of the active database.
    pub fn active_database_name(&self) -> String {
        self.active
            .read()
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.into())
    }

    /// The database that connections use by default.
    ///
    /// This is the active database, if it is cached, then the `postgres` database, then
    /// the first database of the server.
    pub fn default_instance(&self) -> Result<Arc<Database>, DataSourceError> {
        if !self.databases.is_fully_cached() {
            return Err(DataSourceError::NotConnected);
        }

        let active = self.active_database_name();
        self.databases
            .get_cached_object(&active)
            .or_else(|| self.databases.get_cached_object(DEFAULT_DATABASE))
            .or_else(|| self.databases.get_cached_objects().into_iter().next())
            .ok_or(DataSourceError::NoDatabases)
    }

    /// Makes `database` the active one.
    ///
    /// Returns `false` if it already was the default instance.
    pub fn set_active_database(&self, database: &Database) -> bool {
        if let Ok(current) = self.default_instance() {
            if std::ptr::eq(Arc::as_ptr(&current), database) {
                return false;
            }
        }
        tracing::info!(database = database.name(), "Switching active database");
        *self.active.write() = Some(database.name().into());
        true
    }

    /// The cache of databases.
    pub fn database_cache(&self) -> &ObjectCache<DatabaseSource> {
        &self.databases
    }

    /// The cache of server settings.
    pub fn setting_cache(&self) -> &ObjectCache<SettingSource> {
        &self.settings
    }

    /// The cached databases, empty before [`initialize`](Self::initialize).
    pub fn databases(&self) -> Vec<Arc<Database>> {
        self.databases.get_cached_objects()
    }

    pub fn database(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.get_cached_object(name)
    }

    /// Returns all server settings, reading them if needed.
    pub async fn settings(&self, monitor: &Monitor) -> Result<Vec<Arc<Setting>>, DataSourceError> {
        Ok(self.settings.get_all_objects(monitor, self).await?)
    }

    /// Returns a cached setting.
    pub fn setting(&self, name: &str) -> Option<Arc<Setting>> {
        self.settings.get_cached_object(name)
    }

    /// Returns one setting, querying only that setting if the settings are not loaded.
    pub async fn get_setting(
        &self,
        monitor: &Monitor,
        name: &str,
    ) -> Result<Option<Arc<Setting>>, DataSourceError> {
        Ok(self.settings.get_object(monitor, self, name).await?)
    }

    /// Reads the database list again and drops the cached settings.
    ///
    /// Databases that still exist keep their instance, and with it their cached schemas.
    pub async fn refresh(&self, monitor: &Monitor) -> Result<ChangeSet<Database>, DataSourceError> {
        self.settings.clear_cache();
        let changes = self.databases.refresh_objects(monitor, self).await?;

        if self.database(&self.active_database_name()).is_none() {
            tracing::warn!(
                database = %self.active_database_name(),
                "Active database is gone after refresh"
            );
        }
        Ok(changes)
    }

    /// Eagerly reads the metadata tree.
    ///
    /// A `depth` of `1` reads databases, `2` also their schemas, and `3` also tables.
    pub async fn cache_structure(&self, monitor: &Monitor, depth: u32) -> Result<(), DataSourceError> {
        Ok(self.databases.cache_structure(monitor, self, depth).await?)
    }
}

impl std::fmt::Debug for PgDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDataSource")
            .field("config", &self.config)
            .field("active", &*self.active.read())
            .field("databases", &self.databases)
            .field("settings", &self.settings)
            .finish()
    }
}
