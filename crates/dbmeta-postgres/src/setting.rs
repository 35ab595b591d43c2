use dbmeta_cache::{
    CacheObject, CacheSource, ConnectionError, Identity, LookupSource, Monitor,
};
use futures::future::{self, BoxFuture};
use parking_lot::RwLock;

use crate::catalog::{SettingRecord, SharedCatalog};
use crate::PgDataSource;

/// The current value of a [`Setting`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettingValue {
    pub setting: String,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

/// A server configuration parameter, from `pg_settings`.
#[derive(Debug)]
pub struct Setting {
    name: String,
    value: RwLock<SettingValue>,
}

impl Setting {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> SettingValue {
        self.value.read().clone()
    }
}

impl From<SettingRecord> for Setting {
    fn from(record: SettingRecord) -> Self {
        Self {
            name: record.name,
            value: RwLock::new(SettingValue {
                setting: record.setting,
                unit: record.unit,
                category: record.category,
                description: record.description,
            }),
        }
    }
}

impl CacheObject for Setting {
    fn identity(&self) -> Identity<'_> {
        Identity::Name(&self.name)
    }
}

/// Reads server settings, either all at once or one by name.
pub struct SettingSource {
    catalog: SharedCatalog,
}

impl SettingSource {
    pub(crate) fn new(catalog: SharedCatalog) -> Self {
        Self { catalog }
    }
}

impl CacheSource for SettingSource {
    type Owner = PgDataSource;
    type Record = SettingRecord;
    type Object = Setting;

    fn list_all<'a>(
        &'a self,
        monitor: &'a Monitor,
        _owner: &'a PgDataSource,
    ) -> BoxFuture<'a, Result<Vec<SettingRecord>, ConnectionError>> {
        self.catalog.list_settings(monitor)
    }

    fn construct(&self, _owner: &PgDataSource, record: SettingRecord) -> Option<Setting> {
        Some(record.into())
    }

    fn merge(&self, existing: &Setting, fresh: Setting) {
        *existing.value.write() = fresh.value.into_inner();
    }
}

impl LookupSource for SettingSource {
    fn lookup_one<'a>(
        &'a self,
        monitor: &'a Monitor,
        _owner: &'a PgDataSource,
        identity: Identity<'a>,
    ) -> BoxFuture<'a, Result<Option<SettingRecord>, ConnectionError>> {
        match identity {
            Identity::Name(name) => self.catalog.lookup_setting(monitor, name),
            // settings have no object id
            Identity::Id(_) => Box::pin(future::ready(Ok(None))),
        }
    }
}
