use futures::future::BoxFuture;

use crate::{ConnectionError, Identity, Monitor};

/// An object that can be held in an [`ObjectCache`](crate::ObjectCache).
///
/// Cached objects are shared as `Arc<Self>`. Fields that a refresh may update need
/// interior mutability, since reconciliation keeps the existing instance alive and only
/// merges new state into it.
pub trait CacheObject: Send + Sync + 'static {
    /// The identity under which this object is indexed.
    fn identity(&self) -> Identity<'_>;

    /// Whether this object is known to exist remotely.
    ///
    /// Objects that were created locally and not yet saved return `false`. They are
    /// kept when a remote listing does not contain them.
    fn is_persisted(&self) -> bool {
        true
    }

    /// Called once the object has been dropped from its cache.
    ///
    /// Containers use this to invalidate the caches they own.
    fn evicted(&self) {}
}

/// The Remote Source Adapter of a cache.
///
/// The source knows how to list all objects of one kind for an owner, and how to turn
/// a raw remote record into a cached object.
pub trait CacheSource: Send + Sync + 'static {
    /// The object the cache belongs to.
    ///
    /// The cache does not hold on to its owner, it is passed in by reference whenever
    /// the source has to be queried.
    type Owner: ?Sized + Sync;
    /// One raw record as returned by the remote side.
    type Record: Send;
    /// The cached object constructed from a [`Record`](Self::Record).
    type Object: CacheObject;

    /// Lists all records, in the order the server returns them.
    fn list_all<'a>(
        &'a self,
        monitor: &'a Monitor,
        owner: &'a Self::Owner,
    ) -> BoxFuture<'a, Result<Vec<Self::Record>, ConnectionError>>;

    /// Turns a record into a cached object.
    ///
    /// Returning `None` skips the record.
    fn construct(&self, owner: &Self::Owner, record: Self::Record) -> Option<Self::Object>;

    /// Merges the state of a freshly fetched object into the already cached instance.
    ///
    /// This is used by refreshes, which preserve the identity of unchanged objects.
    /// The default keeps the existing object as it is.
    fn merge(&self, existing: &Self::Object, fresh: Self::Object) {
        let _ = (existing, fresh);
    }
}
