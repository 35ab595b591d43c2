use futures::future::{BoxFuture, try_join_all};

use crate::{CacheError, CacheObject, CacheSource, Monitor, ObjectCache};

/// A cached object that owns nested caches, like a database owning its schemas.
///
/// Implementations should also clear their nested caches in
/// [`CacheObject::evicted`], so that invalidating a parent entry propagates downwards.
/// Entries that survive a reconciliation are not evicted, and keep their nested caches.
pub trait CacheContainer: CacheObject {
    /// Loads the nested caches of this object, `depth` levels deep.
    ///
    /// A `depth` of `0` loads nothing.
    fn cache_structure<'a>(
        &'a self,
        monitor: &'a Monitor,
        depth: u32,
    ) -> BoxFuture<'a, Result<(), CacheError>>;
}

impl<S> ObjectCache<S>
where
    S: CacheSource,
    S::Object: CacheContainer,
{
    /// Eagerly loads this cache and the caches nested in its objects.
    ///
    /// A `depth` of `1` only loads this cache, every additional level descends into
    /// the nested caches of each object. Nested caches of sibling objects are loaded
    /// concurrently.
    pub async fn cache_structure(
        &self,
        monitor: &Monitor,
        owner: &S::Owner,
        depth: u32,
    ) -> Result<(), CacheError> {
        if depth == 0 {
            return Ok(());
        }

        let objects = self.get_all_objects(monitor, owner).await?;
        if depth > 1 {
            try_join_all(
                objects
                    .iter()
                    .map(|object| object.cache_structure(monitor, depth - 1)),
            )
            .await?;
        }
        Ok(())
    }
}
