use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt};

use crate::object_cache::{FetchChannel, InFlight, LookupChannel, LookupOutcome};
use crate::utils::defer;
use crate::{CacheError, CacheSource, ConnectionError, Identity, Monitor, ObjectCache};

/// A [`CacheSource`] that can also query a single object.
///
/// Caches over such a source resolve objects by name on demand, without loading the
/// full collection first.
pub trait LookupSource: CacheSource {
    /// Looks up the record of one object.
    ///
    /// Returns `None` if the object does not exist remotely.
    fn lookup_one<'a>(
        &'a self,
        monitor: &'a Monitor,
        owner: &'a Self::Owner,
        identity: Identity<'a>,
    ) -> BoxFuture<'a, Result<Option<Self::Record>, ConnectionError>>;
}

enum LookupRole<T> {
    /// A bulk fetch is in flight, its result will answer the lookup unless it started
    /// before the last invalidation.
    Bulk(FetchChannel<T>, bool),
    /// The same object is already being looked up, in the current generation or not.
    Wait(LookupChannel<T>, bool),
    /// This caller runs the lookup.
    Lead(oneshot::Sender<LookupOutcome<T>>, u64),
}

impl<S: LookupSource> ObjectCache<S> {
    /// Returns one object, querying it remotely if needed.
    ///
    /// Objects that are already cached are returned right away. If the full collection
    /// is loaded, objects not in it do not exist. Otherwise the object is queried
    /// individually and cached on success, which leaves the cache's
    /// [`Freshness`](crate::Freshness) untouched. While a bulk fetch is in flight, its
    /// result is awaited instead.
    ///
    /// A missing object is `Ok(None)` and not an error.
    pub async fn get_object<'a>(
        &'a self,
        monitor: &'a Monitor,
        owner: &'a S::Owner,
        identity: impl Into<Identity<'a>>,
    ) -> Result<Option<Arc<S::Object>>, CacheError> {
        let identity = identity.into();
        let key = self.key(identity);
        let name = self.name();

        let snapshot = self.snapshot();
        if let Some(object) = snapshot.index.get(&key) {
            metric!(counter("caches.memory.hit") += 1, "cache" => name);
            return Ok(Some(Arc::clone(object)));
        }
        if snapshot.complete {
            return Ok(None);
        }

        let (sender, generation) = loop {
            let role = {
                let mut state = self.state.lock();
                let snapshot = self.snapshot();
                if let Some(object) = snapshot.index.get(&key) {
                    return Ok(Some(Arc::clone(object)));
                }
                if snapshot.complete {
                    return Ok(None);
                }

                if let Some(fetch) = &state.fetch {
                    LookupRole::Bulk(fetch.channel.clone(), fetch.generation == state.generation)
                } else if let Some(lookup) = state.lookups.get(&key) {
                    LookupRole::Wait(lookup.channel.clone(), lookup.generation == state.generation)
                } else {
                    let (sender, receiver) = oneshot::channel();
                    let generation = state.generation;
                    state.lookups.insert(
                        key.clone(),
                        InFlight {
                            generation,
                            channel: receiver.shared(),
                        },
                    );
                    LookupRole::Lead(sender, generation)
                }
            };

            match role {
                LookupRole::Bulk(channel, true) => {
                    tracing::trace!(cache = name, %key, "Waiting for bulk fetch to resolve object");
                    let snapshot = self.await_fetch(monitor, channel).await?;
                    return Ok(snapshot.index.get(&key).cloned());
                }
                LookupRole::Bulk(channel, false) => self.await_outdated(monitor, channel).await?,
                LookupRole::Wait(channel, current) => {
                    metric!(counter("caches.lookup.coalesced") += 1, "cache" => name);
                    let outcome = tokio::select! {
                        biased;
                        _ = monitor.cancelled() => Err(CacheError::Cancelled),
                        outcome = channel => outcome.unwrap_or(Err(CacheError::Cancelled)),
                    };
                    if current || monitor.is_cancelled() {
                        return outcome;
                    }
                }
                LookupRole::Lead(sender, generation) => break (sender, generation),
            }
        };

        let guard = defer(|| {
            self.state.lock().lookups.remove(&key);
        });

        metric!(counter("caches.lookup") += 1, "cache" => name);
        tracing::debug!(cache = name, %identity, "Looking up single object");

        let result = if monitor.is_cancelled() {
            Err(CacheError::Cancelled)
        } else {
            tokio::select! {
                biased;
                _ = monitor.cancelled() => Err(CacheError::Cancelled),
                record = self.source().lookup_one(monitor, owner, identity) => {
                    record.map_err(|e| CacheError::remote(&self.config().name, e))
                }
            }
        };
        guard.disarm();

        let outcome = match result {
            Ok(record) => {
                let object = record.and_then(|record| self.source().construct(owner, record));
                Ok(self.commit_lookup(&key, generation, object))
            }
            Err(err) => {
                self.state.lock().lookups.remove(&key);
                Err(err)
            }
        };

        sender.send(outcome.clone()).ok();
        outcome
    }
}
