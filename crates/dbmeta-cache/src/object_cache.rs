use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::reconcile::{self, ChangeListener, ChangeSet};
use crate::utils::defer;
use crate::{CacheConfig, CacheError, CacheObject, CacheSource, Identity, Monitor, ObjectKey};

/// What a cache knows about the completeness of its contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// The full collection was never fetched, or the cache was cleared.
    Empty,
    /// A bulk fetch of the full collection is in flight.
    Loading,
    /// The full collection is memoized and authoritative until invalidated.
    Loaded,
}

/// An immutable view of the cached objects.
///
/// Readers clone the `Arc` of the current snapshot, writers build a new one and swap it
/// in, so a reader never observes a half-updated index.
pub(crate) struct Snapshot<T> {
    pub entries: Vec<Arc<T>>,
    pub index: FxHashMap<ObjectKey, Arc<T>>,
    /// Set when `entries` is the full remote collection.
    pub complete: bool,
}

impl<T: CacheObject> Snapshot<T> {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            index: FxHashMap::default(),
            complete: false,
        }
    }

    /// Builds the index for `entries`, which must not contain duplicate keys.
    fn new(config: &CacheConfig, entries: Vec<Arc<T>>, complete: bool) -> Self {
        let index = entries
            .iter()
            .map(|object| (config.key_policy.key(object.identity()), Arc::clone(object)))
            .collect();
        Self {
            entries,
            index,
            complete,
        }
    }
}

pub(crate) type FetchOutcome<T> = Result<Arc<Snapshot<T>>, CacheError>;
pub(crate) type FetchChannel<T> = Shared<oneshot::Receiver<FetchOutcome<T>>>;

pub(crate) type LookupOutcome<T> = Result<Option<Arc<T>>, CacheError>;
pub(crate) type LookupChannel<T> = Shared<oneshot::Receiver<LookupOutcome<T>>>;

/// A fetch or lookup in flight, tagged with the generation it started in.
pub(crate) struct InFlight<C> {
    pub generation: u64,
    pub channel: C,
}

pub(crate) struct State<T> {
    pub freshness: Freshness,
    /// Bumped by every `clear_cache` and `set_cache`.
    ///
    /// A fetch that started under an older generation must not commit its result.
    pub generation: u64,
    /// The one bulk fetch that may be in flight.
    pub fetch: Option<InFlight<FetchChannel<T>>>,
    /// In-flight targeted lookups, by key.
    pub lookups: BTreeMap<ObjectKey, InFlight<LookupChannel<T>>>,
}

/// How the result of a bulk fetch is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommitMode {
    /// A plain load, no change notifications are sent.
    Load,
    /// A refresh, the resulting changes are sent to the listener.
    Refresh,
}

struct FetchLead<T> {
    sender: oneshot::Sender<FetchOutcome<T>>,
    generation: u64,
    prior: Freshness,
}

enum FetchRole<T> {
    Ready(Arc<Snapshot<T>>),
    Wait(FetchChannel<T>),
    /// A fetch from before the last invalidation still holds the slot.
    Outdated(FetchChannel<T>),
    Lead(FetchLead<T>),
}

/// A lazily populated, memoized collection of remote objects belonging to one owner.
///
/// The full collection is fetched through the [`CacheSource`] on first use, and then
/// served from memory until the cache is cleared. Concurrent callers that arrive while
/// a fetch is in flight wait for that same fetch instead of issuing another one.
///
/// The internal lock is only held to flip state and to commit results, never while the
/// source is being queried.
pub struct ObjectCache<S: CacheSource> {
    config: CacheConfig,
    source: S,
    listener: Option<Arc<dyn ChangeListener<S::Object>>>,
    pub(crate) state: Mutex<State<S::Object>>,
    snapshot: RwLock<Arc<Snapshot<S::Object>>>,
}

impl<S: CacheSource> fmt::Debug for ObjectCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let freshness = self.state.try_lock().map(|state| state.freshness);
        f.debug_struct("ObjectCache")
            .field("name", &self.config.name)
            .field("freshness", &freshness)
            .field("objects", &self.snapshot.read().entries.len())
            .finish()
    }
}

impl<S: CacheSource> ObjectCache<S> {
    /// Creates a new, empty cache.
    pub fn new(config: CacheConfig, source: S) -> Self {
        Self {
            config,
            source,
            listener: None,
            state: Mutex::new(State {
                freshness: Freshness::Empty,
                generation: 0,
                fetch: None,
                lookups: BTreeMap::new(),
            }),
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }

    /// Sets the listener that is notified about the changes of refreshes and
    /// reconciliations.
    pub fn with_listener<L>(mut self, listener: L) -> Self
    where
        L: ChangeListener<S::Object> + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// The name of this cache.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The configuration of this cache.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The source this cache is filled from.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The current [`Freshness`].
    pub fn freshness(&self) -> Freshness {
        self.state.lock().freshness
    }

    /// Whether the full collection is memoized.
    pub fn is_fully_cached(&self) -> bool {
        self.snapshot().complete
    }

    pub(crate) fn snapshot(&self) -> Arc<Snapshot<S::Object>> {
        Arc::clone(&self.snapshot.read())
    }

    pub(crate) fn key(&self, identity: Identity<'_>) -> ObjectKey {
        self.config.key_policy.key(identity)
    }

    /// Returns the memoized collection without contacting the remote source.
    ///
    /// Unless the full collection has been loaded, this is empty.
    pub fn get_cached_objects(&self) -> Vec<Arc<S::Object>> {
        let snapshot = self.snapshot();
        if snapshot.complete {
            snapshot.entries.clone()
        } else {
            Vec::new()
        }
    }

    /// Looks up a single memoized object.
    ///
    /// This never contacts the remote source, and also finds objects that were
    /// resolved individually before the full collection was loaded.
    pub fn get_cached_object<'a>(&self, identity: impl Into<Identity<'a>>) -> Option<Arc<S::Object>> {
        let key = self.key(identity.into());
        self.snapshot().index.get(&key).cloned()
    }

    /// Returns the full collection, fetching it if it is not memoized yet.
    ///
    /// # Errors
    ///
    /// Fails with [`CacheError::RemoteFetch`] if the source fails, and with
    /// [`CacheError::Cancelled`] if `monitor` is cancelled. In both cases the cache
    /// is left in the state it had before the fetch.
    pub async fn get_all_objects(
        &self,
        monitor: &Monitor,
        owner: &S::Owner,
    ) -> Result<Vec<Arc<S::Object>>, CacheError> {
        let name = self.name();
        metric!(counter("caches.access") += 1, "cache" => name);

        let snapshot = loop {
            // fast path, without touching the state lock
            let snapshot = self.snapshot();
            let role = if snapshot.complete {
                FetchRole::Ready(snapshot)
            } else {
                self.begin_fetch(false)
            };

            match role {
                FetchRole::Ready(snapshot) => {
                    metric!(counter("caches.memory.hit") += 1, "cache" => name);
                    tracing::trace!(cache = name, "Serving objects from memory");
                    break snapshot;
                }
                FetchRole::Wait(channel) => break self.await_fetch(monitor, channel).await?,
                FetchRole::Outdated(channel) => self.await_outdated(monitor, channel).await?,
                FetchRole::Lead(lead) => {
                    break self
                        .run_fetch(monitor, owner, lead, CommitMode::Load)
                        .await?
                        .0;
                }
            }
        };

        Ok(snapshot.entries.clone())
    }

    /// Fetches the full collection again and reconciles it into the cache.
    ///
    /// Objects that are still present keep their identity, the returned [`ChangeSet`]
    /// is also sent to the listener. If another fetch is in flight, this waits for it
    /// to finish first.
    pub async fn refresh_objects(
        &self,
        monitor: &Monitor,
        owner: &S::Owner,
    ) -> Result<ChangeSet<S::Object>, CacheError> {
        loop {
            match self.begin_fetch(true) {
                FetchRole::Ready(_) => unreachable!("forced fetches are never ready"),
                FetchRole::Wait(channel) => {
                    self.await_fetch(monitor, channel).await?;
                }
                FetchRole::Outdated(channel) => self.await_outdated(monitor, channel).await?,
                FetchRole::Lead(lead) => {
                    let (_, changes) = self
                        .run_fetch(monitor, owner, lead, CommitMode::Refresh)
                        .await?;
                    return Ok(changes.unwrap_or_default());
                }
            }
        }
    }

    /// Decides whether the caller serves from memory, waits for the in-flight fetch,
    /// or leads a new one.
    fn begin_fetch(&self, force: bool) -> FetchRole<S::Object> {
        let mut state = self.state.lock();

        if !force {
            let snapshot = self.snapshot();
            if snapshot.complete {
                return FetchRole::Ready(snapshot);
            }
        }

        if let Some(fetch) = &state.fetch {
            let channel = fetch.channel.clone();
            return if fetch.generation == state.generation {
                FetchRole::Wait(channel)
            } else {
                FetchRole::Outdated(channel)
            };
        }

        let (sender, receiver) = oneshot::channel();
        state.fetch = Some(InFlight {
            generation: state.generation,
            channel: receiver.shared(),
        });

        let prior = state.freshness;
        if prior == Freshness::Empty {
            state.freshness = Freshness::Loading;
        }

        FetchRole::Lead(FetchLead {
            sender,
            generation: state.generation,
            prior,
        })
    }

    pub(crate) async fn await_fetch(
        &self,
        monitor: &Monitor,
        channel: FetchChannel<S::Object>,
    ) -> FetchOutcome<S::Object> {
        metric!(counter("caches.fetch.coalesced") += 1, "cache" => self.name());
        tokio::select! {
            biased;
            _ = monitor.cancelled() => Err(CacheError::Cancelled),
            // the sender is dropped without a result if the leading task went away
            outcome = channel => outcome.unwrap_or(Err(CacheError::Cancelled)),
        }
    }

    /// Waits for a fetch that started before the cache was invalidated.
    ///
    /// Its outcome is not for this caller, who starts over once the fetch slot is free.
    pub(crate) async fn await_outdated(
        &self,
        monitor: &Monitor,
        channel: FetchChannel<S::Object>,
    ) -> Result<(), CacheError> {
        tracing::trace!(cache = self.name(), "Waiting for an outdated fetch to finish");
        match self.await_fetch(monitor, channel).await {
            Err(err) if err.is_cancelled() && monitor.is_cancelled() => Err(err),
            _ => Ok(()),
        }
    }

    async fn run_fetch(
        &self,
        monitor: &Monitor,
        owner: &S::Owner,
        lead: FetchLead<S::Object>,
        mode: CommitMode,
    ) -> Result<(Arc<Snapshot<S::Object>>, Option<ChangeSet<S::Object>>), CacheError> {
        let FetchLead {
            sender,
            generation,
            prior,
        } = lead;
        let name = self.name();

        // Dropping this future mid-fetch also drops `sender`, which wakes up the waiters.
        let guard = defer(|| self.abort_fetch(generation, prior));

        monitor.begin_task(&format!("Load {name}"));
        metric!(counter("caches.fetch") += 1, "cache" => name);
        tracing::debug!(cache = name, ?mode, "Fetching all objects");
        let start = Instant::now();

        let result = if monitor.is_cancelled() {
            Err(CacheError::Cancelled)
        } else {
            tokio::select! {
                biased;
                _ = monitor.cancelled() => Err(CacheError::Cancelled),
                records = self.source.list_all(monitor, owner) => {
                    records.map_err(|e| CacheError::remote(&self.config.name, e))
                }
            }
        };
        guard.disarm();
        metric!(timer("caches.fetch.duration") = start.elapsed(), "cache" => name);

        let records = match result {
            Ok(records) => records,
            Err(err) => {
                self.abort_fetch(generation, prior);
                if !err.is_cancelled() {
                    metric!(counter("caches.fetch.failed") += 1, "cache" => name);
                }
                tracing::debug!(cache = name, error = %err, "Fetching objects failed");
                sender.send(Err(err.clone())).ok();
                return Err(err);
            }
        };

        let objects: Vec<_> = records
            .into_iter()
            .filter_map(|record| self.source.construct(owner, record))
            .collect();
        monitor.worked(objects.len() as u64);

        let (snapshot, changes) = self.commit_fetch(generation, objects);
        sender.send(Ok(Arc::clone(&snapshot))).ok();

        if let Some(changes) = &changes {
            evict(&changes.removed);
            if mode == CommitMode::Refresh {
                self.notify(changes);
            }
        }

        Ok((snapshot, changes))
    }

    /// Releases the fetch slot after a failed or abandoned fetch.
    fn abort_fetch(&self, generation: u64, prior: Freshness) {
        let mut state = self.state.lock();
        state.fetch = None;
        if state.generation == generation {
            state.freshness = prior;
        }
    }

    /// Commits the result of a bulk fetch, unless the cache was invalidated meanwhile.
    ///
    /// Returns the new snapshot and the applied changes. A discarded result is still
    /// returned as an uncommitted snapshot, without changes.
    fn commit_fetch(
        &self,
        generation: u64,
        objects: Vec<S::Object>,
    ) -> (Arc<Snapshot<S::Object>>, Option<ChangeSet<S::Object>>) {
        let name = self.name();
        let mut state = self.state.lock();
        state.fetch = None;

        if state.generation != generation {
            metric!(counter("caches.fetch.discarded") += 1, "cache" => name);
            tracing::warn!(cache = name, "Discarding objects of an outdated fetch");
            let (entries, _) = reconcile::reconcile(self.config.key_policy, &[], objects, |_, _| {});
            return (Arc::new(Snapshot::new(&self.config, entries, false)), None);
        }

        let current = self.snapshot();
        let (entries, changes) =
            reconcile::reconcile(self.config.key_policy, &current.entries, objects, |existing, fresh| {
                self.source.merge(existing, fresh)
            });
        tracing::debug!(cache = name, objects = entries.len(), ?changes, "Committing objects");

        let snapshot = Arc::new(Snapshot::new(&self.config, entries, true));
        *self.snapshot.write() = Arc::clone(&snapshot);
        state.freshness = Freshness::Loaded;
        metric!(gauge("caches.objects") = snapshot.entries.len() as u64, "cache" => name);

        (snapshot, Some(changes))
    }

    /// Replaces the whole collection administratively.
    ///
    /// This is used when the full list was obtained in some other way. The cache is
    /// [`Loaded`](Freshness::Loaded) afterwards, and a fetch that is still in flight will
    /// not overwrite it.
    pub fn set_cache(&self, objects: Vec<S::Object>) {
        let (entries, _) = reconcile::reconcile(self.config.key_policy, &[], objects, |_, _| {});
        let previous = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.freshness = Freshness::Loaded;
            let snapshot = Arc::new(Snapshot::new(&self.config, entries, true));
            std::mem::replace(&mut *self.snapshot.write(), snapshot)
        };
        evict(&previous.entries);
    }

    /// Drops all cached objects, the cache is [`Empty`](Freshness::Empty) afterwards.
    ///
    /// A fetch that is in flight is not cancelled, but its result will be discarded.
    /// Callers arriving after the clear wait for it to finish and then fetch anew.
    pub fn clear_cache(&self) {
        let previous = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.freshness = Freshness::Empty;
            std::mem::replace(&mut *self.snapshot.write(), Arc::new(Snapshot::empty()))
        };
        tracing::debug!(cache = self.name(), objects = previous.entries.len(), "Cleared cache");
        evict(&previous.entries);
    }

    /// Merges a full, authoritative listing into the cache.
    ///
    /// Objects present before and in `objects` keep their instance, with `merge`
    /// applied to update their state. The cache follows the order of `objects` and is
    /// [`Loaded`](Freshness::Loaded) afterwards. The changes are also sent to the listener.
    pub fn reconcile<M>(&self, objects: Vec<S::Object>, merge: M) -> ChangeSet<S::Object>
    where
        M: FnMut(&S::Object, S::Object),
    {
        let changes = {
            let mut state = self.state.lock();
            let current = self.snapshot();
            let (entries, changes) =
                reconcile::reconcile(self.config.key_policy, &current.entries, objects, merge);
            *self.snapshot.write() = Arc::new(Snapshot::new(&self.config, entries, true));
            state.freshness = Freshness::Loaded;
            changes
        };

        metric!(counter("caches.reconcile.added") += changes.added.len() as i64, "cache" => self.name());
        metric!(counter("caches.reconcile.removed") += changes.removed.len() as i64, "cache" => self.name());

        evict(&changes.removed);
        self.notify(&changes);
        changes
    }

    /// Adds a single object, typically one that was just created locally.
    ///
    /// # Errors
    ///
    /// Fails with [`CacheError::Conflict`] if an object with the same key is cached.
    pub fn cache_object(&self, object: S::Object) -> Result<Arc<S::Object>, CacheError> {
        let _state = self.state.lock();
        let current = self.snapshot();

        let key = self.key(object.identity());
        if current.index.contains_key(&key) {
            return Err(CacheError::Conflict { key });
        }

        let object = Arc::new(object);
        let mut entries = current.entries.clone();
        entries.push(Arc::clone(&object));
        *self.snapshot.write() = Arc::new(Snapshot::new(&self.config, entries, current.complete));

        Ok(object)
    }

    /// Removes a single object from the cache.
    pub fn remove_object<'a>(&self, identity: impl Into<Identity<'a>>) -> Option<Arc<S::Object>> {
        let key = self.key(identity.into());
        let removed = {
            let _state = self.state.lock();
            let current = self.snapshot();
            let removed = current.index.get(&key).cloned()?;

            let entries = current
                .entries
                .iter()
                .filter(|object| !Arc::ptr_eq(object, &removed))
                .cloned()
                .collect();
            *self.snapshot.write() = Arc::new(Snapshot::new(&self.config, entries, current.complete));
            removed
        };
        removed.evicted();
        Some(removed)
    }

    /// Sorts the cached objects.
    pub fn sort_objects<F>(&self, mut compare: F)
    where
        F: FnMut(&S::Object, &S::Object) -> Ordering,
    {
        let _state = self.state.lock();
        let current = self.snapshot();
        let mut entries = current.entries.clone();
        entries.sort_by(|a, b| compare(a, b));
        *self.snapshot.write() = Arc::new(Snapshot::new(&self.config, entries, current.complete));
    }

    /// Inserts the result of a targeted lookup.
    ///
    /// If an object with the same key got cached in the meantime, that one is returned
    /// instead. If the cache was invalidated or fully loaded since the lookup started,
    /// the object is returned without being cached.
    pub(crate) fn commit_lookup(
        &self,
        requested: &ObjectKey,
        generation: u64,
        object: Option<S::Object>,
    ) -> Option<Arc<S::Object>> {
        let mut state = self.state.lock();
        state.lookups.remove(requested);

        let object = object?;
        let key = self.key(object.identity());
        let current = self.snapshot();
        if let Some(existing) = current.index.get(&key) {
            return Some(Arc::clone(existing));
        }

        let object = Arc::new(object);
        if state.generation != generation {
            tracing::debug!(cache = self.name(), %key, "Not caching object of an outdated lookup");
            return Some(object);
        }
        if current.complete {
            // a bulk fetch committed meanwhile and did not list the object
            tracing::debug!(cache = self.name(), %key, "Not caching object missing from the listing");
            return Some(object);
        }

        let mut entries = current.entries.clone();
        entries.push(Arc::clone(&object));
        *self.snapshot.write() = Arc::new(Snapshot::new(&self.config, entries, current.complete));
        Some(object)
    }

    fn notify(&self, changes: &ChangeSet<S::Object>) {
        if let Some(listener) = &self.listener {
            listener.objects_changed(changes);
        }
    }
}

fn evict<T: CacheObject>(objects: &[Arc<T>]) {
    for object in objects {
        object.evicted();
    }
}
