//! Lazily loaded, memoized caches of remote database metadata.
//!
//! An [`ObjectCache`] holds one collection of metadata objects (databases, settings,
//! schemas, tables, ...) that belongs to some owner. The collection is fetched from the
//! remote side through a [`CacheSource`] at most once until it is invalidated, and
//! concurrent callers are coalesced onto a single in-flight fetch.
//!
//! The caches can be composed:
//!
//! - [`LookupSource`] adds targeted single-object queries, so that one object can be
//!   resolved by name without listing everything.
//! - [`CacheContainer`] marks objects that own nested caches of their own, which are
//!   invalidated together with their parent entry and can be preloaded recursively.

#![warn(missing_docs)]

#[macro_use]
pub mod metrics;

mod composite;
mod config;
mod error;
mod key;
mod lookup;
mod monitor;
mod object_cache;
mod reconcile;
mod source;
mod utils;

pub use composite::*;
pub use config::*;
pub use error::*;
pub use key::*;
pub use lookup::*;
pub use monitor::*;
pub use object_cache::*;
pub use reconcile::{ChangeListener, ChangeSet};
pub use source::*;
