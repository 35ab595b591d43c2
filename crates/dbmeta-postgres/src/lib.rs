//! The PostgreSQL metadata model, built on [`dbmeta_cache`].
//!
//! A [`PgDataSource`] caches the databases of one server, each [`Database`] caches its
//! schemas, and each [`Schema`] its tables. Server settings are held in a lookup cache,
//! so a single setting can be resolved without reading `pg_settings` as a whole.
//!
//! All remote access goes through the [`Catalog`] trait.

mod catalog;
mod config;
mod database;
mod datasource;
mod error;
mod schema;
mod setting;
mod snapshot;

pub use catalog::*;
pub use config::*;
pub use database::*;
pub use datasource::*;
pub use error::*;
pub use schema::*;
pub use setting::*;
pub use snapshot::*;
