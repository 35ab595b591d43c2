//! dbmeta.
//!
//! A command line browser for the metadata of a PostgreSQL server: its databases, their schemas
//! and tables, and the server settings. Metadata is read lazily, one level at a time, and cached
//! for the lifetime of the process.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod config;
mod logging;
mod output;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
