//! Helpers for testing the caches and the data source models.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Use a [`Gate`] to hold a fake remote query in flight while the test inspects the cache,
//!    instead of relying on sleeps.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `dbmeta` crates and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new(
            "dbmeta=trace,dbmeta_cache=trace,dbmeta_postgres=trace",
        ))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Returns the absolute path to the given fixture.
///
/// Fixtures are located in the `tests/fixtures` directory, located from the workspace root.
///
/// # Panics
///
/// Panics if the fixture path does not exist on the file system.
pub fn fixture(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();

    let mut full_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    full_path.pop(); // to /crates/
    full_path.pop(); // to /
    full_path.push("./tests/fixtures/");
    full_path.push(path);

    assert!(full_path.exists(), "'{}' does not exist", path.display());

    full_path
}

/// Returns the contents of a fixture as a string.
///
/// # Panics
///
/// Panics if the fixture does not exist or cannot be read.
pub fn read_fixture(path: impl AsRef<Path>) -> String {
    std::fs::read_to_string(fixture(path)).unwrap()
}

/// A gate that holds waiters until it is opened.
///
/// Clones share the same gate. Once opened, the gate stays open.
#[derive(Clone, Debug)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Gate {
    /// Creates a closed gate.
    pub fn closed() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Waits until the gate is opened.
    pub async fn pass(&self) {
        // The semaphore is closed by `open`, which fails every acquire right away.
        let _ = self.permits.acquire().await;
    }

    /// Opens the gate for all current and future waiters.
    pub fn open(&self) {
        self.permits.close();
    }

    /// Whether the gate has been opened.
    pub fn is_open(&self) -> bool {
        self.permits.is_closed()
    }
}
