//! Exposes the command line application.
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dbmeta_cache::{Monitor, metrics};
use dbmeta_postgres::{PgDataSource, SnapshotCatalog};

use crate::config::{Config, Metrics};
use crate::logging;
use crate::output;

/// Browses the metadata of a PostgreSQL server.
///
/// The server is described by a catalog snapshot, a YAML file listing its databases,
/// schemas, tables and settings.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// The catalog snapshot to read, overrides the configured one.
    #[arg(long, global = true, value_name = "FILE")]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Lists the databases of the server.
    ///
    /// The active database is marked with `*`.
    Databases,

    /// Shows the server settings, or a single setting.
    Settings {
        /// The setting to show. Names are case insensitive.
        name: Option<String>,
    },

    /// Prints the tree of databases, schemas and tables.
    Tree {
        /// How many levels to read: databases, schemas, tables.
        #[arg(long, short, default_value_t = 3)]
        depth: u32,
    },
}

fn configure_metrics(config: &Metrics) -> Result<()> {
    let Some(statsd) = &config.statsd else {
        return Ok(());
    };

    let mut tags: BTreeMap<String, String> = config.custom_tags.clone();
    let hostname = config.hostname_tag.clone().and_then(|tag| {
        hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .map(|name| (tag, name))
    });
    tags.extend(hostname);

    metrics::configure_statsd(&config.prefix, statsd.as_str(), tags)
        .context("failed to configure statsd")
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config.as_deref()).context("failed loading config")?;

    // SAFETY: no other threads are running yet, the runtime is started below.
    unsafe { logging::init_logging(&config) };
    configure_metrics(&config.metrics)?;

    let Some(path) = cli.catalog.as_ref().or(config.catalog.as_ref()) else {
        bail!("no catalog snapshot given, pass --catalog or set `catalog` in the config");
    };
    let catalog = SnapshotCatalog::from_path(path)
        .with_context(|| format!("failed to load catalog snapshot {}", path.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;
    runtime.block_on(run(cli.command, config, catalog))
}

async fn run(command: Command, config: Config, catalog: SnapshotCatalog) -> Result<()> {
    let monitor = Monitor::new();
    tokio::spawn({
        let monitor = monitor.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, cancelling");
                monitor.cancel();
            }
        }
    });

    let datasource = PgDataSource::new(config.connection, Arc::new(catalog));
    datasource
        .initialize(&monitor)
        .await
        .context("failed to initialize the data source")?;
    if config.preload_depth > 0 {
        datasource
            .cache_structure(&monitor, config.preload_depth)
            .await
            .context("failed to preload metadata")?;
    }

    match command {
        Command::Databases => {
            let active = datasource.default_instance()?;
            output::databases_table(&datasource.databases(), active.name()).printstd();
        }
        Command::Settings { name: Some(name) } => {
            let setting = datasource
                .get_setting(&monitor, &name)
                .await
                .context("failed to read settings")?;
            match setting {
                Some(setting) => output::setting_details(&setting).printstd(),
                None => bail!("unrecognized configuration parameter \"{name}\""),
            }
        }
        Command::Settings { name: None } => {
            let settings = datasource
                .settings(&monitor)
                .await
                .context("failed to read settings")?;
            output::settings_table(&settings).printstd();
        }
        Command::Tree { depth } => {
            datasource
                .cache_structure(&monitor, depth)
                .await
                .context("failed to read the metadata tree")?;
            print!("{}", output::render_tree(&datasource.databases()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["dbmeta", "tree", "--depth", "2", "-c", "dbmeta.yml"]).unwrap();
        assert!(matches!(cli.command, Command::Tree { depth: 2 }));
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("dbmeta.yml")));

        let cli = Cli::try_parse_from(["dbmeta", "--catalog", "snap.yaml", "settings", "work_mem"])
            .unwrap();
        assert!(matches!(cli.command, Command::Settings { name: Some(ref n) } if n == "work_mem"));
        assert!(cli.catalog.is_some());

        let cli = Cli::try_parse_from(["dbmeta", "tree"]).unwrap();
        assert!(matches!(cli.command, Command::Tree { depth: 3 }));
    }
}
