use serde::Deserialize;

use crate::catalog::DatabaseFilter;

/// The database to connect to if nothing else is configured.
pub const DEFAULT_DATABASE: &str = "postgres";

/// Connection settings of a PostgreSQL data source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// A connection URL, like `jdbc:postgresql://localhost:5432/app`.
    pub url: Option<String>,
    /// The database to use, takes precedence over the one in `url`.
    pub database: Option<String>,
    /// Read the list of all databases on the server.
    ///
    /// Otherwise, only the active database is shown.
    pub read_database_list: bool,
    /// Also list template databases.
    pub show_templates: bool,
    /// Also list databases that do not allow connections.
    pub show_unavailable: bool,
}

impl ConnectionConfig {
    /// The explicitly configured database name, if any.
    ///
    /// This is the `database` setting, or the last path segment of `url`.
    pub fn configured_database(&self) -> Option<String> {
        let name = match (&self.database, &self.url) {
            (Some(database), _) if !database.is_empty() => database.clone(),
            (_, Some(url)) => database_from_url(url)?.to_owned(),
            _ => return None,
        };
        Some(name)
    }

    /// The filter applied when reading the database list.
    pub fn database_filter(&self) -> DatabaseFilter {
        DatabaseFilter {
            show_templates: self.show_templates,
            show_unavailable: self.show_unavailable,
            include: self.database.clone().filter(|name| !name.is_empty()),
        }
    }
}

/// Extracts the database name from the path of a connection URL.
///
/// The name ends before the first character that cannot be part of an unquoted
/// identifier, which cuts off query parameters.
fn database_from_url(url: &str) -> Option<&str> {
    let (_, path) = url.rsplit_once('/')?;
    let end = path
        .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '$' | '.')))
        .unwrap_or(path.len());
    Some(&path[..end]).filter(|name| !name.is_empty())
}
