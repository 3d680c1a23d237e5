//! Connection settings.
//!
//! Settings name the store connections schemas refer to. They are read from TOML, one
//! table per connection:
//!
//! ```toml
//! [default]
//! connection_string = "mongodb://localhost:27017/"
//! database_name = "app"
//!
//! [archive]
//! connection_string = "mongodb://archive.internal:27017/"
//! ```

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    schema::DEFAULT_CONNECTION,
};

/// Settings of one named connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub connection_string: String,
    #[serde(default = "default_database_name")]
    pub database_name: String,
}

fn default_database_name() -> String {
    "default_database".to_string()
}

impl ConnectionSettings {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            database_name: default_database_name(),
        }
    }

    pub fn database_name(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = database_name.into();
        self
    }
}

/// Named connection settings. A `default` connection is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    connections: BTreeMap<String, ConnectionSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connections: BTreeMap::from([(
                DEFAULT_CONNECTION.to_string(),
                ConnectionSettings::new("mongodb://localhost:27017/"),
            )]),
        }
    }
}

impl Settings {
    /// File looked up when [`Settings::load`] is given a directory.
    pub const FILE_NAME: &'static str = "docspec.toml";

    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::Definition`] for malformed TOML or a missing `default`
    /// connection.
    pub fn from_toml_str(text: &str) -> DocumentStoreResult<Self> {
        let settings: Settings = toml::from_str(text)?;

        if !settings.connections.contains_key(DEFAULT_CONNECTION) {
            return Err(DocumentStoreError::Definition(format!(
                "settings must declare a '{DEFAULT_CONNECTION}' connection"
            )));
        }

        Ok(settings)
    }

    /// Reads settings from a file, or from `docspec.toml` inside a directory.
    pub fn load(path: impl AsRef<Path>) -> DocumentStoreResult<Self> {
        let path = path.as_ref();
        let file: PathBuf = match path.is_dir() {
            true => path.join(Self::FILE_NAME),
            false => path.to_path_buf(),
        };

        debug!(path = %file.display(), "loading connection settings");
        let text = std::fs::read_to_string(&file)?;

        Self::from_toml_str(&text)
    }

    /// Adds or replaces a connection.
    pub fn with_connection(mut self, name: impl Into<String>, settings: ConnectionSettings) -> Self {
        self.connections.insert(name.into(), settings);
        self
    }

    pub fn connection(&self, name: &str) -> DocumentStoreResult<&ConnectionSettings> {
        self.connections
            .get(name)
            .ok_or_else(|| DocumentStoreError::Definition(format!("unknown connection '{name}'")))
    }

    pub fn connections(&self) -> impl Iterator<Item = (&str, &ConnectionSettings)> {
        self.connections
            .iter()
            .map(|(name, settings)| (name.as_str(), settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_connections() {
        let settings = Settings::from_toml_str(
            r#"
            [default]
            connection_string = "mongodb://db:27017/"
            database_name = "app"

            [archive]
            connection_string = "mongodb://archive:27017/"
            "#,
        )
        .unwrap();

        assert_eq!(settings.connection("default").unwrap().database_name, "app");
        assert_eq!(settings.connection("archive").unwrap().database_name, "default_database");
        assert_eq!(settings.connections().count(), 2);
    }

    #[test]
    fn requires_a_default_connection() {
        let result = Settings::from_toml_str("[other]\nconnection_string = \"mongodb://x/\"\n");
        assert!(matches!(result, Err(DocumentStoreError::Definition(_))));
    }

    #[test]
    fn rejects_entries_without_a_connection_string() {
        assert!(Settings::from_toml_str("[default]\ndatabase_name = \"app\"\n").is_err());
    }

    #[test]
    fn loads_from_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(Settings::FILE_NAME),
            "[default]\nconnection_string = \"mongodb://db:27017/\"\n",
        )
        .unwrap();

        let settings = Settings::load(dir.path()).unwrap();
        assert_eq!(settings.connection("default").unwrap().connection_string, "mongodb://db:27017/");
        assert!(matches!(
            Settings::load(dir.path().join("missing.toml")),
            Err(DocumentStoreError::Initialization(_)),
        ));
    }

    #[test]
    fn default_points_at_a_local_server() {
        let settings = Settings::default();
        assert_eq!(settings.connection("default").unwrap().connection_string, "mongodb://localhost:27017/");
    }
}
