use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File names searched for in every directory from the working directory up.
pub const CONFIG_FILE_NAMES: [&str; 6] = [
    "redis-memory-server.json",
    ".redis-memory-server.json",
    "redis-memory-server.yaml",
    ".redis-memory-server.yaml",
    "redis-memory-server.yml",
    ".redis-memory-server.yml",
];

/// Keys whose relative values are resolved against the config file's directory.
const PATH_KEYS: [&str; 2] = ["downloadDir", "systemBinary"];

/// Options read from project configuration files.
///
/// Keys are camelCase (`downloadDir`, `systemBinary`, `version`, ...), values
/// are kept as strings. Booleans and numbers are stringified so `true` and
/// `"true"` behave the same.
///
/// # Examples
///
/// ```
/// use redis_memory_server::config::ProjectConfig;
///
/// let config = ProjectConfig::parse_from_str(r#"{ "version": "7.2.4" }"#).unwrap();
/// assert_eq!(config.get("version"), Some("7.2.4"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectConfig {
    values: HashMap<String, String>,
}

impl ProjectConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a file path.
    ///
    /// Files ending in `.yaml`/`.yml` are parsed as YAML, everything else as
    /// JSON. Relative `downloadDir` and `systemBinary` values are resolved
    /// against the directory holding the file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The contents are not a JSON/YAML mapping
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let mut config = if is_yaml {
            Self::parse_from_yaml_str(&content)?
        } else {
            Self::parse_from_str(&content)?
        };

        if let Some(dir) = path.parent() {
            config.resolve_relative_paths(dir);
        }
        Ok(config)
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))?;
        Self::from_value(value)
    }

    /// Parses a configuration from a YAML string.
    pub fn parse_from_yaml_str(content: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse YAML config: {}", e)))?;
        Self::from_value(value)
    }

    fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::ConfigParse(
                "Configuration must be a mapping of option names to values".to_string(),
            ));
        };

        let mut values = HashMap::new();
        for (key, value) in map {
            let value = match value {
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::Null => continue,
                other => {
                    return Err(Error::ConfigParse(format!(
                        "Option '{}' must be a string, number or boolean, got {}",
                        key, other
                    )));
                }
            };
            values.insert(key, value);
        }
        Ok(Self { values })
    }

    /// Walks up from `start`, merging every configuration file found.
    ///
    /// Files closer to `start` take precedence key by key. Unreadable or
    /// malformed files are skipped with a warning.
    pub fn discover(start: &Path) -> Self {
        let mut merged = Self::new();
        for path in Self::find_files(start) {
            match Self::from_file(&path) {
                Ok(found) => {
                    tracing::debug!(path = %path.display(), "Found project configuration");
                    merged.merge_defaults(found);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring project configuration");
                }
            }
        }
        merged
    }

    /// Lists configuration files from `start` upwards, nearest first.
    pub fn find_files(start: &Path) -> Vec<PathBuf> {
        start
            .ancestors()
            .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
            .filter(|candidate| candidate.is_file())
            .collect()
    }

    /// Fills keys missing from `self` with the values of `other`.
    pub fn merge_defaults(&mut self, other: ProjectConfig) {
        for (key, value) in other.values {
            self.values.entry(key).or_insert(value);
        }
    }

    /// Gets a value by camelCase key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Sets a value by camelCase key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Number of options present.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no options are present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        for key in PATH_KEYS {
            if let Some(value) = self.values.get_mut(key) {
                let path = Path::new(value.as_str());
                if path.is_relative() && !value.is_empty() {
                    *value = base.join(path).to_string_lossy().into_owned();
                }
            }
        }
    }
}
