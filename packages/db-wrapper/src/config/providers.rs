//! Configuration providers that hand out [`LockedSecret`]s.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::debug;

use super::secrets::LockedSecret;
use crate::datatools::get_in;
use crate::error::AppError;

/// Source of configuration secrets addressed by a key path.
pub trait ConfigProvider: Send + Sync {
    /// Raw (unwrapped) configuration value at `config_path`.
    fn provide_value(&self, config_path: &[&str]) -> Result<Value, AppError>;

    /// Configuration value at `config_path`, wrapped in a locked secret.
    fn provide(&self, config_path: &[&str]) -> Result<LockedSecret, AppError> {
        let value = self.provide_value(config_path)?;
        Ok(LockedSecret::new(config_path, value))
    }
}

fn lookup(root: &Value, base: &[String], config_path: &[&str]) -> Result<Value, AppError> {
    let full: Vec<&str> = base
        .iter()
        .map(String::as_str)
        .chain(config_path.iter().copied())
        .collect();
    get_in(root, &full)
        .cloned()
        .ok_or_else(|| AppError::config(format!("No configuration found at '{}'", full.join("."))))
}

/// Parses the textual contents of a configuration file.
pub type FileLoader = fn(&str) -> Result<Value, AppError>;

pub fn load_json(contents: &str) -> Result<Value, AppError> {
    Ok(serde_json::from_str(contents)?)
}

pub fn load_yaml(contents: &str) -> Result<Value, AppError> {
    Ok(serde_yaml::from_str(contents)?)
}

/// Provider backed by a file that is read and parsed once, on first use.
pub struct FileConfigProvider {
    path: PathBuf,
    loader: FileLoader,
    base_config_path: Vec<String>,
    loaded: OnceCell<Value>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>, loader: FileLoader, base_config_path: &[&str]) -> Self {
        Self {
            path: path.into(),
            loader,
            base_config_path: base_config_path.iter().map(|s| s.to_string()).collect(),
            loaded: OnceCell::new(),
        }
    }

    pub fn json(path: impl Into<PathBuf>, base_config_path: &[&str]) -> Self {
        Self::new(path, load_json, base_config_path)
    }

    pub fn yaml(path: impl Into<PathBuf>, base_config_path: &[&str]) -> Self {
        Self::new(path, load_yaml, base_config_path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn config(&self) -> Result<&Value, AppError> {
        self.loaded.get_or_try_init(|| {
            debug!(path = %self.path.display(), "config_file=load");
            let contents = fs::read_to_string(&self.path).map_err(|e| {
                AppError::config(format!(
                    "Failed to read configuration file '{}': {e}",
                    self.path.display()
                ))
            })?;
            (self.loader)(&contents)
        })
    }
}

impl ConfigProvider for FileConfigProvider {
    fn provide_value(&self, config_path: &[&str]) -> Result<Value, AppError> {
        lookup(self.config()?, &self.base_config_path, config_path)
    }
}

impl fmt::Debug for FileConfigProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileConfigProvider")
            .field("path", &self.path)
            .field("base_config_path", &self.base_config_path)
            .field("loaded", &self.loaded.get().is_some())
            .finish()
    }
}

/// Provider over an in-memory configuration tree.
pub struct MemoryConfigProvider {
    root: Value,
    base_config_path: Vec<String>,
}

impl MemoryConfigProvider {
    pub fn new(root: Value) -> Self {
        Self {
            root,
            base_config_path: Vec::new(),
        }
    }

    pub fn with_base_path(mut self, base_config_path: &[&str]) -> Self {
        self.base_config_path = base_config_path.iter().map(|s| s.to_string()).collect();
        self
    }
}

impl ConfigProvider for MemoryConfigProvider {
    fn provide_value(&self, config_path: &[&str]) -> Result<Value, AppError> {
        lookup(&self.root, &self.base_config_path, config_path)
    }
}

impl fmt::Debug for MemoryConfigProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConfigProvider")
            .field("base_config_path", &self.base_config_path)
            .finish_non_exhaustive()
    }
}

/// Provider reading one environment variable per config path:
/// `["databases", "main"]` reads `{PREFIX_}DATABASES_MAIN`.
///
/// The variable is parsed as JSON; anything that is not JSON is returned as
/// a plain string.
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    prefix: Option<String>,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    pub fn variable_name(&self, config_path: &[&str]) -> String {
        self.prefix
            .iter()
            .map(String::as_str)
            .chain(config_path.iter().copied())
            .map(|part| part.replace(['-', '.'], "_").to_uppercase())
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn provide_value(&self, config_path: &[&str]) -> Result<Value, AppError> {
        let name = self.variable_name(config_path);
        let raw = std::env::var(&name).map_err(|_| {
            AppError::config(format!("Environment variable '{name}' is not set"))
        })?;
        Ok(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use serde_json::json;
    use tempfile::NamedTempFile;

    use super::*;

    fn write_temp(contents: &str, suffix: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn json_provider_resolves_nested_secret() {
        let file = write_temp(r#"{"a": {"b": {"c": 1}}}"#, ".json");
        let provider = FileConfigProvider::json(file.path(), &[]);
        let secret = provider.provide(&["a", "b", "c"]).unwrap();
        assert_eq!(secret.unlock().value(), &json!(1));
        assert_eq!(secret.name(), ["a", "b", "c"]);
    }

    #[test]
    fn file_is_loaded_once() {
        let file = write_temp(r#"{"a": {"b": 2}}"#, ".json");
        let provider = FileConfigProvider::json(file.path(), &[]);
        assert_eq!(provider.provide_value(&["a", "b"]).unwrap(), json!(2));

        // Rewriting the file must not change what the cached provider returns.
        fs::write(file.path(), r#"{"a": {"b": 3}}"#).unwrap();
        assert_eq!(provider.provide_value(&["a", "b"]).unwrap(), json!(2));
    }

    #[test]
    fn yaml_provider_honors_base_path() {
        let file = write_temp("outer:\n  inner: val\n", ".yaml");
        let provider = FileConfigProvider::yaml(file.path(), &["outer"]);
        let secret = provider.provide(&["inner"]).unwrap();
        assert_eq!(secret.unlock().get_str("missing"), None);
        assert_eq!(secret.unlock().value(), &json!("val"));
    }

    #[test]
    fn missing_path_is_config_error() {
        let provider = MemoryConfigProvider::new(json!({"a": {}}));
        let err = provider.provide(&["a", "b"]).unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
        assert!(err.to_string().contains("a.b"));
    }

    #[test]
    fn unreadable_or_malformed_files_are_config_errors() {
        let provider = FileConfigProvider::json("/definitely/not/here.json", &[]);
        assert!(matches!(
            provider.provide_value(&["x"]),
            Err(AppError::Config { .. })
        ));

        let file = write_temp("{not json", ".json");
        let provider = FileConfigProvider::json(file.path(), &[]);
        assert!(matches!(
            provider.provide_value(&["x"]),
            Err(AppError::Config { .. })
        ));
    }

    #[test]
    fn memory_provider_base_path() {
        let provider =
            MemoryConfigProvider::new(json!({"env": {"db": {"host": "h"}}})).with_base_path(&["env"]);
        assert_eq!(provider.provide_value(&["db", "host"]).unwrap(), json!("h"));
    }

    #[test]
    #[serial]
    fn env_provider_parses_json_or_plain_strings() {
        let provider = EnvConfigProvider::with_prefix("dbwrap-test");
        assert_eq!(
            provider.variable_name(&["databases", "main"]),
            "DBWRAP_TEST_DATABASES_MAIN"
        );

        std::env::set_var(
            "DBWRAP_TEST_DATABASES_MAIN",
            r#"{"username": "u", "password": "p", "host": "h"}"#,
        );
        std::env::set_var("DBWRAP_TEST_DATABASES_SCHEMA", "public");
        let secret = provider.provide(&["databases", "main"]).unwrap();
        assert_eq!(secret.unlock().get_str("host"), Some("h"));
        assert_eq!(
            provider.provide_value(&["databases", "schema"]).unwrap(),
            json!("public")
        );

        std::env::remove_var("DBWRAP_TEST_DATABASES_MAIN");
        std::env::remove_var("DBWRAP_TEST_DATABASES_SCHEMA");
        let err = provider.provide(&["databases", "main"]).unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
    }
}
