use crate::error::{DashboardError, DashboardResult};
use crate::i18n::DEFAULT_LANGUAGE;
use crate::session::SessionRestore;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Runtime settings. Built from defaults, then an optional JSON file, then
/// `RECYDASH_*` environment variables.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub data_dir: PathBuf,
    pub object_dir: PathBuf,
    pub public_base_url: String,
    pub default_language: String,
    pub session_restore: SessionRestore,
    pub bind_address: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            data_dir: PathBuf::from("database"),
            object_dir: PathBuf::from("database/objects"),
            public_base_url: "/objects".to_string(),
            default_language: DEFAULT_LANGUAGE.to_string(),
            session_restore: SessionRestore::Optimistic,
            bind_address: "127.0.0.1:3000".to_string(),
        }
    }
}

impl DashboardConfig {
    /// Settings from a JSON file; missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> DashboardResult<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Apply overrides from `vars`, as produced by [`std::env::vars`].
    pub fn apply_env(&mut self, vars: impl IntoIterator<Item = (String, String)>) -> DashboardResult<()> {
        for (name, value) in vars {
            match name.as_str() {
                "RECYDASH_DATA_DIR" => self.data_dir = PathBuf::from(value),
                "RECYDASH_OBJECT_DIR" => self.object_dir = PathBuf::from(value),
                "RECYDASH_PUBLIC_BASE_URL" => self.public_base_url = value,
                "RECYDASH_LANGUAGE" => self.default_language = value,
                "RECYDASH_BIND" => self.bind_address = value,
                "RECYDASH_SESSION_RESTORE" => {
                    self.session_restore = SessionRestore::parse(&value).ok_or_else(|| {
                        DashboardError::Validation(format!("unknown session restore policy: {}", value))
                    })?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Defaults, then `file` if given, then the process environment.
    pub fn load(file: Option<&Path>) -> DashboardResult<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        log::debug!("configuration: {:?}", config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recydash.json");
        fs::write(&path, r#"{ "default_language": "en", "session_restore": "revalidate" }"#).unwrap();

        let config = DashboardConfig::from_file(&path).unwrap();
        assert_eq!(config.default_language, "en");
        assert_eq!(config.session_restore, SessionRestore::Revalidate);
        assert_eq!(config.data_dir, PathBuf::from("database"));
    }

    #[test]
    fn environment_overrides_everything() {
        let mut config = DashboardConfig::default();
        config
            .apply_env(vec![
                ("RECYDASH_DATA_DIR".to_string(), "/tmp/data".to_string()),
                ("RECYDASH_BIND".to_string(), "0.0.0.0:8080".to_string()),
                ("HOME".to_string(), "/root".to_string()),
            ])
            .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/data"));
        assert_eq!(config.bind_address, "0.0.0.0:8080");

        let bad = config.apply_env(vec![(
            "RECYDASH_SESSION_RESTORE".to_string(),
            "sometimes".to_string(),
        )]);
        assert!(bad.is_err());
    }
}
