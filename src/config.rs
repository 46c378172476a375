//! Runtime settings, layered with the `config` crate:
//! defaults, then `memo-ledger.toml` (or an explicit file), then
//! `MEMO_LEDGER_*` environment variables (`__` separates nested keys,
//! e.g. `MEMO_LEDGER_FILTER__MODE=bloom`).

use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::filter::FilterParams;

pub const DEFAULT_CONFIG_FILE: &str = "memo-ledger";

/// Which [`crate::storage::SnapshotStore`] backs the ledger and filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `ledger.json` and `filter.json` under `data_dir`.
    Json,
    /// Trees `ledger` and `filter` in the sled database `data_dir/ledger.sled`.
    Sled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub backend: Backend,
    pub log_level: String,
    pub filter: FilterParams,
}

impl Settings {
    /// Load settings. `path` names a required config file; without it an
    /// optional `memo-ledger.{toml,json,...}` in the working directory is used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("data_dir", "./data")?
            .set_default("backend", "json")?
            .set_default("log_level", "info")?
            .set_default("filter.mode", "exact")?
            .set_default("filter.size", 10_000_i64)?
            .set_default("filter.hash_count", 3_i64)?;

        builder = match path {
            Some(p) => builder.add_source(File::from(p).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("MEMO_LEDGER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.filter.validate()?;
        Ok(settings)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.json")
    }

    pub fn filter_path(&self) -> PathBuf {
        self.data_dir.join("filter.json")
    }

    pub fn sled_path(&self) -> PathBuf {
        self.data_dir.join("ledger.sled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterMode;
    use std::io::Write;

    #[test]
    fn defaults_apply_without_a_file() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("./data"));
        assert_eq!(settings.filter, FilterParams::default());
        assert_eq!(settings.ledger_path(), PathBuf::from("./data/ledger.json"));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "data_dir = \"/var/lib/memos\"\nbackend = \"sled\"\n\n[filter]\nmode = \"bloom\"\nsize = 2048\nhash_count = 5"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.backend, Backend::Sled);
        assert_eq!(settings.filter.mode, FilterMode::Bloom);
        assert_eq!(settings.filter.size, 2048);
        assert_eq!(settings.filter.hash_count, 5);
        assert_eq!(settings.sled_path(), PathBuf::from("/var/lib/memos/ledger.sled"));
    }

    #[test]
    fn invalid_filter_parameters_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[filter]\nhash_count = 0").unwrap();
        assert!(matches!(
            Settings::load(Some(file.path())),
            Err(ConfigError::Filter(_))
        ));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/memo-ledger.toml"))).is_err());
    }
}
