use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const ENV_CONFIG_PATH: &str = "PASSOVER_CONFIG";

const DEFAULT_MAX_FILES: usize = 100;
const DEFAULT_MAP_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_FILE_SIZE: u64 = 100 * 1024 * 1024;
const DEFAULT_TEMPLATE: &str = "thread-%d";
const DEFAULT_MAX_ARGS: usize = 32;
const DEFAULT_T_INDEX_NS: u64 = 1_000_000;
const DEFAULT_S_INDEX_BYTES: u64 = 1024 * 1024;

/// Session configuration. Every field has a default, so a missing or
/// unparseable config file degrades to `Config::default()` rather than
/// failing session setup.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Ring cap per prefix.
    pub max_files: usize,
    /// `fmap` half-window size, in bytes.
    pub map_size: usize,
    /// `rotrec` cap, in bytes.
    pub file_size: u64,
    /// Prefix format string; `%d` is substituted with a thread-local monotone id.
    pub template: String,
    /// Whether child threads spawned from a traced thread are auto-traced.
    pub trace_threads: bool,
    /// Whether `begin_session` deletes a pre-existing non-empty directory.
    pub remove_existing_dir: bool,
    /// Maximum number of call arguments captured per `PyFuncCall`.
    pub max_args: usize,
    /// Time-index cadence: append every `t_index_ns` nanoseconds of wall-clock.
    pub t_index_ns: u64,
    /// Time-index cadence: append every `s_index_bytes` of logical offset.
    pub s_index_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            map_size: DEFAULT_MAP_SIZE,
            file_size: DEFAULT_FILE_SIZE,
            template: DEFAULT_TEMPLATE.to_string(),
            trace_threads: true,
            remove_existing_dir: true,
            max_args: DEFAULT_MAX_ARGS,
            t_index_ns: DEFAULT_T_INDEX_NS,
            s_index_bytes: DEFAULT_S_INDEX_BYTES,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the path named by the
    /// `PASSOVER_CONFIG` environment variable if `path` is `None`. Falls back
    /// to defaults on any read or parse failure, logging the reason.
    pub fn load(path: Option<&Path>) -> Self {
        let path: PathBuf = match path {
            Some(p) => p.to_path_buf(),
            None => match std::env::var(ENV_CONFIG_PATH) {
                Ok(p) => PathBuf::from(p),
                Err(_) => return Config::default(),
            },
        };
        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("failed to parse config at {}: {err}; using defaults", path.display());
                Config::default()
            }),
            Err(err) => {
                log::warn!("failed to read config at {}: {err}; using defaults", path.display());
                Config::default()
            }
        }
    }

    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        if self.map_size == 0 {
            return Err(crate::error::Error::Config("map_size must be nonzero".into()));
        }
        if (self.map_size as u64) > self.file_size {
            return Err(crate::error::Error::Config(
                "map_size must not exceed file_size".into(),
            ));
        }
        if self.max_files == 0 {
            return Err(crate::error::Error::Config("max_files must be nonzero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.max_files, 100);
        assert_eq!(cfg.map_size, 2 * 1024 * 1024);
        assert_eq!(cfg.file_size, 100 * 1024 * 1024);
        assert_eq!(cfg.template, "thread-%d");
        assert!(cfg.trace_threads);
        assert!(cfg.remove_existing_dir);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load(Some(Path::new("/nonexistent/passover.toml")));
        assert_eq!(cfg.max_files, Config::default().max_files);
    }

    #[test]
    fn rejects_map_size_over_file_size() {
        let cfg = Config { map_size: 200, file_size: 100, ..Config::default() };
        assert!(cfg.validate().is_err());
    }
}
