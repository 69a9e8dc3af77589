//! Root configuration (`config-aqua.yaml`).
//!
//! ```yaml
//! catalogs: [climatedt-phase1, obs]   # search order
//! paths:
//!   catalogs: catalogs                # one sub-directory per catalog
//!   grids: grids
//!   fixes: fixes
//!   weights: /scratch/aqua/weights
//! workers: 8
//! resolution_policy: first_match      # or strict
//! ```
//!
//! Relative paths are resolved against the directory holding the file. The
//! file is looked up from, in order: an explicit path, `$AQUA_CONFIG`,
//! `~/.aqua/config-aqua.yaml` and `./config-aqua.yaml`. `$AQUA_WEIGHTS`
//! overrides the weights directory.

use crate::catalog::ResolutionPolicy;
use crate::errors::{AquaError, AquaResult};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config-aqua.yaml";
pub const CONFIG_ENV: &str = "AQUA_CONFIG";
pub const WEIGHTS_ENV: &str = "AQUA_WEIGHTS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub catalogs: PathBuf,
    pub grids: PathBuf,
    pub fixes: PathBuf,
    pub weights: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            catalogs: PathBuf::from("catalogs"),
            grids: PathBuf::from("grids"),
            fixes: PathBuf::from("fixes"),
            weights: PathBuf::from("weights"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub catalogs: Vec<String>,
    pub paths: PathsConfig,
    pub workers: Option<usize>,
    pub resolution_policy: ResolutionPolicy,
}

/// A loaded configuration with every directory made absolute.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub source: Option<PathBuf>,
    pub catalogs: Vec<String>,
    pub catalogs_dir: PathBuf,
    pub grids_dir: PathBuf,
    pub fixes_dir: PathBuf,
    pub weights_dir: PathBuf,
    pub workers: Option<usize>,
    pub resolution_policy: ResolutionPolicy,
}

impl Configuration {
    /// Builds a configuration rooted at `base_dir`.
    pub fn from_file(file: ConfigFile, base_dir: &Path) -> Self {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base_dir.join(p)
            }
        };
        let mut weights_dir = resolve(&file.paths.weights);
        if let Ok(dir) = std::env::var(WEIGHTS_ENV) {
            debug!("{WEIGHTS_ENV} overrides weights directory with {dir}");
            weights_dir = PathBuf::from(dir);
        }
        Self {
            source: None,
            catalogs: file.catalogs,
            catalogs_dir: resolve(&file.paths.catalogs),
            grids_dir: resolve(&file.paths.grids),
            fixes_dir: resolve(&file.paths.fixes),
            weights_dir,
            workers: file.workers,
            resolution_policy: file.resolution_policy,
        }
    }

    pub fn read(path: &Path) -> AquaResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AquaError::io(path, e))?;
        let file: ConfigFile = serde_yaml::from_str(&text)
            .map_err(|e| AquaError::Config(format!("{}: {e}", path.display())))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut config = Self::from_file(file, base_dir);
        config.source = Some(path.to_path_buf());
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Finds and reads the configuration file.
    pub fn load(explicit: Option<&Path>) -> AquaResult<Self> {
        let path = Self::locate(explicit)?;
        Self::read(&path)
    }

    fn locate(explicit: Option<&Path>) -> AquaResult<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        let mut candidates = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            candidates.push(PathBuf::from(path));
        }
        if let Ok(home) = std::env::var("HOME") {
            candidates.push(Path::new(&home).join(".aqua").join(CONFIG_FILE_NAME));
        }
        candidates.push(PathBuf::from(CONFIG_FILE_NAME));

        candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| {
                AquaError::Config(format!(
                    "no {CONFIG_FILE_NAME} found; looked in {candidates:?}"
                ))
            })
    }

    /// Directory holding the YAML files of one catalog.
    pub fn catalog_dir(&self, catalog: &str) -> PathBuf {
        self.catalogs_dir.join(catalog)
    }

    /// Sizes the global rayon pool from `workers`.
    ///
    /// The pool can only be configured once per process; later calls log and
    /// keep the existing pool.
    pub fn configure_workers(&self) {
        let Some(workers) = self.workers else {
            return;
        };
        match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build_global()
        {
            Ok(()) => debug!("using {workers} worker threads"),
            Err(e) => warn!("worker pool already configured: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "catalogs: [obs, climatedt]\npaths:\n  grids: /abs/grids\nworkers: 2\nresolution_policy: strict\n",
        )
        .unwrap();

        let config = Configuration::load(Some(&path)).unwrap();
        assert_eq!(config.catalogs, vec!["obs", "climatedt"]);
        assert_eq!(config.grids_dir, PathBuf::from("/abs/grids"));
        assert_eq!(config.fixes_dir, dir.path().join("fixes"));
        assert_eq!(config.catalog_dir("obs"), dir.path().join("catalogs/obs"));
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.resolution_policy, ResolutionPolicy::Strict);
    }

    #[test]
    fn defaults() {
        let config = Configuration::from_file(ConfigFile::default(), Path::new("/etc/aqua"));
        assert!(config.catalogs.is_empty());
        assert_eq!(config.catalogs_dir, PathBuf::from("/etc/aqua/catalogs"));
        assert_eq!(config.resolution_policy, ResolutionPolicy::FirstMatch);
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "catalogs: {not: [a list").unwrap();
        assert!(matches!(
            Configuration::load(Some(&path)),
            Err(AquaError::Config(_))
        ));
    }
}
