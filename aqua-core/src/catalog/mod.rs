//! Layered catalogs mapping (model, experiment, source) to data backends.
//!
//! Each catalog is a directory of YAML files merged into one tree:
//!
//! ```yaml
//! models:
//!   IFS-NEMO:
//!     historical-1990:
//!       hourly-native:
//!         description: hourly 2D fields on the native grid
//!         driver: fdb
//!         request: {class: d1, expver: "0001", levtype: sfc, param: [167, 228]}
//!         data_start_date: "19900101T0000"
//!         data_end_date: "19901231T2300"
//!         chunks: monthly
//!         fixer_name: ifs-destine-v1
//!         source_grid_name: tco1279
//!       lra-r100-monthly:
//!         driver: files
//!         paths: ["lra/*.json"]
//!         source_grid_name: r100
//! ```
//!
//! The first source listed under an experiment is its default.

pub mod fdb;

pub use fdb::{expand_requests, Chunking};

use crate::config::Configuration;
use crate::errors::{AquaError, AquaResult};
use crate::grid::descriptor::is_yaml;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What to do when a dataset is found in more than one catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Use the first catalog in configured order and warn.
    #[default]
    FirstMatch,
    /// Refuse to choose.
    Strict,
}

/// How a source is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum Backend {
    /// Glob patterns of dataset files.
    Files { paths: Vec<String> },
    Zarr { store: String },
    Fdb {
        request: BTreeMap<String, Value>,
        #[serde(default)]
        data_start_date: Option<String>,
        #[serde(default)]
        data_end_date: Option<String>,
        #[serde(default)]
        chunks: Chunking,
    },
    /// A dataset registered in-process under `key`.
    Memory { key: String },
}

impl Backend {
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Files { .. } => "files",
            Backend::Zarr { .. } => "zarr",
            Backend::Fdb { .. } => "fdb",
            Backend::Memory { .. } => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub backend: Backend,
    #[serde(default)]
    pub fixer_name: Option<String>,
    #[serde(default)]
    pub source_grid_name: Option<String>,
}

/// A resolved source together with where it was declared.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub catalog: String,
    pub model: String,
    pub exp: String,
    pub source: String,
    pub spec: SourceSpec,
    /// Directory of the declaring YAML file; relative paths resolve here.
    pub base_dir: PathBuf,
}

impl CatalogEntry {
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// FDB requests for this entry, one per chunk of its date range.
    pub fn fdb_requests(&self) -> AquaResult<Vec<BTreeMap<String, String>>> {
        let Backend::Fdb {
            request,
            data_start_date,
            data_end_date,
            chunks,
        } = &self.spec.backend
        else {
            return Err(AquaError::Config(format!("{self} is not an FDB source")));
        };
        match (data_start_date, data_end_date) {
            (Some(start), Some(end)) => expand_requests(
                request,
                fdb::parse_fdb_date(start)?,
                fdb::parse_fdb_date(end)?,
                *chunks,
            ),
            _ => Ok(vec![request
                .iter()
                .map(|(k, v)| (k.clone(), fdb::render_value(v)))
                .collect()]),
        }
    }
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}/{}", self.catalog, self.model, self.exp, self.source)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    models: BTreeMap<String, BTreeMap<String, Mapping>>,
}

/// One catalog: models, their experiments, and ordered sources.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub name: String,
    models: BTreeMap<String, BTreeMap<String, Vec<CatalogEntry>>>,
}

impl Catalog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: BTreeMap::new(),
        }
    }

    /// Reads every YAML file below `dir`.
    pub fn load(name: &str, dir: &Path) -> AquaResult<Self> {
        if !dir.is_dir() {
            return Err(AquaError::Config(format!(
                "catalog {name}: directory {} does not exist",
                dir.display()
            )));
        }
        let mut catalog = Self::new(name);
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| AquaError::Config(e.to_string()))?;
            if !is_yaml(entry.path()) {
                continue;
            }
            let text = std::fs::read_to_string(entry.path())
                .map_err(|e| AquaError::io(entry.path(), e))?;
            let base_dir = entry.path().parent().unwrap_or(dir);
            catalog
                .merge_yaml(&text, base_dir)
                .map_err(|e| AquaError::Config(format!("{}: {e}", entry.path().display())))?;
        }
        debug!("catalog {name}: {} models", catalog.models.len());
        Ok(catalog)
    }

    /// Adds the sources declared in one YAML document.
    pub fn merge_yaml(&mut self, text: &str, base_dir: &Path) -> AquaResult<()> {
        let file: CatalogFile = serde_yaml::from_str(text)?;
        for (model, experiments) in file.models {
            for (exp, sources) in experiments {
                for (source, spec) in sources {
                    let source = match source {
                        Value::String(s) => s,
                        other => render_key(&other),
                    };
                    let spec: SourceSpec = serde_yaml::from_value(spec)?;
                    self.add_source(&model, &exp, &source, spec, base_dir);
                }
            }
        }
        Ok(())
    }

    pub fn add_source(
        &mut self,
        model: &str,
        exp: &str,
        source: &str,
        spec: SourceSpec,
        base_dir: &Path,
    ) {
        let sources = self
            .models
            .entry(model.to_string())
            .or_default()
            .entry(exp.to_string())
            .or_default();
        let entry = CatalogEntry {
            catalog: self.name.clone(),
            model: model.to_string(),
            exp: exp.to_string(),
            source: source.to_string(),
            spec,
            base_dir: base_dir.to_path_buf(),
        };
        match sources.iter_mut().find(|e| e.source == source) {
            Some(existing) => {
                warn!("{entry} declared twice, keeping the later definition");
                *existing = entry;
            }
            None => sources.push(entry),
        }
    }

    /// The named source, or the experiment's default (first) source.
    pub fn lookup(&self, model: &str, exp: &str, source: Option<&str>) -> Option<&CatalogEntry> {
        let sources = self.models.get(model)?.get(exp)?;
        match source {
            Some(name) => sources.iter().find(|e| e.source == name),
            None => sources.first(),
        }
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn experiments(&self, model: &str) -> Vec<&str> {
        self.models
            .get(model)
            .map(|e| e.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn sources(&self, model: &str, exp: &str) -> Vec<&CatalogEntry> {
        self.models
            .get(model)
            .and_then(|e| e.get(exp))
            .map(|s| s.iter().collect())
            .unwrap_or_default()
    }
}

fn render_key(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// The configured catalogs in search order.
#[derive(Debug, Clone, Default)]
pub struct CatalogRegistry {
    catalogs: Vec<Catalog>,
    policy: ResolutionPolicy,
}

impl CatalogRegistry {
    pub fn new(policy: ResolutionPolicy) -> Self {
        Self {
            catalogs: Vec::new(),
            policy,
        }
    }

    pub fn load(config: &Configuration) -> AquaResult<Self> {
        let mut registry = Self::new(config.resolution_policy);
        for name in &config.catalogs {
            registry.push(Catalog::load(name, &config.catalog_dir(name))?);
        }
        Ok(registry)
    }

    pub fn push(&mut self, catalog: Catalog) {
        self.catalogs.push(catalog);
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ResolutionPolicy) {
        self.policy = policy;
    }

    pub fn catalogs(&self) -> &[Catalog] {
        &self.catalogs
    }

    pub fn get(&self, name: &str) -> Option<&Catalog> {
        self.catalogs.iter().find(|c| c.name == name)
    }

    /// Finds the entry for (model, exp, source), searching `catalog` only
    /// when given, otherwise every catalog in order.
    pub fn resolve(
        &self,
        model: &str,
        exp: &str,
        source: Option<&str>,
        catalog: Option<&str>,
    ) -> AquaResult<&CatalogEntry> {
        let not_found = |catalog: &str| AquaError::DatasetNotFound {
            catalog: catalog.to_string(),
            model: model.to_string(),
            exp: exp.to_string(),
            source_name: source.unwrap_or("<default>").to_string(),
        };

        if let Some(name) = catalog {
            return self
                .get(name)
                .and_then(|c| c.lookup(model, exp, source))
                .ok_or_else(|| not_found(name));
        }

        let matches: Vec<&CatalogEntry> = self
            .catalogs
            .iter()
            .filter_map(|c| c.lookup(model, exp, source))
            .collect();
        match matches.as_slice() {
            [] => Err(not_found("<any>")),
            [entry] => Ok(*entry),
            [first, ..] => {
                let catalogs: Vec<String> = matches.iter().map(|e| e.catalog.clone()).collect();
                match self.policy {
                    ResolutionPolicy::Strict => Err(AquaError::AmbiguousDataset {
                        model: model.to_string(),
                        exp: exp.to_string(),
                        source_name: source.unwrap_or("<default>").to_string(),
                        catalogs,
                    }),
                    ResolutionPolicy::FirstMatch => {
                        warn!(
                            "{model}/{exp} found in catalogs {catalogs:?}; using {}",
                            first.catalog
                        );
                        Ok(*first)
                    }
                }
            }
        }
    }
}
