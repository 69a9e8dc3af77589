//! Backends that turn a catalog entry into a [`Dataset`].
//!
//! Loaders are looked up by the entry's driver (`files`, `zarr`, `fdb`,
//! `memory`). `files` and `memory` are built in; other drivers need a loader
//! registered with [`LoaderRegistry::register`].

use crate::catalog::{Backend, CatalogEntry};
use crate::dataset::Dataset;
use crate::errors::{AquaError, AquaResult};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// What part of a source to read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadRequest {
    /// Source variable names; `None` reads everything.
    pub variables: Option<Vec<String>>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl LoadRequest {
    /// Narrows a full dataset to the request. Requested variables the
    /// dataset lacks are skipped with a warning.
    pub fn apply(&self, dataset: Dataset) -> AquaResult<Dataset> {
        let dataset = match &self.variables {
            Some(names) => {
                let present: Vec<&String> = names.iter().filter(|n| dataset.contains(n)).collect();
                if present.len() < names.len() {
                    let missing: Vec<&String> =
                        names.iter().filter(|n| !dataset.contains(n)).collect();
                    warn!("variables {missing:?} not available in source");
                }
                dataset.select_variables(&present)?
            }
            None => dataset,
        };
        if self.start.is_none() && self.end.is_none() {
            return Ok(dataset);
        }
        Ok(dataset.select_time(self.start, self.end))
    }
}

pub trait DatasetLoader: Send + Sync {
    fn load(&self, entry: &CatalogEntry, request: &LoadRequest) -> AquaResult<Dataset>;
}

/// Reads JSON-serialized datasets matching the entry's glob patterns and
/// joins them along time.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesLoader;

impl FilesLoader {
    pub fn read(path: &Path) -> AquaResult<Dataset> {
        let file = std::fs::File::open(path).map_err(|e| AquaError::io(path, e))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn write(dataset: &Dataset, path: &Path) -> AquaResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AquaError::io(parent, e))?;
        }
        let file = std::fs::File::create(path).map_err(|e| AquaError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, dataset)?;
        writer.flush().map_err(|e| AquaError::io(path, e))
    }

    /// Files holding the same variables are joined along time, then the
    /// groups are merged. Files left without variables are dropped unless
    /// nothing else remains.
    fn join(parts: Vec<Dataset>) -> AquaResult<Dataset> {
        let mut groups: BTreeMap<Vec<String>, Vec<Dataset>> = BTreeMap::new();
        let mut empty = None;
        for part in parts {
            let names = part.variable_names();
            if names.is_empty() {
                empty.get_or_insert(part);
            } else {
                groups.entry(names).or_default().push(part);
            }
        }
        if groups.is_empty() {
            return empty.ok_or_else(|| AquaError::Error("no files to join".to_string()));
        }
        if groups.len() > 1 {
            debug!("joining {} variable groups", groups.len());
        }
        let joined = groups
            .into_values()
            .map(Dataset::concat_time)
            .collect::<AquaResult<Vec<Dataset>>>()?;
        Dataset::merge_variables(joined)
    }

    fn matching_files(entry: &CatalogEntry, patterns: &[String]) -> AquaResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for pattern in patterns {
            let pattern = entry.resolve_path(pattern);
            let pattern = pattern.to_string_lossy();
            let paths = glob::glob(&pattern)
                .map_err(|e| AquaError::Config(format!("{entry}: bad pattern {pattern}: {e}")))?;
            for path in paths {
                files.push(path.map_err(|e| AquaError::io(e.path().to_path_buf(), e.into_error()))?);
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }
}

impl DatasetLoader for FilesLoader {
    fn load(&self, entry: &CatalogEntry, request: &LoadRequest) -> AquaResult<Dataset> {
        let Backend::Files { paths } = &entry.spec.backend else {
            return Err(AquaError::UnsupportedBackend(entry.spec.backend.kind().to_string()));
        };
        let files = Self::matching_files(entry, paths)?;
        if files.is_empty() {
            return Err(AquaError::DatasetNotFound {
                catalog: entry.catalog.clone(),
                model: entry.model.clone(),
                exp: entry.exp.clone(),
                source_name: entry.source.clone(),
            });
        }
        info!("Reading {} files for {entry}", files.len());
        let parts = files
            .par_iter()
            .map(|path| {
                debug!("reading {}", path.display());
                let part = Self::read(path)?;
                match &request.variables {
                    Some(names) => {
                        let present: Vec<&String> = names.iter().filter(|n| part.contains(n)).collect();
                        part.select_variables(&present)
                    }
                    None => Ok(part),
                }
            })
            .collect::<AquaResult<Vec<Dataset>>>()?;
        request.apply(Self::join(parts)?)
    }
}

/// Datasets held in memory under string keys, for tests and for data
/// produced in-process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    datasets: RwLock<HashMap<String, Dataset>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, dataset: Dataset) {
        self.datasets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.into(), dataset);
    }
}

impl DatasetLoader for MemoryStore {
    fn load(&self, entry: &CatalogEntry, request: &LoadRequest) -> AquaResult<Dataset> {
        let Backend::Memory { key } = &entry.spec.backend else {
            return Err(AquaError::UnsupportedBackend(entry.spec.backend.kind().to_string()));
        };
        let dataset = self
            .datasets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| AquaError::DatasetNotFound {
                catalog: entry.catalog.clone(),
                model: entry.model.clone(),
                exp: entry.exp.clone(),
                source_name: entry.source.clone(),
            })?;
        request.apply(dataset)
    }
}

/// Loaders by driver name.
#[derive(Clone)]
pub struct LoaderRegistry {
    loaders: HashMap<String, Arc<dyn DatasetLoader>>,
    memory: Arc<MemoryStore>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let memory = Arc::new(MemoryStore::new());
        let mut registry = Self {
            loaders: HashMap::new(),
            memory: Arc::clone(&memory),
        };
        registry.register("files", Arc::new(FilesLoader));
        registry.register("memory", memory);
        registry
    }
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: &str, loader: Arc<dyn DatasetLoader>) {
        self.loaders.insert(driver.to_string(), loader);
    }

    /// The built-in in-memory store.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn load(&self, entry: &CatalogEntry, request: &LoadRequest) -> AquaResult<Dataset> {
        let driver = entry.spec.backend.kind();
        let loader = self
            .loaders
            .get(driver)
            .ok_or_else(|| AquaError::UnsupportedBackend(driver.to_string()))?;
        loader.load(entry, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SourceSpec;
    use crate::dataset::DataArray;
    use crate::grid::HorizontalGrid;
    use chrono::NaiveDate;
    use ndarray::Array3;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn part(days: &[u32]) -> Dataset {
        let times: Vec<_> = days.iter().map(|&d| day(d)).collect();
        let mut ds = Dataset::new(HorizontalGrid::regular(4, 2).unwrap(), times);
        let values = Array3::from_shape_fn((days.len(), 1, 8), |(t, _, _)| days[t] as f64);
        ds.insert(DataArray::new("2t", "K", values.clone())).unwrap();
        ds.insert(DataArray::new("msl", "Pa", values)).unwrap();
        ds
    }

    fn entry(backend: Backend, base_dir: &Path) -> CatalogEntry {
        CatalogEntry {
            catalog: "test".to_string(),
            model: "IFS".to_string(),
            exp: "control".to_string(),
            source: "daily".to_string(),
            spec: SourceSpec {
                description: None,
                backend,
                fixer_name: None,
                source_grid_name: None,
            },
            base_dir: base_dir.to_path_buf(),
        }
    }

    #[test]
    fn files_are_globbed_and_joined() {
        let dir = tempfile::tempdir().unwrap();
        FilesLoader::write(&part(&[3, 4]), &dir.path().join("data/b.json")).unwrap();
        FilesLoader::write(&part(&[1, 2]), &dir.path().join("data/a.json")).unwrap();
        let entry = entry(
            Backend::Files {
                paths: vec!["data/*.json".to_string()],
            },
            dir.path(),
        );
        let request = LoadRequest {
            variables: Some(vec!["2t".to_string(), "tp".to_string()]),
            start: Some(day(2)),
            end: None,
        };
        let ds = FilesLoader.load(&entry, &request).unwrap();
        assert_eq!(ds.time, vec![day(2), day(3), day(4)]);
        assert_eq!(ds.variable_names(), vec!["2t".to_string()]);
        assert_eq!(ds.get("2t").unwrap().values[[0, 0, 0]], 2.0);
    }

    #[test]
    fn no_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let entry = entry(
            Backend::Files {
                paths: vec!["*.json".to_string()],
            },
            dir.path(),
        );
        assert!(matches!(
            FilesLoader.load(&entry, &LoadRequest::default()),
            Err(AquaError::DatasetNotFound { .. })
        ));
    }

    #[test]
    fn registry_dispatch() {
        let registry = LoaderRegistry::new();
        registry.memory().insert("k", part(&[1]));
        let memory = entry(Backend::Memory { key: "k".to_string() }, Path::new("."));
        assert_eq!(registry.load(&memory, &LoadRequest::default()).unwrap().time.len(), 1);

        let zarr = entry(
            Backend::Zarr {
                store: "x.zarr".to_string(),
            },
            Path::new("."),
        );
        assert!(matches!(
            registry.load(&zarr, &LoadRequest::default()),
            Err(AquaError::UnsupportedBackend(_))
        ));
    }
}
