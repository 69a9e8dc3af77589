//! Grid descriptors loaded from the grids directory.
//!
//! Every YAML file under the grids directory contributes entries to a single
//! `grids:` map:
//!
//! ```yaml
//! grids:
//!   tco79:
//!     path: tco79.json          # grid file, or a grid spec such as r100 / hpz5
//!     space_coord: [cell]
//!     vert_coord: [plev]
//!     cellareas: tco79_areas.json
//!     regrid_method: nearest
//!     masked:
//!       vars: [sst, ci]
//!       path: tco79_sea.json    # optional; otherwise the NaN pattern is used
//! ```
//!
//! Relative file paths resolve against the YAML file declaring the grid.

use super::HorizontalGrid;
use crate::errors::{AquaError, AquaResult};
use crate::regrid::RegridMethod;
use log::{debug, warn};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Variables regridded with masked weights and where their mask comes from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaskSpec {
    #[serde(default)]
    pub vars: Vec<String>,
    /// JSON array of booleans, `true` for valid cells.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDescriptor {
    #[serde(default)]
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub space_coord: Vec<String>,
    #[serde(default)]
    pub vert_coord: Vec<String>,
    #[serde(default)]
    pub cellareas: Option<String>,
    #[serde(default)]
    pub regrid_method: Option<RegridMethod>,
    #[serde(default)]
    pub masked: Option<MaskSpec>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl GridDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            space_coord: vec![],
            vert_coord: vec![],
            cellareas: None,
            regrid_method: None,
            masked: None,
            base_dir: PathBuf::new(),
        }
    }

    pub fn is_masked(&self, variable: &str) -> bool {
        self.masked
            .as_ref()
            .is_some_and(|m| m.vars.iter().any(|v| v == variable))
    }

    fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Builds the horizontal grid this descriptor defines.
    pub fn build(&self) -> AquaResult<HorizontalGrid> {
        let mut grid = match HorizontalGrid::from_spec(&self.path)? {
            Some(grid) => grid,
            None => {
                let file = self.resolve(&self.path);
                if !file.is_file() {
                    return Err(AquaError::MalformedGrid {
                        grid: self.name.clone(),
                        reason: format!(
                            "'{}' is neither a grid specification nor an existing file",
                            self.path
                        ),
                    });
                }
                HorizontalGrid::from_file(&self.name, &file)?
            }
        };
        grid.name = self.name.clone();

        if let Some(areas) = &self.cellareas {
            let file = self.resolve(areas);
            let text = std::fs::read_to_string(&file).map_err(|e| AquaError::io(&file, e))?;
            let areas: Vec<f64> = serde_json::from_str(&text)?;
            grid = grid.with_cell_area(Array1::from(areas))?;
        }
        Ok(grid)
    }

    /// The static validity mask, when the descriptor names a mask file.
    pub fn load_mask(&self, ncell: usize) -> AquaResult<Option<Vec<bool>>> {
        let Some(path) = self.masked.as_ref().and_then(|m| m.path.as_ref()) else {
            return Ok(None);
        };
        let file = self.resolve(path);
        let text = std::fs::read_to_string(&file).map_err(|e| AquaError::io(&file, e))?;
        let mask: Vec<bool> = serde_json::from_str(&text)?;
        if mask.len() != ncell {
            return Err(AquaError::MalformedGrid {
                grid: self.name.clone(),
                reason: format!("mask has {} cells, grid has {}", mask.len(), ncell),
            });
        }
        Ok(Some(mask))
    }
}

#[derive(Debug, Deserialize)]
struct GridsFile {
    #[serde(default)]
    grids: BTreeMap<String, GridDescriptor>,
}

/// All grid descriptors known to a session.
#[derive(Debug, Clone, Default)]
pub struct GridRegistry {
    grids: BTreeMap<String, GridDescriptor>,
}

impl GridRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every `*.yaml`/`*.yml` file below `dir`.
    ///
    /// A missing directory gives an empty registry. Later files override
    /// earlier ones (walk order is sorted by file name).
    pub fn load(dir: &Path) -> AquaResult<Self> {
        let mut registry = Self::new();
        if !dir.is_dir() {
            debug!("grids directory {} does not exist", dir.display());
            return Ok(registry);
        }
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| AquaError::Config(e.to_string()))?;
            if !is_yaml(entry.path()) {
                continue;
            }
            let text = std::fs::read_to_string(entry.path())
                .map_err(|e| AquaError::io(entry.path(), e))?;
            let file: GridsFile = serde_yaml::from_str(&text).map_err(|e| {
                AquaError::Config(format!("{}: {e}", entry.path().display()))
            })?;
            let base_dir = entry.path().parent().unwrap_or(dir).to_path_buf();
            for (name, mut descriptor) in file.grids {
                descriptor.name = name.clone();
                descriptor.base_dir = base_dir.clone();
                if registry.grids.insert(name.clone(), descriptor).is_some() {
                    warn!("grid {name} redefined in {}", entry.path().display());
                }
            }
        }
        debug!("loaded {} grid descriptors", registry.grids.len());
        Ok(registry)
    }

    pub fn insert(&mut self, descriptor: GridDescriptor) {
        self.grids.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> AquaResult<&GridDescriptor> {
        self.grids
            .get(name)
            .ok_or_else(|| AquaError::UnknownGrid(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.grids.keys().map(String::as_str)
    }

    /// A grid by descriptor name, falling back to a grid specification.
    pub fn resolve(&self, name: &str) -> AquaResult<HorizontalGrid> {
        if let Some(descriptor) = self.grids.get(name) {
            return descriptor.build();
        }
        HorizontalGrid::from_spec(name)?.ok_or_else(|| AquaError::UnknownGrid(name.to_string()))
    }
}

pub(crate) fn is_yaml(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridKind;
    use std::fs;

    #[test]
    fn loads_descriptors_with_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("ifs")).unwrap();
        fs::write(
            dir.path().join("ifs/tiny.yaml"),
            "grids:\n  tiny:\n    path: tiny.json\n    regrid_method: nearest\n    masked:\n      vars: [sst]\n      path: tiny_sea.json\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("ifs/tiny.json"),
            r#"{"lat": [10.0, -10.0, 50.0], "lon": [0.0, 120.0, 240.0]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("ifs/tiny_sea.json"), "[true, false, true]").unwrap();
        fs::write(dir.path().join("regular.yml"), "grids:\n  r1:\n    path: r360x180\n").unwrap();

        let registry = GridRegistry::load(dir.path()).unwrap();
        let tiny = registry.get("tiny").unwrap();
        assert_eq!(tiny.regrid_method, Some(RegridMethod::Nearest));
        assert!(tiny.is_masked("sst"));
        assert!(!tiny.is_masked("2t"));

        let grid = tiny.build().unwrap();
        assert_eq!(grid.kind, GridKind::Unstructured);
        assert_eq!(grid.name, "tiny");
        assert_eq!(tiny.load_mask(3).unwrap(), Some(vec![true, false, true]));
        assert!(tiny.load_mask(4).is_err());

        let r1 = registry.resolve("r1").unwrap();
        assert_eq!(r1.kind, GridKind::Regular { nlon: 360, nlat: 180 });
    }

    #[test]
    fn resolve_falls_back_to_specs() {
        let registry = GridRegistry::new();
        assert_eq!(registry.resolve("r200").unwrap().size(), 180 * 90);
        assert!(matches!(
            registry.resolve("nowhere"),
            Err(AquaError::UnknownGrid(_))
        ));
    }

    #[test]
    fn missing_grid_file_is_malformed() {
        let mut registry = GridRegistry::new();
        registry.insert(GridDescriptor::new("broken", "does-not-exist.json"));
        assert!(matches!(
            registry.resolve("broken"),
            Err(AquaError::MalformedGrid { .. })
        ));
    }

    #[test]
    fn cell_areas_must_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("areas.json"), "[1.0, 2.0]").unwrap();
        let mut descriptor = GridDescriptor::new("r4", "r4x2");
        descriptor.base_dir = dir.path().to_path_buf();
        descriptor.cellareas = Some("areas.json".to_string());
        assert!(descriptor.build().is_err());
    }
}
