//! Fixer tables: per model family rules loaded from the fixes directory.
//!
//! ```yaml
//! fixer_name:
//!   ifs-destine-v1:
//!     parent: ifs-base
//!     deltat: 3600
//!     delete: [lsm]
//!     coords:
//!       plev:
//!         source: level
//!         tgt_units: Pa
//!     vars:
//!       2t:
//!         source: var167
//!       tprate:
//!         source: tp
//!         src_units: m
//!         decumulate: true
//!       tnlwrf:
//!         derived: ttr / 3600
//!         units: W m-2
//! ```

use crate::errors::{AquaError, AquaResult};
use crate::grid::descriptor::is_yaml;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use walkdir::WalkDir;

/// How one target variable is obtained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixRule {
    /// Source variable name; defaults to the target name.
    #[serde(default)]
    pub source: Option<String>,
    /// Formula over source variables; takes precedence over `source`.
    #[serde(default)]
    pub derived: Option<String>,
    /// Units of the source when the data does not carry them or gets them wrong.
    #[serde(default)]
    pub src_units: Option<String>,
    /// Target units; the parameter table decides when absent.
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub decumulate: bool,
}

impl FixRule {
    pub fn renaming(source: &str) -> Self {
        Self {
            source: Some(source.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordRule {
    pub source: String,
    #[serde(default)]
    pub tgt_units: Option<String>,
}

/// Rules for one model family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixerFamily {
    #[serde(default)]
    pub parent: Option<String>,
    /// Seconds per output step, used to turn accumulations into rates.
    #[serde(default)]
    pub deltat: Option<f64>,
    #[serde(default)]
    pub delete: Vec<String>,
    #[serde(default)]
    pub coords: BTreeMap<String, CoordRule>,
    #[serde(default)]
    pub vars: BTreeMap<String, FixRule>,
}

impl FixerFamily {
    /// Overlays `self` on `parent`: rules and settings here win.
    fn merged_over(&self, parent: &FixerFamily) -> FixerFamily {
        let mut vars = parent.vars.clone();
        vars.extend(self.vars.clone());
        let mut coords = parent.coords.clone();
        coords.extend(self.coords.clone());
        let delete: BTreeSet<String> = parent.delete.iter().chain(&self.delete).cloned().collect();
        FixerFamily {
            parent: None,
            deltat: self.deltat.or(parent.deltat),
            delete: delete.into_iter().collect(),
            coords,
            vars,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FixesFile {
    #[serde(default)]
    fixer_name: BTreeMap<String, FixerFamily>,
}

#[derive(Debug, Clone, Default)]
pub struct FixerTable {
    families: BTreeMap<String, FixerFamily>,
}

impl FixerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every YAML file below `dir`; a missing directory gives an empty table.
    pub fn load(dir: &Path) -> AquaResult<Self> {
        let mut table = Self::new();
        if !dir.is_dir() {
            debug!("fixes directory {} does not exist", dir.display());
            return Ok(table);
        }
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| AquaError::Config(e.to_string()))?;
            if !is_yaml(entry.path()) {
                continue;
            }
            let text = std::fs::read_to_string(entry.path())
                .map_err(|e| AquaError::io(entry.path(), e))?;
            let file: FixesFile = serde_yaml::from_str(&text)
                .map_err(|e| AquaError::Config(format!("{}: {e}", entry.path().display())))?;
            for (name, family) in file.fixer_name {
                if table.families.insert(name.clone(), family).is_some() {
                    warn!("fixer {name} redefined in {}", entry.path().display());
                }
            }
        }
        debug!("loaded {} fixer families", table.families.len());
        Ok(table)
    }

    pub fn insert(&mut self, name: impl Into<String>, family: FixerFamily) {
        self.families.insert(name.into(), family);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.families.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(String::as_str)
    }

    /// The family with its `parent` chain flattened in.
    pub fn resolve(&self, name: &str) -> AquaResult<FixerFamily> {
        let mut chain = Vec::new();
        let mut current = Some(name.to_string());
        while let Some(family_name) = current {
            if chain.contains(&family_name) {
                chain.push(family_name);
                return Err(AquaError::Config(format!(
                    "fixer inheritance cycle: {}",
                    chain.join(" -> ")
                )));
            }
            let family = self
                .families
                .get(&family_name)
                .ok_or_else(|| AquaError::UnknownFixer(family_name.clone()))?;
            current = family.parent.clone();
            chain.push(family_name);
        }

        Ok(chain
            .iter()
            .rev()
            .filter_map(|n| self.families.get(n))
            .fold(FixerFamily::default(), |acc, family| family.merged_over(&acc)))
    }
}
