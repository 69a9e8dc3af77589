//! In-memory representation of model output.
//!
//! A [`Dataset`] holds every variable on a single horizontal grid with a
//! shared time axis and an optional vertical axis. Variable values are laid
//! out as `(time, level, cell)`; surface fields have a single level.
//!
//! ```
//! use aqua_core::dataset::{DataArray, Dataset};
//! use aqua_core::grid::HorizontalGrid;
//! use chrono::NaiveDate;
//! use ndarray::Array3;
//!
//! let grid = HorizontalGrid::regular(4, 2).unwrap();
//! let time = vec![NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()];
//! let mut ds = Dataset::new(grid, time);
//! ds.insert(DataArray::new("2t", "K", Array3::from_elem((1, 1, 8), 288.0))).unwrap();
//! assert_eq!(ds.get("2t").unwrap().units(), Some("K"));
//! ```

use crate::errors::{AquaError, AquaResult};
use crate::grid::HorizontalGrid;
use chrono::NaiveDateTime;
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type FloatValue = f64;

/// Attribute holding the units of a variable.
pub const UNITS_ATTR: &str = "units";
/// Dataset attribute accumulating processing steps.
pub const HISTORY_ATTR: &str = "history";

/// A named field with string attributes and `(time, level, cell)` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArray {
    pub name: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(with = "nan_array")]
    pub values: Array3<FloatValue>,
}

impl DataArray {
    pub fn new(name: impl Into<String>, units: &str, values: Array3<FloatValue>) -> Self {
        let mut attrs = BTreeMap::new();
        attrs.insert(UNITS_ATTR.to_string(), units.to_string());
        Self {
            name: name.into(),
            attrs,
            values,
        }
    }

    /// A field without a units attribute.
    pub fn unitless(name: impl Into<String>, values: Array3<FloatValue>) -> Self {
        Self {
            name: name.into(),
            attrs: BTreeMap::new(),
            values,
        }
    }

    pub fn units(&self) -> Option<&str> {
        self.attrs.get(UNITS_ATTR).map(String::as_str)
    }

    pub fn set_units(&mut self, units: &str) {
        self.attrs.insert(UNITS_ATTR.to_string(), units.to_string());
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn ntime(&self) -> usize {
        self.values.len_of(Axis(0))
    }

    pub fn nlevel(&self) -> usize {
        self.values.len_of(Axis(1))
    }

    pub fn ncell(&self) -> usize {
        self.values.len_of(Axis(2))
    }
}

/// Vertical coordinate shared by the 3D variables of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerticalAxis {
    pub name: String,
    pub values: Vec<FloatValue>,
    #[serde(default)]
    pub units: Option<String>,
}

/// Variables on one horizontal grid sharing a time axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub grid: HorizontalGrid,
    pub time: Vec<NaiveDateTime>,
    #[serde(default)]
    pub vertical: Option<VerticalAxis>,
    #[serde(default)]
    pub variables: BTreeMap<String, DataArray>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
}

impl Dataset {
    pub fn new(grid: HorizontalGrid, time: Vec<NaiveDateTime>) -> Self {
        Self {
            grid,
            time,
            vertical: None,
            variables: BTreeMap::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_vertical(mut self, vertical: VerticalAxis) -> Self {
        self.vertical = Some(vertical);
        self
    }

    pub fn nlevel(&self) -> usize {
        self.vertical.as_ref().map_or(1, |v| v.values.len())
    }

    /// Adds or replaces a variable after checking its shape against the axes.
    ///
    /// Single-level variables are always accepted, so surface fields can sit
    /// next to 3D fields.
    pub fn insert(&mut self, array: DataArray) -> AquaResult<()> {
        let (nt, nl, nc) = array.values.dim();
        if nt != self.time.len() {
            return Err(AquaError::Error(format!(
                "variable {} has {} time steps, dataset has {}",
                array.name,
                nt,
                self.time.len()
            )));
        }
        if nl != 1 && nl != self.nlevel() {
            return Err(AquaError::Error(format!(
                "variable {} has {} levels, dataset has {}",
                array.name,
                nl,
                self.nlevel()
            )));
        }
        if nc != self.grid.size() {
            return Err(AquaError::Error(format!(
                "variable {} has {} cells, grid {} has {}",
                array.name,
                nc,
                self.grid.name,
                self.grid.size()
            )));
        }
        self.variables.insert(array.name.clone(), array);
        Ok(())
    }

    pub fn get(&self, name: &str) -> AquaResult<&DataArray> {
        self.variables
            .get(name)
            .ok_or_else(|| AquaError::VariableNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<DataArray> {
        self.variables.remove(name)
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }

    /// Keeps only the named variables; missing names are an error.
    pub fn select_variables<S: AsRef<str>>(&self, names: &[S]) -> AquaResult<Dataset> {
        let mut out = self.empty_like(self.grid.clone(), self.time.clone());
        for name in names {
            out.variables
                .insert(name.as_ref().to_string(), self.get(name.as_ref())?.clone());
        }
        Ok(out)
    }

    /// Keeps time steps with `start <= t <= end`.
    pub fn select_time(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Dataset {
        let indices: Vec<usize> = self
            .time
            .iter()
            .enumerate()
            .filter(|(_, t)| start.is_none_or(|s| **t >= s) && end.is_none_or(|e| **t <= e))
            .map(|(i, _)| i)
            .collect();
        self.take_time(&indices)
    }

    /// Keeps the given time indices, in order.
    pub fn take_time(&self, indices: &[usize]) -> Dataset {
        let time = indices.iter().map(|&i| self.time[i]).collect();
        let mut out = self.empty_like(self.grid.clone(), time);
        for (name, array) in &self.variables {
            let mut taken = array.clone();
            taken.values = array.values.select(Axis(0), indices);
            out.variables.insert(name.clone(), taken);
        }
        out
    }

    /// Joins datasets along time, sorting by timestamp.
    ///
    /// All parts must share the grid, vertical axis and variable names.
    pub fn concat_time(parts: Vec<Dataset>) -> AquaResult<Dataset> {
        let mut parts = parts.into_iter();
        let first = parts
            .next()
            .ok_or_else(|| AquaError::Error("cannot concatenate zero datasets".to_string()))?;
        let mut merged = first;
        for part in parts {
            if part.grid.size() != merged.grid.size() || part.vertical != merged.vertical {
                return Err(AquaError::Error(format!(
                    "cannot concatenate datasets on grids {} and {}",
                    merged.grid.name, part.grid.name
                )));
            }
            if part.variables.keys().ne(merged.variables.keys()) {
                return Err(AquaError::Error(
                    "cannot concatenate datasets with different variables".to_string(),
                ));
            }
            for (name, array) in merged.variables.iter_mut() {
                let other = &part.variables[name];
                array.values = ndarray::concatenate(
                    Axis(0),
                    &[array.values.view(), other.values.view()],
                )
                .map_err(|e| AquaError::Error(format!("concatenating {name}: {e}")))?;
            }
            merged.time.extend(part.time);
        }

        let mut order: Vec<usize> = (0..merged.time.len()).collect();
        order.sort_by_key(|&i| merged.time[i]);
        order.dedup_by_key(|i| merged.time[*i]);
        Ok(merged.take_time(&order))
    }

    /// Joins datasets holding different variables over the same axes.
    ///
    /// Attributes come from the first part. A variable present in several
    /// parts keeps the last one.
    pub fn merge_variables(parts: Vec<Dataset>) -> AquaResult<Dataset> {
        let mut parts = parts.into_iter();
        let mut merged = parts
            .next()
            .ok_or_else(|| AquaError::Error("cannot merge zero datasets".to_string()))?;
        for part in parts {
            if part.grid.size() != merged.grid.size()
                || part.vertical != merged.vertical
                || part.time != merged.time
            {
                return Err(AquaError::Error(format!(
                    "cannot merge {:?} into {:?}: axes differ",
                    part.variable_names(),
                    merged.variable_names()
                )));
            }
            for array in part.variables.into_values() {
                merged.insert(array)?;
            }
        }
        Ok(merged)
    }

    /// A dataset with the same metadata but no variables.
    pub fn empty_like(&self, grid: HorizontalGrid, time: Vec<NaiveDateTime>) -> Dataset {
        Dataset {
            grid,
            time,
            vertical: self.vertical.clone(),
            variables: BTreeMap::new(),
            attrs: self.attrs.clone(),
        }
    }

    pub fn append_history(&mut self, line: &str) {
        let entry = self.attrs.entry(HISTORY_ATTR.to_string()).or_default();
        if !entry.is_empty() {
            entry.push('\n');
        }
        entry.push_str(line);
    }
}

/// Serializes arrays with NaN as `null`, which plain JSON cannot carry.
mod nan_array {
    use ndarray::Array3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Repr {
        shape: (usize, usize, usize),
        data: Vec<Option<f64>>,
    }

    pub fn serialize<S: Serializer>(values: &Array3<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        Repr {
            shape: values.dim(),
            data: values
                .iter()
                .map(|v| if v.is_nan() { None } else { Some(*v) })
                .collect(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Array3<f64>, D::Error> {
        let repr = Repr::deserialize(deserializer)?;
        let data = repr.data.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        Array3::from_shape_vec(repr.shape, data).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn small(times: Vec<NaiveDateTime>, value: f64) -> Dataset {
        let grid = HorizontalGrid::regular(4, 2).unwrap();
        let nt = times.len();
        let mut ds = Dataset::new(grid, times);
        ds.insert(DataArray::new("2t", "K", Array3::from_elem((nt, 1, 8), value)))
            .unwrap();
        ds
    }

    #[test]
    fn insert_rejects_wrong_shape() {
        let mut ds = small(vec![day(1)], 1.0);
        let bad = DataArray::new("x", "K", Array3::zeros((2, 1, 8)));
        assert!(ds.insert(bad).is_err());
        let bad = DataArray::new("x", "K", Array3::zeros((1, 1, 7)));
        assert!(ds.insert(bad).is_err());
    }

    #[test]
    fn select_time_inclusive() {
        let ds = small(vec![day(1), day(2), day(3)], 1.0);
        let sel = ds.select_time(Some(day(2)), Some(day(3)));
        assert_eq!(sel.time, vec![day(2), day(3)]);
        assert_eq!(sel.get("2t").unwrap().ntime(), 2);
    }

    #[test]
    fn concat_sorts_and_drops_duplicates() {
        let a = small(vec![day(3), day(4)], 3.0);
        let b = small(vec![day(1), day(3)], 1.0);
        let merged = Dataset::concat_time(vec![a, b]).unwrap();
        assert_eq!(merged.time, vec![day(1), day(3), day(4)]);
        assert_eq!(merged.get("2t").unwrap().values[[0, 0, 0]], 1.0);
    }

    #[test]
    fn merge_joins_variables_on_shared_axes() {
        let a = small(vec![day(1), day(2)], 1.0);
        let mut b = Dataset::new(a.grid.clone(), a.time.clone());
        b.insert(DataArray::new("msl", "Pa", Array3::from_elem((2, 1, 8), 101325.0)))
            .unwrap();
        let merged = Dataset::merge_variables(vec![a, b]).unwrap();
        assert_eq!(merged.variable_names(), vec!["2t", "msl"]);

        let shifted = small(vec![day(2), day(3)], 1.0);
        assert!(Dataset::merge_variables(vec![merged, shifted]).is_err());
    }

    #[test]
    fn json_keeps_nan() {
        let mut ds = small(vec![day(1)], 1.0);
        ds.variables.get_mut("2t").unwrap().values[[0, 0, 3]] = f64::NAN;
        let text = serde_json::to_string(&ds).unwrap();
        let back: Dataset = serde_json::from_str(&text).unwrap();
        assert!(back.get("2t").unwrap().values[[0, 0, 3]].is_nan());
        assert_eq!(back.get("2t").unwrap().values[[0, 0, 2]], 1.0);
    }

    #[test]
    fn history_accumulates() {
        let mut ds = small(vec![day(1)], 1.0);
        ds.append_history("first");
        ds.append_history("second");
        assert_eq!(ds.attrs[HISTORY_ATTR], "first\nsecond");
    }
}
