//! Harmonizes model-native variables to common names and units.
//!
//! A [`Fixer`] applies one [`FixerFamily`] to a [`Dataset`]: it deletes
//! unwanted variables, renames coordinates, renames and converts variables,
//! computes derived variables and turns accumulations into per-step values.
//! Every fixed variable is tagged with the family name, which makes a second
//! pass a no-op.

pub mod conventions;
pub mod expression;
pub mod table;

pub use expression::Expr;
pub use table::{CoordRule, FixRule, FixerFamily, FixerTable};

use crate::dataset::{DataArray, Dataset};
use crate::errors::{AquaError, AquaResult};
use crate::units::Unit;
use log::{debug, info, warn};
use ndarray::{s, Array3, Axis};
use std::collections::BTreeSet;

/// Attribute recording which fixer produced a variable.
pub const FIXER_ATTR: &str = "fixer_name";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixerOptions {
    /// Missing constituents of a derived variable are an error instead of a warning.
    pub strict: bool,
}

#[derive(Debug, Clone)]
pub struct Fixer {
    name: String,
    family: FixerFamily,
    options: FixerOptions,
}

impl Fixer {
    pub fn new(table: &FixerTable, name: &str, options: FixerOptions) -> AquaResult<Self> {
        Ok(Self {
            name: name.to_string(),
            family: table.resolve(name)?,
            options,
        })
    }

    pub fn from_family(name: &str, family: FixerFamily, options: FixerOptions) -> Self {
        Self {
            name: name.to_string(),
            family,
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> &FixerFamily {
        &self.family
    }

    /// Source variables needed to produce the requested fixed variables.
    ///
    /// Names without a rule are passed through.
    pub fn source_variables<S: AsRef<str>>(&self, targets: &[S]) -> Vec<String> {
        let mut sources = BTreeSet::new();
        for target in targets {
            let target = target.as_ref();
            match self.family.vars.get(target) {
                Some(FixRule {
                    derived: Some(formula),
                    ..
                }) => match Expr::parse(formula) {
                    Ok(expr) => sources.extend(expr.variables()),
                    Err(e) => warn!("{target}: {e}"),
                },
                Some(rule) => {
                    sources.insert(rule.source.clone().unwrap_or_else(|| target.to_string()));
                }
                None => {
                    sources.insert(target.to_string());
                }
            }
        }
        sources.into_iter().collect()
    }

    fn is_fixed(&self, dataset: &Dataset, name: &str) -> bool {
        dataset
            .get(name)
            .is_ok_and(|v| v.attr(FIXER_ATTR) == Some(self.name.as_str()))
    }

    /// Seconds per step: the family's `deltat`, else the data's time step.
    fn deltat(&self, dataset: &Dataset) -> Option<f64> {
        self.family.deltat.or_else(|| match dataset.time.as_slice() {
            [first, second, ..] => {
                let step = (*second - *first).num_seconds() as f64;
                debug!("no deltat for fixer {}, using time step of {step} s", self.name);
                (step > 0.0).then_some(step)
            }
            _ => None,
        })
    }

    pub fn apply(&self, mut dataset: Dataset) -> AquaResult<Dataset> {
        let mut changed = false;

        for name in &self.family.delete {
            changed |= dataset.remove(name).is_some();
        }
        changed |= self.fix_coords(&mut dataset)?;

        let deltat = self.deltat(&dataset);
        let pending: Vec<(&String, &FixRule)> = self
            .family
            .vars
            .iter()
            .filter(|(target, _)| !self.is_fixed(&dataset, target))
            .collect();

        // Formulas read the variables as they came from the source.
        let mut derived = Vec::new();
        for (target, rule) in pending.iter().filter(|(_, r)| r.derived.is_some()) {
            let formula = rule.derived.as_deref().unwrap_or_default();
            if let Some(array) = self.derive(&dataset, target, formula, rule)? {
                derived.push(self.fix_variable(array, target, rule, deltat)?);
            }
        }

        for (target, rule) in pending.iter().filter(|(_, r)| r.derived.is_none()) {
            let source = rule.source.as_deref().unwrap_or(target.as_str());
            let Some(array) = dataset.remove(source) else {
                debug!("{source} not in dataset, skipping {target}");
                continue;
            };
            dataset.insert(self.fix_variable(array, target, rule, deltat)?)?;
            changed = true;
        }
        for array in derived {
            dataset.insert(array)?;
            changed = true;
        }

        if changed {
            info!("Applied fixer {}", self.name);
            dataset.append_history(&format!("fixed with {}", self.name));
        }
        Ok(dataset)
    }

    fn fix_coords(&self, dataset: &mut Dataset) -> AquaResult<bool> {
        let Some(vertical) = dataset.vertical.as_mut() else {
            return Ok(false);
        };
        let Some((target, rule)) = self.family.coords.iter().find(|(_, r)| r.source == vertical.name)
        else {
            return Ok(false);
        };
        let mut changed = vertical.name != *target;
        vertical.name = target.clone();
        if let (Some(from), Some(to)) = (vertical.units.as_deref(), rule.tgt_units.as_deref()) {
            let conversion = Unit::parse(from)?.conversion_to(&Unit::parse(to)?)?;
            if !conversion.is_identity() {
                vertical.values.iter_mut().for_each(|v| *v = conversion.apply(*v));
            }
            changed |= !conversion.is_identity() || from != to;
            vertical.units = Some(to.to_string());
        }
        Ok(changed)
    }

    fn derive(
        &self,
        dataset: &Dataset,
        target: &str,
        formula: &str,
        rule: &FixRule,
    ) -> AquaResult<Option<DataArray>> {
        let expr = Expr::parse(formula)?;
        let missing: Vec<String> = expr
            .variables()
            .into_iter()
            .filter(|v| !dataset.contains(v))
            .collect();
        if !missing.is_empty() {
            if self.options.strict {
                return Err(AquaError::MissingConstituent {
                    variable: target.to_string(),
                    missing,
                });
            }
            warn!("Cannot derive {target}, missing {missing:?}; skipping");
            return Ok(None);
        }

        let values = expr.evaluate(&|name| dataset.variables.get(name).map(|v| &v.values))?;
        let mut array = DataArray::unitless(target, values);
        if let Some(units) = rule.src_units.as_deref().or(rule.units.as_deref()) {
            array.set_units(units);
        }
        Ok(Some(array))
    }

    fn fix_variable(
        &self,
        mut array: DataArray,
        target: &str,
        rule: &FixRule,
        deltat: Option<f64>,
    ) -> AquaResult<DataArray> {
        let param = conventions::lookup(target);
        array.name = target.to_string();

        if rule.decumulate {
            array.values = decumulate(&array.values);
        }

        let from = rule.src_units.clone().or_else(|| array.units().map(String::from));
        let to = rule
            .units
            .clone()
            .or_else(|| param.map(|p| p.units.to_string()));
        match (from, to) {
            (Some(from), Some(to)) => {
                let conversion = Unit::parse(&from)?.conversion_with_rates(&Unit::parse(&to)?, deltat)?;
                if !conversion.is_identity() {
                    debug!("{target}: converting {from} to {to} ({conversion:?})");
                    array.values.mapv_inplace(|v| conversion.apply(v));
                }
                array.set_units(&to);
            }
            (None, Some(to)) => array.set_units(&to),
            (Some(from), None) => array.set_units(&from),
            (None, None) => {}
        }

        if let Some(param) = param {
            array
                .attrs
                .insert("paramId".to_string(), param.param_id.to_string());
            array
                .attrs
                .insert("long_name".to_string(), param.long_name.to_string());
            if let Some(standard_name) = param.standard_name {
                array
                    .attrs
                    .insert("standard_name".to_string(), standard_name.to_string());
            }
        }
        array.attrs.extend(rule.attributes.clone());
        array.attrs.insert(FIXER_ATTR.to_string(), self.name.clone());
        Ok(array)
    }
}

/// Per-step increments of an accumulated field.
///
/// The first step has no predecessor and becomes NaN. A negative increment
/// marks an accumulation reset, where the raw value is the increment.
pub fn decumulate(values: &Array3<f64>) -> Array3<f64> {
    let mut out = values.clone();
    if values.len_of(Axis(0)) == 0 {
        return out;
    }
    let previous = values.slice(s![..-1, .., ..]);
    let current = values.slice(s![1.., .., ..]);
    ndarray::Zip::from(out.slice_mut(s![1.., .., ..]))
        .and(&current)
        .and(&previous)
        .for_each(|o, &c, &p| {
            let step = c - p;
            *o = if step < 0.0 { c } else { step };
        });
    out.index_axis_mut(Axis(0), 0).fill(f64::NAN);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::VerticalAxis;
    use crate::grid::HorizontalGrid;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::collections::BTreeMap;

    fn hours(n: u32) -> Vec<NaiveDateTime> {
        (0..n)
            .map(|h| {
                NaiveDate::from_ymd_opt(2020, 1, 1)
                    .unwrap()
                    .and_hms_opt(h, 0, 0)
                    .unwrap()
            })
            .collect()
    }

    fn raw_dataset() -> Dataset {
        let grid = HorizontalGrid::regular(4, 2).unwrap();
        let mut ds = Dataset::new(grid, hours(3));
        ds.insert(DataArray::new("var167", "degC", Array3::from_elem((3, 1, 8), 15.0)))
            .unwrap();
        let accumulated = Array3::from_shape_fn((3, 1, 8), |(t, _, _)| 0.0036 * t as f64);
        ds.insert(DataArray::new("tp", "m", accumulated)).unwrap();
        ds.insert(DataArray::new("lsm", "1", Array3::zeros((3, 1, 8))))
            .unwrap();
        ds
    }

    fn family() -> FixerFamily {
        FixerFamily {
            deltat: Some(3600.0),
            delete: vec!["lsm".to_string()],
            vars: BTreeMap::from([
                ("2t".to_string(), FixRule::renaming("var167")),
                (
                    "tprate".to_string(),
                    FixRule {
                        source: Some("tp".to_string()),
                        decumulate: true,
                        ..FixRule::default()
                    },
                ),
                (
                    "2t_f".to_string(),
                    FixRule {
                        derived: Some("var167 * 9 / 5 + 32".to_string()),
                        units: Some("1".to_string()),
                        ..FixRule::default()
                    },
                ),
            ]),
            ..FixerFamily::default()
        }
    }

    #[test]
    fn renames_converts_and_tags() {
        let fixer = Fixer::from_family("ifs-test", family(), FixerOptions::default());
        let fixed = fixer.apply(raw_dataset()).unwrap();

        assert!(!fixed.contains("var167"));
        assert!(!fixed.contains("lsm"));
        let t2 = fixed.get("2t").unwrap();
        assert_eq!(t2.units(), Some("K"));
        assert!((t2.values[[0, 0, 0]] - 288.15).abs() < 1e-9);
        assert_eq!(t2.attr("paramId"), Some("167"));
        assert_eq!(t2.attr(FIXER_ATTR), Some("ifs-test"));

        // 3.6 mm per hour of water is 1e-3 kg m-2 s-1.
        let tprate = fixed.get("tprate").unwrap();
        assert_eq!(tprate.units(), Some("kg m-2 s-1"));
        assert!(tprate.values[[0, 0, 0]].is_nan());
        assert!((tprate.values[[2, 0, 5]] - 1e-3).abs() < 1e-12);
        assert!(fixed.attrs["history"].contains("ifs-test"));
    }

    #[test]
    fn derived_variable_from_raw_constituents() {
        let fixer = Fixer::from_family("ifs-test", family(), FixerOptions::default());
        let fixed = fixer.apply(raw_dataset()).unwrap();
        let fahrenheit = fixed.get("2t_f").unwrap();
        assert!((fahrenheit.values[[1, 0, 3]] - 59.0).abs() < 1e-9);
        assert_eq!(fahrenheit.units(), Some("1"));
    }

    #[test]
    fn fixing_twice_changes_nothing() {
        let fixer = Fixer::from_family("ifs-test", family(), FixerOptions::default());
        let once = fixer.apply(raw_dataset()).unwrap();
        let twice = fixer.apply(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn pressure_levels_converted_once() {
        let mut family = family();
        family.coords.insert(
            "plev".to_string(),
            CoordRule {
                source: "plev".to_string(),
                tgt_units: Some("Pa".to_string()),
            },
        );
        let fixer = Fixer::from_family("ifs-test", family, FixerOptions::default());
        let raw = raw_dataset().with_vertical(VerticalAxis {
            name: "plev".to_string(),
            values: vec![850.0],
            units: Some("hPa".to_string()),
        });

        let once = fixer.apply(raw).unwrap();
        let plev = once.vertical.as_ref().unwrap();
        assert_eq!(plev.values, vec![85000.0]);
        assert_eq!(plev.units.as_deref(), Some("Pa"));

        let twice = fixer.apply(once.clone()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.attrs["history"], "fixed with ifs-test");
    }

    #[test]
    fn strict_missing_constituent() {
        let mut family = family();
        family.vars.insert(
            "net".to_string(),
            FixRule {
                derived: Some("ssr + str".to_string()),
                ..FixRule::default()
            },
        );
        let lenient = Fixer::from_family("f", family.clone(), FixerOptions::default());
        assert!(!lenient.apply(raw_dataset()).unwrap().contains("net"));

        let strict = Fixer::from_family("f", family, FixerOptions { strict: true });
        match strict.apply(raw_dataset()) {
            Err(AquaError::MissingConstituent { variable, missing }) => {
                assert_eq!(variable, "net");
                assert_eq!(missing, vec!["ssr".to_string(), "str".to_string()]);
            }
            other => panic!("expected MissingConstituent, got {other:?}"),
        }
    }

    #[test]
    fn source_variables_map_back() {
        let fixer = Fixer::from_family("ifs-test", family(), FixerOptions::default());
        assert_eq!(
            fixer.source_variables(&["2t", "tprate", "msl"]),
            vec!["msl".to_string(), "tp".to_string(), "var167".to_string()]
        );
    }

    #[test]
    fn decumulate_handles_resets() {
        let acc = Array3::from_shape_vec((4, 1, 1), vec![0.0, 2.0, 5.0, 1.0]).unwrap();
        let out = decumulate(&acc);
        assert!(out[[0, 0, 0]].is_nan());
        assert_eq!(out[[1, 0, 0]], 2.0);
        assert_eq!(out[[2, 0, 0]], 3.0);
        assert_eq!(out[[3, 0, 0]], 1.0);
    }
}
