//! Time and field means.
//!
//! All means skip NaN: a group or region with no valid samples is NaN.

use crate::dataset::Dataset;
use crate::errors::{AquaError, AquaResult};
use crate::grid::HorizontalGrid;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use log::{debug, warn};
use ndarray::{Array2, Array3, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Monthly,
    Annual,
}

impl FromStr for Frequency {
    type Err = AquaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" | "h" | "1h" | "H" | "1H" => Ok(Frequency::Hourly),
            "daily" | "d" | "1d" | "D" | "1D" | "day" => Ok(Frequency::Daily),
            "monthly" | "M" | "1M" | "mon" | "MS" => Ok(Frequency::Monthly),
            "annual" | "yearly" | "Y" | "1Y" | "YS" | "year" => Ok(Frequency::Annual),
            other => Err(AquaError::Config(format!("unknown frequency '{other}'"))),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Monthly => "monthly",
            Frequency::Annual => "annual",
        };
        write!(f, "{name}")
    }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

impl Frequency {
    /// Start of the period containing `t`.
    pub fn period_start(&self, t: NaiveDateTime) -> NaiveDateTime {
        let date = t.date();
        match self {
            Frequency::Hourly => midnight(date) + chrono::Duration::hours(i64::from(t.hour())),
            Frequency::Daily => midnight(date),
            Frequency::Monthly => midnight(date.with_day(1).unwrap_or(date)),
            Frequency::Annual => midnight(
                NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
            ),
        }
    }

    /// Length in seconds of the period starting at `start`.
    pub fn period_seconds(&self, start: NaiveDateTime) -> i64 {
        match self {
            Frequency::Hourly => 3600,
            Frequency::Daily => 86400,
            Frequency::Monthly => {
                let date = start.date();
                let next = if date.month() == 12 {
                    NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
                };
                next.map_or(31 * 86400, |n| (n - date).num_seconds())
            }
            Frequency::Annual => {
                let days = if NaiveDate::from_ymd_opt(start.year(), 2, 29).is_some() {
                    366
                } else {
                    365
                };
                days * 86400
            }
        }
    }
}

/// Most common spacing between consecutive time steps, in seconds.
pub fn infer_time_step(time: &[NaiveDateTime]) -> Option<i64> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for pair in time.windows(2) {
        let step = (pair[1] - pair[0]).num_seconds();
        if step > 0 {
            *counts.entry(step).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|&(step, count)| (count, std::cmp::Reverse(step)))
        .map(|(step, _)| step)
}

/// NaN-skipping mean over the given time indices, shape `(level, cell)`.
fn nanmean_over(values: ArrayView3<f64>, indices: &[usize]) -> Array2<f64> {
    let (_, nl, nc) = values.dim();
    let mut sum = Array2::<f64>::zeros((nl, nc));
    let mut count = Array2::<f64>::zeros((nl, nc));
    for &t in indices {
        Zip::from(&mut sum)
            .and(&mut count)
            .and(values.index_axis(Axis(0), t))
            .for_each(|s, c, &v| {
                if !v.is_nan() {
                    *s += v;
                    *c += 1.0;
                }
            });
    }
    Zip::from(&mut sum).and(&count).for_each(|s, &c| {
        *s = if c > 0.0 { *s / c } else { f64::NAN };
    });
    sum
}

/// Averages every variable over the given groups of time indices.
fn mean_over_groups(
    dataset: &Dataset,
    labels: Vec<NaiveDateTime>,
    groups: &[Vec<usize>],
) -> AquaResult<Dataset> {
    let mut out = dataset.empty_like(dataset.grid.clone(), labels);
    for array in dataset.variables.values() {
        let (_, nl, nc) = array.values.dim();
        let mut values = Array3::<f64>::zeros((groups.len(), nl, nc));
        for (g, indices) in groups.iter().enumerate() {
            values
                .index_axis_mut(Axis(0), g)
                .assign(&nanmean_over(array.values.view(), indices));
        }
        let mut averaged = array.clone();
        averaged.values = values;
        out.insert(averaged)?;
    }
    Ok(out)
}

/// Means over calendar periods of `freq`.
///
/// With `exclude_incomplete`, periods holding fewer samples than the data's
/// time step implies are dropped.
pub fn time_mean(dataset: &Dataset, freq: Frequency, exclude_incomplete: bool) -> AquaResult<Dataset> {
    let mut groups: BTreeMap<NaiveDateTime, Vec<usize>> = BTreeMap::new();
    for (i, t) in dataset.time.iter().enumerate() {
        groups.entry(freq.period_start(*t)).or_default().push(i);
    }

    if exclude_incomplete {
        match infer_time_step(&dataset.time) {
            Some(step) => groups.retain(|start, indices| {
                let expected = (freq.period_seconds(*start) / step) as usize;
                let complete = indices.len() >= expected;
                if !complete {
                    debug!(
                        "dropping incomplete {freq} period {start}: {} of {expected} samples",
                        indices.len()
                    );
                }
                complete
            }),
            None => warn!("cannot infer the time step; keeping all {freq} periods"),
        }
    }

    let (labels, indices): (Vec<_>, Vec<_>) = groups.into_iter().unzip();
    let mut out = mean_over_groups(dataset, labels, &indices)?;
    out.append_history(&format!("{freq} mean"));
    Ok(out)
}

/// Mean over the whole period, labelled with the first time step.
pub fn timmean(dataset: &Dataset) -> AquaResult<Dataset> {
    let Some(first) = dataset.time.first() else {
        return Err(AquaError::Time("cannot average an empty time axis".to_string()));
    };
    let all: Vec<usize> = (0..dataset.time.len()).collect();
    let mut out = mean_over_groups(dataset, vec![*first], &[all])?;
    out.append_history("time mean over the full period");
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Season {
    DJF,
    MAM,
    JJA,
    SON,
}

impl Season {
    pub fn of(t: NaiveDateTime) -> Self {
        match t.month() {
            12 | 1 | 2 => Season::DJF,
            3..=5 => Season::MAM,
            6..=8 => Season::JJA,
            _ => Season::SON,
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Attribute listing the season of each step of a seasonal climatology.
pub const SEASONS_ATTR: &str = "seasons";

/// DJF/MAM/JJA/SON climatology over all years.
///
/// Each present season becomes one step, labelled with its first sample
/// time; the `seasons` attribute lists them in order.
pub fn seasonal_mean(dataset: &Dataset) -> AquaResult<Dataset> {
    let mut groups: BTreeMap<Season, Vec<usize>> = BTreeMap::new();
    for (i, t) in dataset.time.iter().enumerate() {
        groups.entry(Season::of(*t)).or_default().push(i);
    }
    let seasons: Vec<String> = groups.keys().map(Season::to_string).collect();
    let labels = groups.values().map(|idx| dataset.time[idx[0]]).collect();
    let indices: Vec<Vec<usize>> = groups.into_values().collect();
    let mut out = mean_over_groups(dataset, labels, &indices)?;
    out.attrs.insert(SEASONS_ATTR.to_string(), seasons.join(","));
    out.append_history("seasonal climatology");
    Ok(out)
}

/// A lat/lon box in degrees; longitudes may wrap through 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl Region {
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        if lat < self.lat_min || lat > self.lat_max {
            return false;
        }
        if self.lon_max - self.lon_min >= 360.0 {
            return true;
        }
        let lon = lon.rem_euclid(360.0);
        let (lo, hi) = (self.lon_min.rem_euclid(360.0), self.lon_max.rem_euclid(360.0));
        if lo <= hi {
            lon >= lo && lon <= hi
        } else {
            lon >= lo || lon <= hi
        }
    }
}

/// Area-weighted mean of each `(time, level)` slice, shape `(time, level)`.
pub fn weighted_field_mean(
    values: ArrayView3<f64>,
    grid: &HorizontalGrid,
    region: Option<&Region>,
) -> AquaResult<Array2<f64>> {
    let mut weights = grid.area_weights();
    if let Some(region) = region {
        let mut selected = 0;
        for (c, w) in weights.iter_mut().enumerate() {
            if region.contains(grid.lat[c], grid.lon[c]) {
                selected += 1;
            } else {
                *w = 0.0;
            }
        }
        if selected == 0 {
            return Err(AquaError::Error(format!(
                "region {region:?} selects no cells of grid {}",
                grid.name
            )));
        }
    }

    let (nt, nl, _) = values.dim();
    Ok(Array2::from_shape_fn((nt, nl), |(t, l)| {
        let mut sum = 0.0;
        let mut total = 0.0;
        for (&v, &w) in values.slice(ndarray::s![t, l, ..]).iter().zip(weights.iter()) {
            if w > 0.0 && !v.is_nan() {
                sum += w * v;
                total += w;
            }
        }
        if total > 0.0 {
            sum / total
        } else {
            f64::NAN
        }
    }))
}

/// Area-weighted spatial mean; the result lives on a one-cell grid.
pub fn field_mean(dataset: &Dataset, region: Option<&Region>) -> AquaResult<Dataset> {
    let (lat, lon) = region.map_or((0.0, 0.0), |r| {
        ((r.lat_min + r.lat_max) / 2.0, (r.lon_min + r.lon_max) / 2.0)
    });
    let grid = HorizontalGrid::unstructured("field_mean", vec![lat], vec![lon], None)?;
    let mut out = dataset.empty_like(grid, dataset.time.clone());
    for array in dataset.variables.values() {
        let means = weighted_field_mean(array.values.view(), &dataset.grid, region)?;
        let mut averaged = array.clone();
        averaged.values = means.insert_axis(Axis(2));
        out.insert(averaged)?;
    }
    out.append_history(&match region {
        Some(r) => format!(
            "field mean over lat {}..{}, lon {}..{}",
            r.lat_min, r.lat_max, r.lon_min, r.lon_max
        ),
        None => "global field mean".to_string(),
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DataArray;
    use is_close::is_close;

    fn hourly(days: i64) -> Vec<NaiveDateTime> {
        let start = midnight(NaiveDate::from_ymd_opt(2020, 1, 30).unwrap());
        (0..days * 24)
            .map(|h| start + chrono::Duration::hours(h))
            .collect()
    }

    fn ramp(time: Vec<NaiveDateTime>) -> Dataset {
        let nt = time.len();
        let mut ds = Dataset::new(HorizontalGrid::regular(4, 2).unwrap(), time);
        let values = Array3::from_shape_fn((nt, 1, 8), |(t, _, _)| t as f64);
        ds.insert(DataArray::new("2t", "K", values)).unwrap();
        ds
    }

    #[test]
    fn frequency_names() {
        assert_eq!("1M".parse::<Frequency>().unwrap(), Frequency::Monthly);
        assert_eq!("daily".parse::<Frequency>().unwrap(), Frequency::Daily);
        assert!("weekly".parse::<Frequency>().is_err());
    }

    #[test]
    fn daily_means_of_hourly_data() {
        let ds = ramp(hourly(3));
        let out = time_mean(&ds, Frequency::Daily, false).unwrap();
        assert_eq!(out.time.len(), 3);
        // Mean of 0..24 is 11.5.
        assert_eq!(out.get("2t").unwrap().values[[0, 0, 0]], 11.5);
        assert_eq!(out.get("2t").unwrap().values[[2, 0, 7]], 59.5);
    }

    #[test]
    fn incomplete_months_are_dropped() {
        // Jan 30 to Feb 29 2020 hourly: January incomplete, February complete.
        let ds = ramp(hourly(31));
        let all = time_mean(&ds, Frequency::Monthly, false).unwrap();
        assert_eq!(all.time.len(), 2);
        let complete = time_mean(&ds, Frequency::Monthly, true).unwrap();
        assert_eq!(complete.time.len(), 1);
        assert_eq!(complete.time[0].month(), 2);
    }

    #[test]
    fn nan_samples_are_skipped() {
        let mut ds = ramp(hourly(1));
        let values = &mut ds.variables.get_mut("2t").unwrap().values;
        values.slice_mut(ndarray::s![..12, .., 0]).fill(f64::NAN);
        values.slice_mut(ndarray::s![.., .., 1]).fill(f64::NAN);
        let out = timmean(&ds).unwrap();
        let mean = &out.get("2t").unwrap().values;
        assert_eq!(mean[[0, 0, 0]], 17.5);
        assert!(mean[[0, 0, 1]].is_nan());
    }

    #[test]
    fn seasons() {
        let time: Vec<NaiveDateTime> = (1..=12)
            .map(|m| midnight(NaiveDate::from_ymd_opt(2021, m, 15).unwrap()))
            .collect();
        let out = seasonal_mean(&ramp(time)).unwrap();
        assert_eq!(out.attrs[SEASONS_ATTR], "DJF,MAM,JJA,SON");
        // DJF is Jan, Feb, Dec: indices 0, 1, 11.
        assert_eq!(out.get("2t").unwrap().values[[0, 0, 0]], 4.0);
    }

    #[test]
    fn constant_field_mean() {
        for grid in [
            HorizontalGrid::regular(36, 18).unwrap(),
            HorizontalGrid::healpix(4, true).unwrap(),
            HorizontalGrid::unstructured("u", vec![-60.0, 0.0, 10.0, 89.0], vec![0.0, 1.0, 2.0, 3.0], None)
                .unwrap(),
        ] {
            let n = grid.size();
            let values = Array3::from_elem((2, 1, n), 273.15);
            let means = weighted_field_mean(values.view(), &grid, None).unwrap();
            assert!(means.iter().all(|m| is_close!(*m, 273.15)), "{}", grid.name);
        }
    }

    #[test]
    fn region_selection() {
        let grid = HorizontalGrid::regular(4, 2).unwrap();
        let values = Array3::from_shape_fn((1, 1, 8), |(_, _, c)| if c < 4 { 1.0 } else { 3.0 });
        let north = Region::new(0.0, 90.0, 0.0, 360.0);
        let means = weighted_field_mean(values.view(), &grid, Some(&north)).unwrap();
        assert_eq!(means[[0, 0]], 3.0);
        let global = weighted_field_mean(values.view(), &grid, None).unwrap();
        assert!(is_close!(global[[0, 0]], 2.0));
        assert!(weighted_field_mean(values.view(), &grid, Some(&Region::new(10.0, 20.0, 100.0, 110.0))).is_err());
    }

    #[test]
    fn wrapping_longitudes() {
        let region = Region::new(-90.0, 90.0, 350.0, 10.0);
        assert!(region.contains(0.0, 355.0));
        assert!(region.contains(0.0, 5.0));
        assert!(region.contains(0.0, -5.0));
        assert!(!region.contains(0.0, 180.0));
    }

    #[test]
    fn field_mean_dataset() {
        let ds = ramp(hourly(1));
        let out = field_mean(&ds, None).unwrap();
        assert_eq!(out.grid.size(), 1);
        assert_eq!(out.get("2t").unwrap().values.dim(), (24, 1, 1));
        assert!(is_close!(out.get("2t").unwrap().values[[5, 0, 0]], 5.0));
    }
}
