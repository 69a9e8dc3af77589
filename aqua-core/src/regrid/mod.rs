//! Horizontal regridding with cached weights.
//!
//! A [`Regridder`] maps every variable of a [`Dataset`] from its source grid
//! to a target grid. Weights are generated once per
//! (source, target, method, mask) and shared through a [`WeightsCache`].
//! Vertical levels and time steps are carried through unchanged.

pub mod cache;
pub mod weights;

pub use cache::{WeightsCache, WeightsKey};
pub use weights::{mask_digest, RegridWeights};

use crate::dataset::Dataset;
use crate::errors::{AquaError, AquaResult};
use crate::grid::{GridDescriptor, HorizontalGrid};
use log::{debug, info};
use ndarray::{Array3, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Variable attribute requesting masked weights regardless of the descriptor.
pub const MASKED_ATTR: &str = "regrid_masked";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegridMethod {
    #[default]
    Conservative,
    Nearest,
    Bilinear,
}

impl fmt::Display for RegridMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegridMethod::Conservative => "conservative",
            RegridMethod::Nearest => "nearest",
            RegridMethod::Bilinear => "bilinear",
        };
        write!(f, "{name}")
    }
}

impl FromStr for RegridMethod {
    type Err = AquaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" | "con" | "ycon" => Ok(RegridMethod::Conservative),
            "nearest" | "nn" | "nn_nearest" => Ok(RegridMethod::Nearest),
            "bilinear" | "bil" => Ok(RegridMethod::Bilinear),
            other => Err(AquaError::Config(format!("unknown regrid method '{other}'"))),
        }
    }
}

pub struct Regridder {
    source: HorizontalGrid,
    descriptor: Option<GridDescriptor>,
    target: HorizontalGrid,
    method: RegridMethod,
    cache: Arc<WeightsCache>,
}

impl Regridder {
    pub fn new(
        source: HorizontalGrid,
        target: HorizontalGrid,
        method: RegridMethod,
        cache: Arc<WeightsCache>,
    ) -> Self {
        Self {
            source,
            descriptor: None,
            target,
            method,
            cache,
        }
    }

    /// Attaches the source grid descriptor, which decides which variables
    /// use masked weights and where the mask comes from.
    pub fn with_descriptor(mut self, descriptor: GridDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    pub fn source(&self) -> &HorizontalGrid {
        &self.source
    }

    pub fn target(&self) -> &HorizontalGrid {
        &self.target
    }

    pub fn method(&self) -> RegridMethod {
        self.method
    }

    /// Weights for an optional source validity mask, from the cache when possible.
    pub fn weights(&self, mask: Option<&[bool]>) -> AquaResult<Arc<RegridWeights>> {
        let mut key = WeightsKey::new(&self.source.name, &self.target.name, self.method);
        if let Some(mask) = mask {
            key = key.masked(mask_digest(mask));
        }
        self.cache.get_or_compute(&key, || {
            RegridWeights::compute(&self.source, &self.target, self.method, mask)
        })
    }

    fn is_masked(&self, dataset: &Dataset, variable: &str) -> bool {
        self.descriptor
            .as_ref()
            .is_some_and(|d| d.is_masked(variable))
            || dataset
                .get(variable)
                .is_ok_and(|v| v.attr(MASKED_ATTR) == Some("true"))
    }

    /// Masks for each level of a masked variable: the descriptor's mask file
    /// when it has one, otherwise the non-NaN cells of the first time step.
    fn level_masks(&self, values: &Array3<f64>) -> AquaResult<Vec<Vec<bool>>> {
        let (nt, nl, nc) = values.dim();
        if let Some(descriptor) = &self.descriptor {
            if let Some(mask) = descriptor.load_mask(nc)? {
                return Ok(vec![mask; nl]);
            }
        }
        if nt == 0 {
            return Ok(vec![vec![true; nc]; nl]);
        }
        Ok(values
            .index_axis(Axis(0), 0)
            .outer_iter()
            .map(|level| level.iter().map(|v| !v.is_nan()).collect())
            .collect())
    }

    pub fn regrid(&self, dataset: &Dataset) -> AquaResult<Dataset> {
        if dataset.grid.size() != self.source.size() {
            return Err(AquaError::WeightsMismatch {
                key: format!("{}->{}", self.source.name, self.target.name),
                reason: format!(
                    "dataset grid {} has {} cells, source grid {} has {}",
                    dataset.grid.name,
                    dataset.grid.size(),
                    self.source.name,
                    self.source.size()
                ),
            });
        }
        info!(
            "Regridding {} variables from {} to {} ({})",
            dataset.variables.len(),
            self.source.name,
            self.target.name,
            self.method
        );

        let mut out = dataset.empty_like(self.target.clone(), dataset.time.clone());
        for (name, array) in &dataset.variables {
            let (nt, nl, _) = array.values.dim();
            let mut values = Array3::<f64>::zeros((nt, nl, self.target.size()));

            if self.is_masked(dataset, name) {
                debug!("{name} uses masked weights");
                for (l, mask) in self.level_masks(&array.values)?.iter().enumerate() {
                    let weights = self.weights(Some(mask))?;
                    remap_level(&weights, &array.values, &mut values, l)?;
                }
            } else {
                let weights = self.weights(None)?;
                weights.check_source(array.ncell())?;
                let source = array.values.view();
                Zip::from(values.lanes_mut(Axis(2)))
                    .and(source.lanes(Axis(2)))
                    .par_for_each(|target, source| weights.apply_into(source, target));
            }

            let mut regridded = array.clone();
            regridded.values = values;
            out.insert(regridded)?;
        }
        out.append_history(&format!(
            "regridded from {} to {} with {} weights",
            self.source.name, self.target.name, self.method
        ));
        Ok(out)
    }
}

fn remap_level(
    weights: &RegridWeights,
    source: &Array3<f64>,
    target: &mut Array3<f64>,
    level: usize,
) -> AquaResult<()> {
    weights.check_source(source.dim().2)?;
    let source = source.index_axis(Axis(1), level);
    let mut target = target.index_axis_mut(Axis(1), level);
    Zip::from(target.rows_mut())
        .and(source.rows())
        .par_for_each(|target, source| weights.apply_into(source, target));
    Ok(())
}
