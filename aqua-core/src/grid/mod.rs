//! Horizontal grids and their descriptors.
//!
//! A [`HorizontalGrid`] is the list of cell centres a dataset lives on,
//! flattened to one `cell` dimension. Three families are supported:
//!
//! - [`GridKind::Regular`]: global lon-lat grids in CDO layout (`r360x180`),
//!   latitudes south to north at cell centres, longitudes from 0 eastward,
//!   stored row by row
//! - [`GridKind::Healpix`]: equal-area HEALPix pixels in ring or nested order
//! - [`GridKind::Unstructured`]: arbitrary cell centres read from a file
//!
//! Grids are named either by a CDO-style specification (`r360x180`), the
//! shorthand `rNNN` (hundredths of a degree, `r100` is 1°), `hpz<zoom>` /
//! `hpz<zoom>_ring` or `healpix<nside>`, or through a [`GridDescriptor`].

pub mod descriptor;
pub mod healpix;

pub use descriptor::{GridDescriptor, GridRegistry, MaskSpec};

use crate::errors::{AquaError, AquaResult};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Mean Earth radius in metres.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Finest HEALPix refinement whose pixel indices fit in 64 bits.
pub const MAX_HEALPIX_ZOOM: u32 = 29;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridKind {
    Regular { nlon: usize, nlat: usize },
    Healpix { nside: usize, nested: bool },
    Unstructured,
}

/// Cell centres (degrees) of a horizontal grid, with optional cell areas (m²).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizontalGrid {
    pub name: String,
    pub kind: GridKind,
    pub lat: Array1<f64>,
    pub lon: Array1<f64>,
    #[serde(default)]
    pub cell_area: Option<Array1<f64>>,
}

/// On-disk layout of an unstructured grid definition.
#[derive(Debug, Deserialize)]
struct UnstructuredFile {
    lat: Vec<f64>,
    lon: Vec<f64>,
    #[serde(default)]
    cell_area: Option<Vec<f64>>,
}

impl HorizontalGrid {
    /// A global regular grid with `nlon` x `nlat` cells.
    pub fn regular(nlon: usize, nlat: usize) -> AquaResult<Self> {
        if nlon == 0 || nlat == 0 {
            return Err(AquaError::MalformedGrid {
                grid: format!("r{nlon}x{nlat}"),
                reason: "regular grid needs at least one cell per axis".to_string(),
            });
        }
        let dlon = 360.0 / nlon as f64;
        let dlat = 180.0 / nlat as f64;
        let mut lat = Vec::with_capacity(nlon * nlat);
        let mut lon = Vec::with_capacity(nlon * nlat);
        for j in 0..nlat {
            let phi = -90.0 + (j as f64 + 0.5) * dlat;
            for i in 0..nlon {
                lat.push(phi);
                lon.push(i as f64 * dlon);
            }
        }
        Ok(Self {
            name: format!("r{nlon}x{nlat}"),
            kind: GridKind::Regular { nlon, nlat },
            lat: Array1::from(lat),
            lon: Array1::from(lon),
            cell_area: None,
        })
    }

    /// A HEALPix grid with `12 * nside²` pixels.
    pub fn healpix(nside: usize, nested: bool) -> AquaResult<Self> {
        if nside == 0 || !nside.is_power_of_two() {
            return Err(AquaError::MalformedGrid {
                grid: format!("healpix{nside}"),
                reason: "nside must be a power of two".to_string(),
            });
        }
        if nside > 1 << MAX_HEALPIX_ZOOM {
            return Err(AquaError::MalformedGrid {
                grid: format!("healpix{nside}"),
                reason: format!("nside above 2^{MAX_HEALPIX_ZOOM}"),
            });
        }
        let (lat, lon): (Vec<f64>, Vec<f64>) = (0..healpix::npix(nside))
            .map(|p| {
                let ring = if nested {
                    healpix::nest2ring(nside, p)
                } else {
                    p
                };
                healpix::pix2ang_ring(nside, ring)
            })
            .unzip();
        let suffix = if nested { "nested" } else { "ring" };
        Ok(Self {
            name: format!("healpix{nside}_{suffix}"),
            kind: GridKind::Healpix { nside, nested },
            lat: Array1::from(lat),
            lon: Array1::from(lon),
            cell_area: None,
        })
    }

    pub fn unstructured(
        name: impl Into<String>,
        lat: Vec<f64>,
        lon: Vec<f64>,
        cell_area: Option<Vec<f64>>,
    ) -> AquaResult<Self> {
        let name = name.into();
        if lat.len() != lon.len() || lat.is_empty() {
            return Err(AquaError::MalformedGrid {
                grid: name,
                reason: format!("{} latitudes for {} longitudes", lat.len(), lon.len()),
            });
        }
        if let Some(area) = &cell_area {
            if area.len() != lat.len() {
                return Err(AquaError::MalformedGrid {
                    grid: name,
                    reason: format!("{} cell areas for {} cells", area.len(), lat.len()),
                });
            }
        }
        Ok(Self {
            name,
            kind: GridKind::Unstructured,
            lat: Array1::from(lat),
            lon: Array1::from(lon),
            cell_area: cell_area.map(Array1::from),
        })
    }

    /// Reads an unstructured grid from a JSON file with `lat`, `lon` and
    /// optional `cell_area` arrays.
    pub fn from_file(name: &str, path: &Path) -> AquaResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AquaError::io(path, e))?;
        let file: UnstructuredFile =
            serde_json::from_str(&text).map_err(|e| AquaError::MalformedGrid {
                grid: name.to_string(),
                reason: format!("{}: {e}", path.display()),
            })?;
        Self::unstructured(name, file.lat, file.lon, file.cell_area)
    }

    /// Builds a grid from a textual specification, or `None` when the text
    /// is not a recognised specification.
    ///
    /// ```
    /// use aqua_core::grid::{GridKind, HorizontalGrid};
    ///
    /// let grid = HorizontalGrid::from_spec("r100").unwrap().unwrap();
    /// assert_eq!(grid.kind, GridKind::Regular { nlon: 360, nlat: 180 });
    /// assert!(HorizontalGrid::from_spec("tco79").unwrap().is_none());
    /// ```
    pub fn from_spec(spec: &str) -> AquaResult<Option<Self>> {
        let malformed = |reason: &str| AquaError::MalformedGrid {
            grid: spec.to_string(),
            reason: reason.to_string(),
        };

        if let Some(rest) = spec.strip_prefix("hpz") {
            let (zoom, nested) = match rest.split_once('_') {
                Some((zoom, "nested")) => (zoom, true),
                Some((zoom, "ring")) => (zoom, false),
                Some(_) => return Err(malformed("expected hpz<zoom>[_nested|_ring]")),
                None => (rest, true),
            };
            let zoom: u32 = zoom.parse().map_err(|_| malformed("invalid zoom"))?;
            if zoom > MAX_HEALPIX_ZOOM {
                return Err(malformed("zoom above 29"));
            }
            let grid = Self::healpix(1usize << zoom, nested)?;
            return Ok(Some(grid.renamed(spec)));
        }

        if let Some(rest) = spec.strip_prefix("healpix") {
            let nside: usize = rest.parse().map_err(|_| malformed("invalid nside"))?;
            return Ok(Some(Self::healpix(nside, false)?.renamed(spec)));
        }

        let Some(rest) = spec.strip_prefix('r') else {
            return Ok(None);
        };
        if let Some((nlon, nlat)) = rest.split_once('x') {
            return match (nlon.parse(), nlat.parse()) {
                (Ok(nlon), Ok(nlat)) => Ok(Some(Self::regular(nlon, nlat)?.renamed(spec))),
                _ => Ok(None),
            };
        }
        if rest.len() == 3 && rest.chars().all(|c| c.is_ascii_digit()) {
            let hundredths: usize = rest.parse().map_err(|_| malformed("invalid resolution"))?;
            if hundredths == 0 || 36000 % hundredths != 0 || 18000 % hundredths != 0 {
                return Err(malformed("resolution must divide 180 degrees"));
            }
            let grid = Self::regular(36000 / hundredths, 18000 / hundredths)?;
            return Ok(Some(grid.renamed(spec)));
        }
        Ok(None)
    }

    fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_cell_area(mut self, area: Array1<f64>) -> AquaResult<Self> {
        if area.len() != self.size() {
            let reason = format!("{} cell areas for {} cells", area.len(), self.size());
            return Err(AquaError::MalformedGrid {
                grid: self.name,
                reason,
            });
        }
        self.cell_area = Some(area);
        Ok(self)
    }

    pub fn size(&self) -> usize {
        self.lat.len()
    }

    /// Area of every cell in m².
    ///
    /// Explicit cell areas win. Otherwise regular grids use the exact
    /// spherical box area, HEALPix pixels are equal-area, and unstructured
    /// cells fall back to `cos(lat)` scaled to the sphere.
    pub fn area_weights(&self) -> Array1<f64> {
        if let Some(area) = &self.cell_area {
            return area.clone();
        }
        let sphere = 4.0 * std::f64::consts::PI * EARTH_RADIUS * EARTH_RADIUS;
        match self.kind {
            GridKind::Regular { nlon, nlat } => {
                let dlon = (360.0 / nlon as f64).to_radians();
                let dlat = 180.0 / nlat as f64;
                self.lat.mapv(|phi| {
                    let south = (phi - dlat / 2.0).max(-90.0).to_radians();
                    let north = (phi + dlat / 2.0).min(90.0).to_radians();
                    EARTH_RADIUS * EARTH_RADIUS * dlon * (north.sin() - south.sin())
                })
            }
            GridKind::Healpix { .. } => {
                Array1::from_elem(self.size(), sphere / self.size() as f64)
            }
            GridKind::Unstructured => {
                let raw = self.lat.mapv(|phi| phi.to_radians().cos().max(0.0));
                let total = raw.sum();
                if total > 0.0 {
                    raw * (sphere / total)
                } else {
                    Array1::from_elem(self.size(), sphere / self.size() as f64)
                }
            }
        }
    }
}

/// Great-circle distance in degrees between two points given in degrees.
pub fn angular_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = p2 - p1;
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dlambda / 2.0).sin().powi(2);
    (2.0 * a.sqrt().min(1.0).asin()).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    #[test]
    fn regular_layout() {
        let grid = HorizontalGrid::regular(4, 2).unwrap();
        assert_eq!(grid.size(), 8);
        assert_eq!(grid.lat[0], -45.0);
        assert_eq!(grid.lat[4], 45.0);
        assert_eq!(grid.lon[1], 90.0);
    }

    #[test]
    fn shorthand_resolutions() {
        let r025 = HorizontalGrid::from_spec("r025").unwrap().unwrap();
        assert_eq!(r025.kind, GridKind::Regular { nlon: 1440, nlat: 720 });
        let r200 = HorizontalGrid::from_spec("r200").unwrap().unwrap();
        assert_eq!(r200.kind, GridKind::Regular { nlon: 180, nlat: 90 });
        assert_eq!(r200.name, "r200");
        assert!(HorizontalGrid::from_spec("r070").is_err());
    }

    #[test]
    fn healpix_specs() {
        let grid = HorizontalGrid::from_spec("hpz2").unwrap().unwrap();
        assert_eq!(grid.kind, GridKind::Healpix { nside: 4, nested: true });
        assert_eq!(grid.size(), 192);
        let ring = HorizontalGrid::from_spec("healpix8").unwrap().unwrap();
        assert_eq!(ring.kind, GridKind::Healpix { nside: 8, nested: false });
        assert!(HorizontalGrid::from_spec("hpz2_spiral").is_err());
    }

    #[test]
    fn oversized_healpix_is_malformed() {
        for spec in ["hpz30", "hpz70", "hpz64_ring"] {
            assert!(
                matches!(HorizontalGrid::from_spec(spec), Err(AquaError::MalformedGrid { .. })),
                "{spec}"
            );
        }
        assert!(HorizontalGrid::healpix(1 << 30, true).is_err());
    }

    #[test]
    fn unknown_spec_is_none() {
        assert!(HorizontalGrid::from_spec("tco79").unwrap().is_none());
        assert!(HorizontalGrid::from_spec("rubbish").unwrap().is_none());
    }

    #[test]
    fn areas_cover_the_sphere() {
        let sphere = 4.0 * std::f64::consts::PI * EARTH_RADIUS * EARTH_RADIUS;
        for grid in [
            HorizontalGrid::regular(36, 18).unwrap(),
            HorizontalGrid::healpix(4, true).unwrap(),
            HorizontalGrid::unstructured("u", vec![-30.0, 0.0, 30.0], vec![0.0; 3], None).unwrap(),
        ] {
            let total = grid.area_weights().sum();
            assert!(is_close!(total, sphere, rel_tol = 1e-9), "{}", grid.name);
        }
    }

    #[test]
    fn unstructured_validates_lengths() {
        assert!(HorizontalGrid::unstructured("u", vec![0.0], vec![0.0, 1.0], None).is_err());
        assert!(
            HorizontalGrid::unstructured("u", vec![0.0], vec![0.0], Some(vec![1.0, 2.0])).is_err()
        );
    }

    #[test]
    fn distance() {
        assert!(is_close!(angular_distance(0.0, 0.0, 0.0, 90.0), 90.0));
        assert!(is_close!(angular_distance(90.0, 0.0, -90.0, 0.0), 180.0));
        assert!(is_close!(angular_distance(10.0, 359.0, 10.0, 1.0), 2.0 * 10f64.to_radians().cos(), rel_tol = 1e-3));
    }
}
