//! Unit conversion calculations.
//!
//! [`Unit`] wraps a parsed unit string and computes the linear map
//! (`factor`, `offset`) between compatible units.
//!
//! ```
//! use aqua_core::units::Unit;
//!
//! let celsius = Unit::parse("degC").unwrap();
//! let kelvin = Unit::parse("K").unwrap();
//! let value = celsius.convert_to(15.0, &kelvin).unwrap();
//! assert!((value - 288.15).abs() < 1e-9);
//! ```

use super::dimension::Dimension;
use super::parser::{ParseError, ParsedUnit};
use super::registry::WATER_DENSITY;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error type for unit conversion failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionError {
    IncompatibleDimensions {
        from: Dimension,
        to: Dimension,
        from_unit: String,
        to_unit: String,
    },
    /// A rate conversion was needed but no time step was provided.
    MissingTimeStep { from_unit: String, to_unit: String },
    ParseError(ParseError),
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompatibleDimensions {
                from,
                to,
                from_unit,
                to_unit,
            } => write!(
                f,
                "cannot convert from '{from_unit}' to '{to_unit}': \
                 incompatible dimensions ({from} vs {to})"
            ),
            Self::MissingTimeStep { from_unit, to_unit } => write!(
                f,
                "converting '{from_unit}' to '{to_unit}' needs the accumulation time step (deltat)"
            ),
            Self::ParseError(e) => write!(f, "unit parse error: {e}"),
        }
    }
}

impl std::error::Error for ConversionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ParseError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParseError> for ConversionError {
    fn from(e: ParseError) -> Self {
        Self::ParseError(e)
    }
}

/// Linear map `to = from * factor + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearConversion {
    pub factor: f64,
    pub offset: f64,
}

impl LinearConversion {
    pub const IDENTITY: Self = Self {
        factor: 1.0,
        offset: 0.0,
    };

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.factor == 1.0 && self.offset == 0.0
    }

    #[inline]
    #[must_use]
    pub fn apply(&self, value: f64) -> f64 {
        value * self.factor + self.offset
    }
}

/// A parsed unit that remembers how it was written.
///
/// Equality compares the normalized form, so `W m**-2 == W/m^2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    original: String,
    parsed: ParsedUnit,
}

impl Unit {
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        Ok(Self {
            original: input.to_string(),
            parsed: ParsedUnit::parse(input)?,
        })
    }

    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    #[must_use]
    pub fn normalized(&self) -> String {
        self.parsed.normalized()
    }

    pub fn dimension(&self) -> Result<Dimension, ParseError> {
        self.parsed.dimension()
    }

    pub fn is_compatible(&self, other: &Self) -> bool {
        match (self.dimension(), other.dimension()) {
            (Ok(d1), Ok(d2)) => d1.is_compatible(&d2),
            _ => false,
        }
    }

    /// Linear map from this unit to `other`.
    ///
    /// Offsets only take part when both sides are pure temperatures.
    pub fn conversion_to(&self, other: &Self) -> Result<LinearConversion, ConversionError> {
        let dim_self = self.dimension()?;
        let dim_other = other.dimension()?;
        if !dim_self.is_compatible(&dim_other) {
            return Err(ConversionError::IncompatibleDimensions {
                from: dim_self,
                to: dim_other,
                from_unit: self.original.clone(),
                to_unit: other.original.clone(),
            });
        }

        let factor_self = self.parsed.to_si_factor()?;
        let factor_other = other.parsed.to_si_factor()?;
        let (offset_self, offset_other) = if dim_self.is_temperature() {
            (self.parsed.to_si_offset()?, other.parsed.to_si_offset()?)
        } else {
            (0.0, 0.0)
        };

        // si = v * f_s + o_s ; target = (si - o_o) / f_o
        Ok(LinearConversion {
            factor: factor_self / factor_other,
            offset: (offset_self - offset_other) / factor_other,
        })
    }

    /// Like [`conversion_to`](Self::conversion_to), but also bridges the two
    /// mismatches typical of accumulated model fields:
    ///
    /// - a missing `T⁻¹` (accumulation over `deltat` seconds to a rate)
    /// - a missing `M L⁻³` (water depth to mass per area)
    ///
    /// so that `m` converts to `kg m-2 s-1` given the accumulation step.
    pub fn conversion_with_rates(
        &self,
        other: &Self,
        deltat: Option<f64>,
    ) -> Result<LinearConversion, ConversionError> {
        let dim_self = self.dimension()?;
        let dim_other = other.dimension()?;
        let gap = dim_other - dim_self;

        let needs_density = gap == Dimension::DENSITY || gap == Dimension::DENSITY - Dimension::TIME;
        let needs_rate = gap == -Dimension::TIME || gap == Dimension::DENSITY - Dimension::TIME;
        if !needs_density && !needs_rate {
            return self.conversion_to(other);
        }

        let mut factor = self.parsed.to_si_factor()? / other.parsed.to_si_factor()?;
        if needs_density {
            factor *= WATER_DENSITY;
        }
        if needs_rate {
            let deltat = deltat.ok_or_else(|| ConversionError::MissingTimeStep {
                from_unit: self.original.clone(),
                to_unit: other.original.clone(),
            })?;
            factor /= deltat;
        }
        Ok(LinearConversion {
            factor,
            offset: 0.0,
        })
    }

    pub fn convert_to(&self, value: f64, other: &Self) -> Result<f64, ConversionError> {
        Ok(self.conversion_to(other)?.apply(value))
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.parsed == other.parsed
    }
}

impl Eq for Unit {}

impl std::hash::Hash for Unit {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized())
    }
}

/// Checks if two unit strings are equivalent after normalization.
///
/// ```
/// use aqua_core::units::units_equal;
///
/// assert!(units_equal("W m**-2", "W/m^2").unwrap());
/// assert!(!units_equal("W m-2", "W m-1").unwrap());
/// ```
pub fn units_equal(a: &str, b: &str) -> Result<bool, ParseError> {
    Ok(Unit::parse(a)? == Unit::parse(b)?)
}

/// Conversion factor between two unit strings, ignoring offsets.
pub fn conversion_factor(from: &str, to: &str) -> Result<f64, ConversionError> {
    Ok(Unit::parse(from)?.conversion_to(&Unit::parse(to)?)?.factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_for_equivalent_spellings() {
        let a = Unit::parse("W m**-2").unwrap();
        let b = Unit::parse("W/m^2").unwrap();
        assert_eq!(a, b);
        assert!(a.conversion_to(&b).unwrap().is_identity());
    }

    #[test]
    fn hpa_to_pa() {
        let factor = conversion_factor("hPa", "Pa").unwrap();
        assert!((factor - 100.0).abs() < 1e-10);
    }

    #[test]
    fn kelvin_to_celsius() {
        let k = Unit::parse("K").unwrap();
        let c = Unit::parse("degC").unwrap();
        let value = k.convert_to(273.15, &c).unwrap();
        assert!(value.abs() < 1e-10);
    }

    #[test]
    fn celsius_difference_has_no_offset() {
        let a = Unit::parse("degC day-1").unwrap();
        let b = Unit::parse("K s-1").unwrap();
        let conversion = a.conversion_to(&b).unwrap();
        assert_eq!(conversion.offset, 0.0);
        assert!((conversion.factor - 1.0 / 86400.0).abs() < 1e-15);
    }

    #[test]
    fn incompatible_dimensions() {
        let k = Unit::parse("K").unwrap();
        let pa = Unit::parse("Pa").unwrap();
        assert!(!k.is_compatible(&pa));
        assert!(matches!(
            k.conversion_to(&pa),
            Err(ConversionError::IncompatibleDimensions { .. })
        ));
    }

    #[test]
    fn accumulated_precipitation_to_rate() {
        let m = Unit::parse("m").unwrap();
        let rate = Unit::parse("kg m-2 s-1").unwrap();
        let conversion = m.conversion_with_rates(&rate, Some(3600.0)).unwrap();
        // 1 m of water over an hour = 1000 kg m-2 / 3600 s
        assert!((conversion.factor - 1000.0 / 3600.0).abs() < 1e-12);
    }

    #[test]
    fn accumulated_flux_to_rate() {
        let acc = Unit::parse("J m-2").unwrap();
        let flux = Unit::parse("W m-2").unwrap();
        let conversion = acc.conversion_with_rates(&flux, Some(21600.0)).unwrap();
        assert!((conversion.factor - 1.0 / 21600.0).abs() < 1e-15);
    }

    #[test]
    fn rate_conversion_needs_deltat() {
        let acc = Unit::parse("J m-2").unwrap();
        let flux = Unit::parse("W m-2").unwrap();
        assert!(matches!(
            acc.conversion_with_rates(&flux, None),
            Err(ConversionError::MissingTimeStep { .. })
        ));
    }

    #[test]
    fn depth_rate_to_mass_flux() {
        let mm_day = Unit::parse("mm day-1").unwrap();
        let flux = Unit::parse("kg m-2 s-1").unwrap();
        let conversion = mm_day.conversion_with_rates(&flux, None).unwrap();
        assert!((conversion.factor - 1.0 / 86400.0).abs() < 1e-15);
    }

    #[test]
    fn original_preserved() {
        let unit = Unit::parse("kg m**-2 s**-1").unwrap();
        assert_eq!(unit.original(), "kg m**-2 s**-1");
        assert_eq!(unit.normalized(), "kg m-2 s-1");
    }
}
