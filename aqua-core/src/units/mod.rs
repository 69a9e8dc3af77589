//! Unit parsing, normalization, and conversion for model variables.
//!
//! Model output arrives with units written in GRIB (`kg m**-2 s**-1`), CF
//! (`kg m-2 s-1`) or free-form (`W/m^2`) spelling. This module normalizes
//! them, checks dimensional compatibility and computes the linear map
//! between compatible units, including the absolute offset between Celsius
//! and Kelvin.
//!
//! ```
//! use aqua_core::units::Unit;
//!
//! let grib = Unit::parse("kg m**-2 s**-1").unwrap();
//! let cf = Unit::parse("kg m-2 s-1").unwrap();
//! assert_eq!(grib, cf);
//!
//! let hpa = Unit::parse("hPa").unwrap();
//! let pa = Unit::parse("Pa").unwrap();
//! assert_eq!(hpa.convert_to(1013.25, &pa).unwrap(), 101325.0);
//! ```
//!
//! # Module Structure
//!
//! - [`dimension`]: physical dimension exponents
//! - [`registry`]: known units with their SI factors
//! - [`parser`]: unit string parsing with normalization
//! - [`conversion`]: the [`Unit`] type and conversion API

pub mod conversion;
pub mod dimension;
pub mod parser;
pub mod registry;

pub use conversion::{conversion_factor, units_equal, ConversionError, LinearConversion, Unit};
pub use dimension::Dimension;
pub use parser::{ParseError, ParsedUnit};
pub use registry::{UnitInfo, UnitRegistry, UNIT_REGISTRY};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grib_and_cf_spellings_agree() {
        let pairs = [
            ("kg m**-2 s**-1", "kg m-2 s-1"),
            ("m s**-1", "m/s"),
            ("W m**-2", "W per m^2"),
            ("kg kg**-1", "1"),
        ];
        for (grib, cf) in pairs {
            let a = Unit::parse(grib).unwrap();
            let b = Unit::parse(cf).unwrap();
            assert!(a.is_compatible(&b), "{grib} vs {cf}");
            let factor = a.conversion_to(&b).unwrap().factor;
            assert!((factor - 1.0).abs() < 1e-12, "{grib} -> {cf}: {factor}");
        }
    }

    #[test]
    fn percent_to_fraction() {
        let percent = Unit::parse("%").unwrap();
        let fraction = Unit::parse("(0 - 1)").unwrap();
        assert!((percent.convert_to(50.0, &fraction).unwrap() - 0.5).abs() < 1e-12);
    }
}
