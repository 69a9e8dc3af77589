//! Physical dimensions for unit validation.
//!
//! Dimensions are integer exponents of the SI base quantities that occur in
//! climate model output: mass (M), length (L), time (T), temperature (Θ) and
//! amount of substance (N). Derived dimensions (pressure, fluxes, velocities)
//! are combinations of these.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// Physical dimension of a quantity as exponents of the base dimensions.
///
/// For example:
/// - Wind speed is L·T⁻¹
/// - Pressure is M·L⁻¹·T⁻²
/// - Precipitation rate as a mass flux is M·L⁻²·T⁻¹
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Dimension {
    pub mass: i8,
    pub length: i8,
    pub time: i8,
    pub temperature: i8,
    pub amount: i8,
}

impl Dimension {
    /// All exponents zero.
    #[must_use]
    pub const fn dimensionless() -> Self {
        Self::new(0, 0, 0, 0, 0)
    }

    #[must_use]
    pub const fn new(mass: i8, length: i8, time: i8, temperature: i8, amount: i8) -> Self {
        Self {
            mass,
            length,
            time,
            temperature,
            amount,
        }
    }

    pub const MASS: Self = Self::new(1, 0, 0, 0, 0);
    pub const LENGTH: Self = Self::new(0, 1, 0, 0, 0);
    pub const TIME: Self = Self::new(0, 0, 1, 0, 0);
    pub const TEMPERATURE: Self = Self::new(0, 0, 0, 1, 0);
    pub const AMOUNT: Self = Self::new(0, 0, 0, 0, 1);

    // Derived dimensions that show up in model output

    /// L²
    pub const AREA: Self = Self::new(0, 2, 0, 0, 0);
    /// L·T⁻¹, e.g. wind components
    pub const VELOCITY: Self = Self::new(0, 1, -1, 0, 0);
    /// M·L·T⁻²
    pub const FORCE: Self = Self::new(1, 1, -2, 0, 0);
    /// M·L⁻¹·T⁻², e.g. mean sea level pressure
    pub const PRESSURE: Self = Self::new(1, -1, -2, 0, 0);
    /// M·L²·T⁻²
    pub const ENERGY: Self = Self::new(1, 2, -2, 0, 0);
    /// M·L²·T⁻³
    pub const POWER: Self = Self::new(1, 2, -3, 0, 0);
    /// M·T⁻³, equivalent to W m⁻²
    pub const RADIATIVE_FLUX: Self = Self::new(1, 0, -3, 0, 0);
    /// M·L⁻²·T⁻¹, e.g. precipitation rate in kg m⁻² s⁻¹
    pub const MASS_FLUX: Self = Self::new(1, -2, -1, 0, 0);
    /// M·L⁻³, used to turn a water depth into a mass per area
    pub const DENSITY: Self = Self::new(1, -3, 0, 0, 0);

    #[must_use]
    pub const fn is_dimensionless(&self) -> bool {
        self.mass == 0
            && self.length == 0
            && self.time == 0
            && self.temperature == 0
            && self.amount == 0
    }

    /// Two dimensions are compatible for conversion only if they are identical.
    #[must_use]
    pub const fn is_compatible(&self, other: &Self) -> bool {
        self.mass == other.mass
            && self.length == other.length
            && self.time == other.time
            && self.temperature == other.temperature
            && self.amount == other.amount
    }

    /// True for a pure temperature (Θ¹), where absolute offsets apply.
    #[must_use]
    pub const fn is_temperature(&self) -> bool {
        self.is_compatible(&Self::TEMPERATURE)
    }

    #[must_use]
    pub const fn pow(&self, exp: i8) -> Self {
        Self {
            mass: self.mass * exp,
            length: self.length * exp,
            time: self.time * exp,
            temperature: self.temperature * exp,
            amount: self.amount * exp,
        }
    }
}

impl Mul for Dimension {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self {
            mass: self.mass + rhs.mass,
            length: self.length + rhs.length,
            time: self.time + rhs.time,
            temperature: self.temperature + rhs.temperature,
            amount: self.amount + rhs.amount,
        }
    }
}

impl Add for Dimension {
    type Output = Self;

    /// Combining quantities multiplies their dimensions (adds exponents).
    #[allow(clippy::suspicious_arithmetic_impl)]
    fn add(self, rhs: Self) -> Self::Output {
        self * rhs
    }
}

impl Sub for Dimension {
    type Output = Self;

    /// Division of quantities (subtracts exponents).
    fn sub(self, rhs: Self) -> Self::Output {
        self * -rhs
    }
}

impl Neg for Dimension {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self.pow(-1)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "dimensionless");
        }

        let parts: Vec<String> = [
            (self.mass, "M"),
            (self.length, "L"),
            (self.time, "T"),
            (self.temperature, "Θ"),
            (self.amount, "N"),
        ]
        .into_iter()
        .filter(|(exp, _)| *exp != 0)
        .map(|(exp, sym)| {
            if exp == 1 {
                sym.to_string()
            } else {
                format!("{sym}^{exp}")
            }
        })
        .collect();

        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensionless_display() {
        let dim = Dimension::dimensionless();
        assert!(dim.is_dimensionless());
        assert_eq!(format!("{}", dim), "dimensionless");
    }

    #[test]
    fn pressure_from_force_over_area() {
        assert_eq!(Dimension::FORCE - Dimension::AREA, Dimension::PRESSURE);
    }

    #[test]
    fn radiative_flux_from_power_over_area() {
        assert_eq!(Dimension::POWER - Dimension::AREA, Dimension::RADIATIVE_FLUX);
    }

    #[test]
    fn precipitation_depth_to_mass_flux() {
        // m * (kg m^-3) / s = kg m^-2 s^-1
        let flux = Dimension::LENGTH + Dimension::DENSITY - Dimension::TIME;
        assert_eq!(flux, Dimension::MASS_FLUX);
    }

    #[test]
    fn temperature_detection() {
        assert!(Dimension::TEMPERATURE.is_temperature());
        assert!(!Dimension::TEMPERATURE.pow(2).is_temperature());
        assert!(!Dimension::MASS.is_temperature());
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Dimension::VELOCITY), "L T^-1");
        assert_eq!(format!("{}", Dimension::PRESSURE), "M L^-1 T^-2");
    }
}
