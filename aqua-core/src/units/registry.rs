//! Registry of units found in GRIB and CMOR-like model output.
//!
//! Every unit is stored with its dimension and the factor (and, for absolute
//! temperatures, the offset) that takes a value to SI base units:
//! `si = value * to_si_factor + to_si_offset`.
//!
//! SI prefixes are resolved on lookup, so `hPa`, `mm` and `km` do not need
//! their own entries.

use super::dimension::Dimension;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Information about a known unit.
#[derive(Debug, Clone)]
pub struct UnitInfo {
    pub name: String,
    pub dimension: Dimension,
    pub to_si_factor: f64,
    /// Additive offset to SI, non-zero only for absolute temperature scales.
    pub to_si_offset: f64,
}

impl UnitInfo {
    fn new(name: &str, dimension: Dimension, to_si_factor: f64) -> Self {
        Self {
            name: name.to_string(),
            dimension,
            to_si_factor,
            to_si_offset: 0.0,
        }
    }

    fn with_offset(name: &str, dimension: Dimension, to_si_factor: f64, offset: f64) -> Self {
        Self {
            to_si_offset: offset,
            ..Self::new(name, dimension, to_si_factor)
        }
    }
}

/// SI prefix multipliers, longest symbols first so `da` wins over `d`.
static SI_PREFIXES: &[(&str, f64)] = &[
    ("da", 1e1),
    ("T", 1e12),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("h", 1e2),
    ("d", 1e-1),
    ("c", 1e-2),
    ("m", 1e-3),
    ("u", 1e-6),
    ("n", 1e-9),
];

pub const SECONDS_PER_DAY: f64 = 86400.0;
pub const SECONDS_PER_HOUR: f64 = 3600.0;
pub const SECONDS_PER_MINUTE: f64 = 60.0;
/// Offset between the Celsius and Kelvin scales.
pub const ZERO_CELSIUS: f64 = 273.15;
/// Density of liquid water in kg m-3, used to turn water depths into mass.
pub const WATER_DENSITY: f64 = 1000.0;

/// The global unit registry.
pub static UNIT_REGISTRY: LazyLock<UnitRegistry> = LazyLock::new(UnitRegistry::new);

/// Known units keyed by symbol, plus aliases.
#[derive(Debug)]
pub struct UnitRegistry {
    units: HashMap<&'static str, UnitInfo>,
    aliases: HashMap<&'static str, &'static str>,
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            units: HashMap::new(),
            aliases: HashMap::new(),
        };
        registry.register_base_units();
        registry.register_time_units();
        registry.register_derived_units();
        registry.register_temperature_units();
        registry.register_ratio_units();
        registry
    }

    /// Looks up a unit by symbol, handling aliases and SI prefixes.
    pub fn lookup(&self, symbol: &str) -> Option<UnitInfo> {
        self.lookup_exact(symbol)
            .or_else(|| self.lookup_prefixed(symbol))
    }

    fn lookup_exact(&self, symbol: &str) -> Option<UnitInfo> {
        let canonical = self.aliases.get(symbol).copied().unwrap_or(symbol);
        self.units.get(canonical).cloned()
    }

    fn lookup_prefixed(&self, symbol: &str) -> Option<UnitInfo> {
        SI_PREFIXES.iter().find_map(|(prefix, factor)| {
            let base = symbol.strip_prefix(prefix)?;
            let info = self.lookup_exact(base)?;
            // Prefixing an offset scale (e.g. "mdegC") is meaningless
            if info.to_si_offset != 0.0 {
                return None;
            }
            Some(UnitInfo {
                name: symbol.to_string(),
                dimension: info.dimension,
                to_si_factor: info.to_si_factor * factor,
                to_si_offset: 0.0,
            })
        })
    }

    fn insert(&mut self, info: UnitInfo, symbol: &'static str) {
        self.units.insert(symbol, info);
    }

    fn register_base_units(&mut self) {
        self.insert(UnitInfo::new("kg", Dimension::MASS, 1.0), "kg");
        self.insert(UnitInfo::new("g", Dimension::MASS, 1e-3), "g");
        self.insert(UnitInfo::new("t", Dimension::MASS, 1e3), "t");
        self.insert(UnitInfo::new("m", Dimension::LENGTH, 1.0), "m");
        self.insert(UnitInfo::new("s", Dimension::TIME, 1.0), "s");
        self.insert(UnitInfo::new("K", Dimension::TEMPERATURE, 1.0), "K");
        self.insert(UnitInfo::new("mol", Dimension::AMOUNT, 1.0), "mol");
        self.insert(UnitInfo::new("1", Dimension::dimensionless(), 1.0), "1");

        self.aliases.insert("dimensionless", "1");
        self.aliases.insert("kelvin", "K");
        self.aliases.insert("metre", "m");
        self.aliases.insert("meter", "m");
    }

    fn register_time_units(&mut self) {
        self.insert(UnitInfo::new("min", Dimension::TIME, SECONDS_PER_MINUTE), "min");
        self.insert(UnitInfo::new("h", Dimension::TIME, SECONDS_PER_HOUR), "h");
        self.insert(UnitInfo::new("day", Dimension::TIME, SECONDS_PER_DAY), "day");

        self.aliases.insert("sec", "s");
        self.aliases.insert("seconds", "s");
        self.aliases.insert("hour", "h");
        self.aliases.insert("hours", "h");
        self.aliases.insert("hr", "h");
        self.aliases.insert("d", "day");
        self.aliases.insert("days", "day");
    }

    fn register_derived_units(&mut self) {
        self.insert(UnitInfo::new("Pa", Dimension::PRESSURE, 1.0), "Pa");
        self.insert(UnitInfo::new("bar", Dimension::PRESSURE, 1e5), "bar");
        self.insert(UnitInfo::new("N", Dimension::FORCE, 1.0), "N");
        self.insert(UnitInfo::new("J", Dimension::ENERGY, 1.0), "J");
        self.insert(UnitInfo::new("W", Dimension::POWER, 1.0), "W");
    }

    fn register_temperature_units(&mut self) {
        self.insert(
            UnitInfo::with_offset("degC", Dimension::TEMPERATURE, 1.0, ZERO_CELSIUS),
            "degC",
        );
        self.aliases.insert("C", "degC");
        self.aliases.insert("celsius", "degC");
        self.aliases.insert("Celsius", "degC");
        self.aliases.insert("deg_C", "degC");
        self.aliases.insert("degree_Celsius", "degC");
    }

    /// Fractions and angles, all dimensionless.
    fn register_ratio_units(&mut self) {
        self.insert(UnitInfo::new("%", Dimension::dimensionless(), 1e-2), "%");
        self.insert(UnitInfo::new("percent", Dimension::dimensionless(), 1e-2), "percent");
        self.insert(UnitInfo::new("deg", Dimension::dimensionless(), 1.0), "deg");

        self.aliases.insert("fraction", "1");
        self.aliases.insert("degrees", "deg");
        self.aliases.insert("degree", "deg");
        self.aliases.insert("degrees_north", "deg");
        self.aliases.insert("degrees_east", "deg");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_unit_lookup() {
        let registry = UnitRegistry::new();
        let kg = registry.lookup("kg").expect("kg should exist");
        assert_eq!(kg.dimension, Dimension::MASS);
        assert_eq!(kg.to_si_factor, 1.0);
    }

    #[test]
    fn prefixed_pressure() {
        let registry = UnitRegistry::new();
        let hpa = registry.lookup("hPa").expect("hPa should resolve through prefix");
        assert_eq!(hpa.dimension, Dimension::PRESSURE);
        assert!((hpa.to_si_factor - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn millimetres() {
        let registry = UnitRegistry::new();
        let mm = registry.lookup("mm").unwrap();
        assert_eq!(mm.dimension, Dimension::LENGTH);
        assert!((mm.to_si_factor - 1e-3).abs() < f64::EPSILON);
    }

    #[test]
    fn celsius_carries_offset() {
        let registry = UnitRegistry::new();
        let degc = registry.lookup("degC").unwrap();
        assert_eq!(degc.to_si_offset, ZERO_CELSIUS);
        assert!(registry.lookup("mdegC").is_none());
    }

    #[test]
    fn aliases_resolve() {
        let registry = UnitRegistry::new();
        assert_eq!(registry.lookup("hours").unwrap().to_si_factor, 3600.0);
        assert!(registry.lookup("degrees_north").unwrap().dimension.is_dimensionless());
    }

    #[test]
    fn unknown_unit() {
        let registry = UnitRegistry::new();
        assert!(registry.lookup("furlong").is_none());
    }
}
