//! ECMWF GRIB parameter conventions for the variables fixers produce.
//!
//! When a fixer rule names a target variable but no target units, the units
//! (and the descriptive attributes) come from this table.

/// Metadata of a GRIB parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamInfo {
    pub param_id: u32,
    pub short_name: &'static str,
    pub long_name: &'static str,
    pub units: &'static str,
    pub standard_name: Option<&'static str>,
}

const fn param(
    param_id: u32,
    short_name: &'static str,
    long_name: &'static str,
    units: &'static str,
    standard_name: Option<&'static str>,
) -> ParamInfo {
    ParamInfo {
        param_id,
        short_name,
        long_name,
        units,
        standard_name,
    }
}

static GRIB_PARAMS: &[ParamInfo] = &[
    param(31, "ci", "Sea ice area fraction", "(0 - 1)", Some("sea_ice_area_fraction")),
    param(34, "sst", "Sea surface temperature", "K", Some("sea_surface_temperature")),
    param(129, "z", "Geopotential", "m2 s-2", Some("geopotential")),
    param(130, "t", "Temperature", "K", Some("air_temperature")),
    param(131, "u", "U component of wind", "m s-1", Some("eastward_wind")),
    param(132, "v", "V component of wind", "m s-1", Some("northward_wind")),
    param(133, "q", "Specific humidity", "kg kg-1", Some("specific_humidity")),
    param(134, "sp", "Surface pressure", "Pa", Some("surface_air_pressure")),
    param(151, "msl", "Mean sea level pressure", "Pa", Some("air_pressure_at_mean_sea_level")),
    param(164, "tcc", "Total cloud cover", "(0 - 1)", Some("cloud_area_fraction")),
    param(165, "10u", "10 metre U wind component", "m s-1", None),
    param(166, "10v", "10 metre V wind component", "m s-1", None),
    param(167, "2t", "2 metre temperature", "K", None),
    param(168, "2d", "2 metre dewpoint temperature", "K", None),
    param(169, "ssrd", "Surface short-wave (solar) radiation downwards", "J m-2", Some("surface_downwelling_shortwave_flux_in_air")),
    param(175, "strd", "Surface long-wave (thermal) radiation downwards", "J m-2", Some("surface_downwelling_longwave_flux_in_air")),
    param(176, "ssr", "Surface net short-wave (solar) radiation", "J m-2", Some("surface_net_downward_shortwave_flux")),
    param(177, "str", "Surface net long-wave (thermal) radiation", "J m-2", Some("surface_net_upward_longwave_flux")),
    param(178, "tsr", "Top net short-wave (solar) radiation", "J m-2", None),
    param(179, "ttr", "Top net long-wave (thermal) radiation", "J m-2", None),
    param(228, "tp", "Total precipitation", "m", None),
    param(146, "sshf", "Time-integrated surface sensible heat net flux", "J m-2", None),
    param(147, "slhf", "Time-integrated surface latent heat net flux", "J m-2", None),
    param(235, "skt", "Skin temperature", "K", None),
    param(260048, "tprate", "Total precipitation rate", "kg m-2 s-1", Some("precipitation_flux")),
    param(235029, "msshf", "Mean surface sensible heat flux", "W m-2", None),
    param(235030, "mslhf", "Mean surface latent heat flux", "W m-2", None),
    param(235035, "msdwswrf", "Mean surface downward short-wave radiation flux", "W m-2", None),
    param(235036, "msdwlwrf", "Mean surface downward long-wave radiation flux", "W m-2", None),
    param(235037, "msnswrf", "Mean surface net short-wave radiation flux", "W m-2", None),
    param(235038, "msnlwrf", "Mean surface net long-wave radiation flux", "W m-2", None),
    param(235039, "mtnswrf", "Mean top net short-wave radiation flux", "W m-2", None),
    param(235040, "mtnlwrf", "Mean top net long-wave radiation flux", "W m-2", None),
    param(263101, "avg_so", "Sea water practical salinity", "g kg-1", Some("sea_water_salinity")),
    param(263100, "avg_thetao", "Sea water potential temperature", "degC", Some("sea_water_potential_temperature")),
];

/// Looks up a parameter by short name.
pub fn lookup(short_name: &str) -> Option<&'static ParamInfo> {
    GRIB_PARAMS.iter().find(|p| p.short_name == short_name)
}

/// Looks up a parameter by GRIB paramId.
pub fn lookup_id(param_id: u32) -> Option<&'static ParamInfo> {
    GRIB_PARAMS.iter().find(|p| p.param_id == param_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;
    use std::collections::HashSet;

    #[test]
    fn well_known_parameters() {
        assert_eq!(lookup("2t").unwrap().param_id, 167);
        assert_eq!(lookup("tprate").unwrap().units, "kg m-2 s-1");
        assert_eq!(lookup_id(151).unwrap().short_name, "msl");
        assert!(lookup("not-a-param").is_none());
    }

    #[test]
    fn table_is_consistent() {
        let ids: HashSet<u32> = GRIB_PARAMS.iter().map(|p| p.param_id).collect();
        assert_eq!(ids.len(), GRIB_PARAMS.len());
        for p in GRIB_PARAMS {
            assert!(Unit::parse(p.units).is_ok(), "{} has units {}", p.short_name, p.units);
        }
    }
}
