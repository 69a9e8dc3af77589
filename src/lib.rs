//! Unified access to climate model output: catalog resolution, data fixing,
//! regridding with cached weights and time/field aggregation.
//!
//! Everything lives in [`aqua_core`]; this crate re-exports it.

pub use aqua_core::*;

pub mod prelude {
    pub use aqua_core::aggregate::{Frequency, Region};
    pub use aqua_core::config::Configuration;
    pub use aqua_core::dataset::{DataArray, Dataset};
    pub use aqua_core::errors::{AquaError, AquaResult};
    pub use aqua_core::output::{OutputKind, OutputSaver};
    pub use aqua_core::reader::{Reader, Session};
    pub use aqua_core::regrid::RegridMethod;
}
