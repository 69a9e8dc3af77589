pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod fixer;
pub mod grid;
pub mod loader;
pub mod lra;
pub mod output;
pub mod reader;
pub mod regrid;
pub mod units;

pub mod errors;

pub use dataset::{DataArray, Dataset};
pub use errors::{AquaError, AquaResult};
pub use reader::{Reader, ReaderBuilder, Session};
