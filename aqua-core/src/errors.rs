use crate::units::{ConversionError, ParseError};
use thiserror::Error;

/// Error type for invalid operations.
#[derive(Error, Debug)]
pub enum AquaError {
    #[error("{0}")]
    Error(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Dataset not found: catalog={catalog}, model={model}, exp={exp}, source={source_name}")]
    DatasetNotFound {
        catalog: String,
        model: String,
        exp: String,
        source_name: String,
    },
    #[error("Ambiguous dataset: model={model}, exp={exp}, source={source_name} is present in catalogs {catalogs:?}. Specify a catalog to disambiguate.")]
    AmbiguousDataset {
        model: String,
        exp: String,
        source_name: String,
        catalogs: Vec<String>,
    },
    #[error("Unknown fixer family: {0}")]
    UnknownFixer(String),
    #[error("Derived variable {variable} cannot be computed, missing constituents: {missing:?}")]
    MissingConstituent {
        variable: String,
        missing: Vec<String>,
    },
    #[error("Invalid formula '{formula}': {reason}")]
    InvalidFormula { formula: String, reason: String },
    #[error("Unknown grid: {0}")]
    UnknownGrid(String),
    #[error("Malformed grid {grid}: {reason}")]
    MalformedGrid { grid: String, reason: String },
    #[error("Regrid method {method} is not supported from grid {grid}")]
    UnsupportedRegrid { method: String, grid: String },
    #[error("Weights for {key} do not match the data: {reason}")]
    WeightsMismatch { key: String, reason: String },
    #[error("No loader registered for backend '{0}'")]
    UnsupportedBackend(String),
    #[error("Variable not found in dataset: {0}")]
    VariableNotFound(String),
    #[error("Time axis error: {0}")]
    Time(String),
    #[error("Unit parse error: {0}")]
    UnitParse(#[from] ParseError),
    #[error("Unit conversion error: {0}")]
    UnitConversion(#[from] ConversionError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AquaError {
    /// Wrap an I/O error together with the path it occurred on.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        AquaError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Convenience type for `Result<T, AquaError>`.
pub type AquaResult<T> = Result<T, AquaError>;
