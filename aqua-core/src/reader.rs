//! The Reader: one entry point from (model, experiment, source) to fixed,
//! regridded and aggregated data.
//!
//! ```no_run
//! use aqua_core::aggregate::Frequency;
//! use aqua_core::reader::Session;
//!
//! let session = Session::load(None)?;
//! let reader = session
//!     .reader("IFS-NEMO", "historical-1990")
//!     .source("hourly-native")
//!     .regrid("r100")
//!     .build()?;
//! let data = reader.retrieve(Some(&["2t"]))?;
//! let monthly = reader.time_mean(&reader.regrid(&data)?, Frequency::Monthly, true)?;
//! let global = reader.field_mean(&monthly, None)?;
//! # Ok::<(), aqua_core::errors::AquaError>(())
//! ```

use crate::aggregate::{self, Frequency, Region};
use crate::catalog::{CatalogEntry, CatalogRegistry};
use crate::config::Configuration;
use crate::dataset::Dataset;
use crate::errors::{AquaError, AquaResult};
use crate::fixer::{Fixer, FixerOptions, FixerTable};
use crate::grid::{GridDescriptor, GridRegistry, HorizontalGrid};
use crate::loader::{LoadRequest, LoaderRegistry};
use crate::regrid::{RegridMethod, Regridder, WeightsCache};
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;

/// Everything loaded once per run and shared by readers.
pub struct Session {
    pub config: Option<Configuration>,
    pub catalogs: CatalogRegistry,
    pub grids: GridRegistry,
    pub fixers: FixerTable,
    pub cache: Arc<WeightsCache>,
    pub loaders: LoaderRegistry,
}

impl Session {
    pub fn new(
        catalogs: CatalogRegistry,
        grids: GridRegistry,
        fixers: FixerTable,
        cache: WeightsCache,
    ) -> Self {
        Self {
            config: None,
            catalogs,
            grids,
            fixers,
            cache: Arc::new(cache),
            loaders: LoaderRegistry::new(),
        }
    }

    pub fn from_config(config: Configuration) -> AquaResult<Self> {
        config.configure_workers();
        let session = Self {
            catalogs: CatalogRegistry::load(&config)?,
            grids: GridRegistry::load(&config.grids_dir)?,
            fixers: FixerTable::load(&config.fixes_dir)?,
            cache: Arc::new(WeightsCache::new(&config.weights_dir)?),
            loaders: LoaderRegistry::new(),
            config: Some(config),
        };
        info!(
            "Session ready: {} catalogs",
            session.catalogs.catalogs().len()
        );
        Ok(session)
    }

    /// Locates the configuration (see [`Configuration::load`]) and loads it.
    pub fn load(explicit: Option<&Path>) -> AquaResult<Self> {
        Self::from_config(Configuration::load(explicit)?)
    }

    pub fn reader(&self, model: &str, exp: &str) -> ReaderBuilder<'_> {
        ReaderBuilder {
            session: self,
            model: model.to_string(),
            exp: exp.to_string(),
            source: None,
            catalog: None,
            regrid: None,
            method: None,
            fix: true,
            strict_fixer: false,
            startdate: None,
            enddate: None,
        }
    }
}

pub struct ReaderBuilder<'a> {
    session: &'a Session,
    model: String,
    exp: String,
    source: Option<String>,
    catalog: Option<String>,
    regrid: Option<String>,
    method: Option<RegridMethod>,
    fix: bool,
    strict_fixer: bool,
    startdate: Option<NaiveDateTime>,
    enddate: Option<NaiveDateTime>,
}

impl<'a> ReaderBuilder<'a> {
    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn catalog(mut self, catalog: &str) -> Self {
        self.catalog = Some(catalog.to_string());
        self
    }

    /// Target grid: a descriptor name or a grid specification such as `r100`.
    pub fn regrid(mut self, target: &str) -> Self {
        self.regrid = Some(target.to_string());
        self
    }

    /// Overrides the source grid's preferred method.
    pub fn regrid_method(mut self, method: RegridMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn fix(mut self, fix: bool) -> Self {
        self.fix = fix;
        self
    }

    pub fn strict_fixer(mut self, strict: bool) -> Self {
        self.strict_fixer = strict;
        self
    }

    pub fn startdate(mut self, start: NaiveDateTime) -> Self {
        self.startdate = Some(start);
        self
    }

    pub fn enddate(mut self, end: NaiveDateTime) -> Self {
        self.enddate = Some(end);
        self
    }

    pub fn build(self) -> AquaResult<Reader<'a>> {
        let session = self.session;
        let entry = session
            .catalogs
            .resolve(
                &self.model,
                &self.exp,
                self.source.as_deref(),
                self.catalog.as_deref(),
            )?
            .clone();
        debug!("Reader for {entry}");

        let fixer = match (&entry.spec.fixer_name, self.fix) {
            (Some(name), true) => Some(Fixer::new(
                &session.fixers,
                name,
                FixerOptions {
                    strict: self.strict_fixer,
                },
            )?),
            (None, true) => {
                debug!("{entry} has no fixer");
                None
            }
            (_, false) => None,
        };

        let source_descriptor = entry.spec.source_grid_name.as_deref().map(|name| {
            session
                .grids
                .get(name)
                .cloned()
                .unwrap_or_else(|_| {
                    warn!("{entry}: grid {name} has no descriptor, reading it as a grid specification");
                    GridDescriptor::new(name, name)
                })
        });
        let target = self
            .regrid
            .as_deref()
            .map(|name| session.grids.resolve(name))
            .transpose()?;
        let method = self
            .method
            .or_else(|| source_descriptor.as_ref().and_then(|d| d.regrid_method))
            .unwrap_or_default();

        Ok(Reader {
            session,
            entry,
            fixer,
            source_descriptor,
            target,
            method,
            startdate: self.startdate,
            enddate: self.enddate,
        })
    }
}

pub struct Reader<'a> {
    session: &'a Session,
    entry: CatalogEntry,
    fixer: Option<Fixer>,
    source_descriptor: Option<GridDescriptor>,
    target: Option<HorizontalGrid>,
    method: RegridMethod,
    startdate: Option<NaiveDateTime>,
    enddate: Option<NaiveDateTime>,
}

impl Reader<'_> {
    pub fn entry(&self) -> &CatalogEntry {
        &self.entry
    }

    pub fn fixer(&self) -> Option<&Fixer> {
        self.fixer.as_ref()
    }

    pub fn target(&self) -> Option<&HorizontalGrid> {
        self.target.as_ref()
    }

    pub fn method(&self) -> RegridMethod {
        self.method
    }

    /// Loads (and fixes) the requested variables, named as after fixing.
    ///
    /// `None` loads every variable of the source.
    pub fn retrieve(&self, variables: Option<&[&str]>) -> AquaResult<Dataset> {
        let sources = variables.map(|vars| match &self.fixer {
            Some(fixer) => fixer.source_variables(vars),
            None => vars.iter().map(|v| v.to_string()).collect(),
        });
        let request = LoadRequest {
            variables: sources,
            start: self.startdate,
            end: self.enddate,
        };
        let mut dataset = self.session.loaders.load(&self.entry, &request)?;
        dataset.append_history(&format!("retrieved from {}", self.entry));

        if let Some(fixer) = &self.fixer {
            dataset = fixer.apply(dataset)?;
        }
        match variables {
            Some(vars) => dataset.select_variables(vars),
            None => Ok(dataset),
        }
    }

    /// The grid data from this source lives on.
    fn source_grid(&self, dataset: &Dataset) -> AquaResult<HorizontalGrid> {
        let Some(descriptor) = &self.source_descriptor else {
            return Ok(dataset.grid.clone());
        };
        let grid = descriptor.build()?;
        if grid.size() != dataset.grid.size() {
            return Err(AquaError::MalformedGrid {
                grid: descriptor.name.clone(),
                reason: format!(
                    "descriptor has {} cells, data has {}",
                    grid.size(),
                    dataset.grid.size()
                ),
            });
        }
        Ok(grid)
    }

    pub fn regridder(&self, dataset: &Dataset) -> AquaResult<Regridder> {
        let target = self.target.clone().ok_or_else(|| {
            AquaError::Config(format!("no regrid target set for {}", self.entry))
        })?;
        let mut regridder = Regridder::new(
            self.source_grid(dataset)?,
            target,
            self.method,
            Arc::clone(&self.session.cache),
        );
        if let Some(descriptor) = &self.source_descriptor {
            regridder = regridder.with_descriptor(descriptor.clone());
        }
        Ok(regridder)
    }

    pub fn regrid(&self, dataset: &Dataset) -> AquaResult<Dataset> {
        self.regridder(dataset)?.regrid(dataset)
    }

    pub fn time_mean(
        &self,
        dataset: &Dataset,
        freq: Frequency,
        exclude_incomplete: bool,
    ) -> AquaResult<Dataset> {
        aggregate::time_mean(dataset, freq, exclude_incomplete)
    }

    pub fn field_mean(&self, dataset: &Dataset, region: Option<&Region>) -> AquaResult<Dataset> {
        aggregate::field_mean(dataset, region)
    }
}
