//! Low Resolution Archive: regridded, time-averaged yearly files of selected
//! variables, plus the catalog source that reads them back.

use crate::aggregate::Frequency;
use crate::catalog::{Backend, SourceSpec};
use crate::errors::{AquaError, AquaResult};
use crate::loader::FilesLoader;
use crate::reader::Session;
use chrono::Datelike;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct LraGenerator<'a> {
    session: &'a Session,
    model: String,
    exp: String,
    source: Option<String>,
    catalog: Option<String>,
    resolution: String,
    frequency: Frequency,
    outdir: PathBuf,
    overwrite: bool,
    exclude_incomplete: bool,
}

#[derive(Serialize)]
struct CatalogDocument {
    models: BTreeMap<String, BTreeMap<String, BTreeMap<String, SourceSpec>>>,
}

impl<'a> LraGenerator<'a> {
    pub fn new(
        session: &'a Session,
        model: &str,
        exp: &str,
        resolution: &str,
        frequency: Frequency,
        outdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session,
            model: model.to_string(),
            exp: exp.to_string(),
            source: None,
            catalog: None,
            resolution: resolution.to_string(),
            frequency,
            outdir: outdir.into(),
            overwrite: false,
            exclude_incomplete: true,
        }
    }

    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn catalog(mut self, catalog: &str) -> Self {
        self.catalog = Some(catalog.to_string());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Keep periods with missing samples (dropped by default).
    pub fn exclude_incomplete(mut self, exclude: bool) -> Self {
        self.exclude_incomplete = exclude;
        self
    }

    /// `<outdir>/<model>/<exp>/<resolution>/<frequency>`
    pub fn output_dir(&self) -> PathBuf {
        self.outdir
            .join(&self.model)
            .join(&self.exp)
            .join(&self.resolution)
            .join(self.frequency.to_string())
    }

    pub fn file_name(&self, variable: &str, year: i32) -> String {
        format!(
            "{variable}_{}_{}_{}_{}_{year}.json",
            self.model, self.exp, self.resolution, self.frequency
        )
    }

    /// Name of the catalog source pointing at the archive.
    pub fn source_name(&self) -> String {
        format!("lra-{}-{}", self.resolution, self.frequency)
    }

    /// Builds the archive for `variables`, returning every file it covers.
    pub fn generate(&self, variables: &[&str]) -> AquaResult<Vec<PathBuf>> {
        let mut builder = self
            .session
            .reader(&self.model, &self.exp)
            .regrid(&self.resolution);
        if let Some(source) = &self.source {
            builder = builder.source(source);
        }
        if let Some(catalog) = &self.catalog {
            builder = builder.catalog(catalog);
        }
        let reader = builder.build()?;
        let dir = self.output_dir();

        let mut written = Vec::new();
        for variable in variables {
            info!("LRA {variable} for {}", reader.entry());
            let data = reader.retrieve(Some(&[*variable]))?;
            let regridded = reader.regrid(&data)?;
            let averaged = reader.time_mean(&regridded, self.frequency, self.exclude_incomplete)?;
            if averaged.time.is_empty() {
                warn!("no complete {} periods for {variable}", self.frequency);
                continue;
            }

            let mut years: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
            for (i, t) in averaged.time.iter().enumerate() {
                years.entry(t.year()).or_default().push(i);
            }
            for (year, indices) in years {
                let path = dir.join(self.file_name(variable, year));
                if path.exists() && !self.overwrite {
                    info!("{} exists, skipping", path.display());
                    written.push(path);
                    continue;
                }
                let mut part = averaged.take_time(&indices);
                part.attrs
                    .insert("resolution".to_string(), self.resolution.clone());
                part.attrs
                    .insert("frequency".to_string(), self.frequency.to_string());
                part.append_history(&format!("LRA {year} written"));
                FilesLoader::write(&part, &path)?;
                info!("Wrote {}", path.display());
                written.push(path);
            }
        }
        Ok(written)
    }

    /// Catalog source reading the archive back through the `files` driver.
    pub fn catalog_source(&self) -> SourceSpec {
        SourceSpec {
            description: Some(format!(
                "LRA at {} {} means",
                self.resolution, self.frequency
            )),
            backend: Backend::Files {
                paths: vec![self.output_dir().join("*.json").to_string_lossy().into_owned()],
            },
            fixer_name: None,
            source_grid_name: Some(self.resolution.clone()),
        }
    }

    /// Writes a catalog YAML file declaring [`Self::catalog_source`].
    pub fn write_catalog_entry(&self, path: &Path) -> AquaResult<()> {
        let document = CatalogDocument {
            models: BTreeMap::from([(
                self.model.clone(),
                BTreeMap::from([(
                    self.exp.clone(),
                    BTreeMap::from([(self.source_name(), self.catalog_source())]),
                )]),
            )]),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AquaError::io(parent, e))?;
        }
        let text = serde_yaml::to_string(&document)?;
        std::fs::write(path, text).map_err(|e| AquaError::io(path, e))?;
        info!("Catalog entry {} written to {}", self.source_name(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, CatalogRegistry, ResolutionPolicy};
    use crate::dataset::{DataArray, Dataset};
    use crate::fixer::FixerTable;
    use crate::grid::{GridRegistry, HorizontalGrid};
    use crate::regrid::WeightsCache;
    use chrono::{Duration, NaiveDate};
    use ndarray::Array3;

    fn session() -> Session {
        let mut catalog = Catalog::new("ci");
        catalog.add_source(
            "IFS",
            "control",
            "daily",
            SourceSpec {
                description: None,
                backend: Backend::Memory {
                    key: "daily".to_string(),
                },
                fixer_name: None,
                source_grid_name: None,
            },
            Path::new("."),
        );
        let mut catalogs = CatalogRegistry::new(ResolutionPolicy::FirstMatch);
        catalogs.push(catalog);
        let session = Session::new(
            catalogs,
            GridRegistry::new(),
            FixerTable::new(),
            WeightsCache::in_memory(),
        );

        // 2019-12-01 .. 2020-02-29, daily
        let start = NaiveDate::from_ymd_opt(2019, 12, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let time: Vec<_> = (0..91).map(|d| start + Duration::days(d)).collect();
        let mut ds = Dataset::new(HorizontalGrid::regular(8, 4).unwrap(), time);
        ds.insert(DataArray::new("2t", "K", Array3::from_elem((91, 1, 32), 280.0)))
            .unwrap();
        ds.insert(DataArray::new("msl", "Pa", Array3::from_elem((91, 1, 32), 101000.0)))
            .unwrap();
        session.loaders.memory().insert("daily", ds);
        session
    }

    #[test]
    fn yearly_files_and_catalog_entry() {
        let session = session();
        let dir = tempfile::tempdir().unwrap();
        let lra = LraGenerator::new(&session, "IFS", "control", "r4x2", Frequency::Monthly, dir.path());
        let files = lra.generate(&["2t"]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "2t_IFS_control_r4x2_monthly_2019.json",
                "2t_IFS_control_r4x2_monthly_2020.json"
            ]
        );
        let second = FilesLoader::read(&files[1]).unwrap();
        assert_eq!(second.time.len(), 2);
        assert_eq!(second.grid.size(), 8);

        let catalog_file = dir.path().join("catalog/lra.yaml");
        lra.write_catalog_entry(&catalog_file).unwrap();
        let mut catalog = Catalog::new("lra");
        catalog
            .merge_yaml(
                &std::fs::read_to_string(&catalog_file).unwrap(),
                catalog_file.parent().unwrap(),
            )
            .unwrap();
        let entry = catalog.lookup("IFS", "control", Some("lra-r4x2-monthly")).unwrap();
        let back = FilesLoader::read(&files[0]).unwrap();
        assert_eq!(back.time.len(), 1);
        assert_eq!(entry.spec.source_grid_name.as_deref(), Some("r4x2"));
    }

    #[test]
    fn archive_with_several_variables_reads_back() {
        let session = session();
        let dir = tempfile::tempdir().unwrap();
        let lra = LraGenerator::new(&session, "IFS", "control", "r4x2", Frequency::Monthly, dir.path());
        assert_eq!(lra.generate(&["2t", "msl"]).unwrap().len(), 4);
        let catalog_file = dir.path().join("catalog/lra.yaml");
        lra.write_catalog_entry(&catalog_file).unwrap();

        let mut catalog = Catalog::new("lra");
        catalog
            .merge_yaml(
                &std::fs::read_to_string(&catalog_file).unwrap(),
                catalog_file.parent().unwrap(),
            )
            .unwrap();
        let mut catalogs = CatalogRegistry::new(ResolutionPolicy::FirstMatch);
        catalogs.push(catalog);
        let archive = Session::new(
            catalogs,
            GridRegistry::new(),
            FixerTable::new(),
            WeightsCache::in_memory(),
        );
        let reader = archive
            .reader("IFS", "control")
            .source("lra-r4x2-monthly")
            .build()
            .unwrap();

        let t = reader.retrieve(Some(&["2t"])).unwrap();
        assert_eq!(t.variable_names(), vec!["2t"]);
        assert_eq!(t.time.len(), 3);

        let all = reader.retrieve(None).unwrap();
        assert_eq!(all.variable_names(), vec!["2t", "msl"]);
        assert_eq!(all.time.len(), 3);
        assert!((all.get("msl").unwrap().values[[2, 0, 7]] - 101000.0).abs() < 1e-6);
        assert!((all.get("2t").unwrap().values[[0, 0, 0]] - 280.0).abs() < 1e-9);
    }

    #[test]
    fn existing_files_are_kept() {
        let session = session();
        let dir = tempfile::tempdir().unwrap();
        let lra = LraGenerator::new(&session, "IFS", "control", "r4x2", Frequency::Monthly, dir.path());
        let path = lra.output_dir().join(lra.file_name("2t", 2019));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "sentinel").unwrap();

        lra.generate(&["2t"]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "sentinel");

        let lra = lra.overwrite(true);
        lra.generate(&["2t"]).unwrap();
        assert!(FilesLoader::read(&path).is_ok());
    }
}
