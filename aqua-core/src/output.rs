//! Deterministic naming and layout of diagnostic outputs.
//!
//! Outputs go to `<outdir>/<model>/<exp>/<diagnostic>/<kind>/` with names
//! `<diagnostic>.<product>.<catalog>.<model>.<exp>[.<ref catalog>.<ref model>.<ref exp>][.<key>_<value>...].<ext>`,
//! extra keys sorted by name so the same inputs always give the same path.

use crate::dataset::Dataset;
use crate::errors::{AquaError, AquaResult};
use crate::loader::FilesLoader;
use chrono::{SecondsFormat, Utc};
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Data products; the directory keeps its conventional `netcdf` name.
    Data,
    Pdf,
    Png,
}

impl OutputKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            OutputKind::Data => "netcdf",
            OutputKind::Pdf => "pdf",
            OutputKind::Png => "png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputKind::Data => "json",
            OutputKind::Pdf => "pdf",
            OutputKind::Png => "png",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub catalog: String,
    pub model: String,
    pub exp: String,
}

/// Metadata stamped on every saved product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub aqua_version: String,
    pub date_saved: String,
    pub diagnostic: String,
    pub product: String,
    pub catalog: String,
    pub model: String,
    pub exp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<String>,
}

impl Provenance {
    fn attrs(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::from([
            ("aqua_version".to_string(), self.aqua_version.clone()),
            ("date_saved".to_string(), self.date_saved.clone()),
            ("diagnostic".to_string(), self.diagnostic.clone()),
            ("product".to_string(), self.product.clone()),
            ("catalog".to_string(), self.catalog.clone()),
            ("model".to_string(), self.model.clone()),
            ("exp".to_string(), self.exp.clone()),
        ]);
        if let Some(r) = &self.reference {
            attrs.insert("ref_catalog".to_string(), r.catalog.clone());
            attrs.insert("ref_model".to_string(), r.model.clone());
            attrs.insert("ref_exp".to_string(), r.exp.clone());
        }
        attrs
    }
}

#[derive(Debug, Clone)]
pub struct OutputSaver {
    pub diagnostic: String,
    pub catalog: String,
    pub model: String,
    pub exp: String,
    pub outdir: PathBuf,
    pub reference: Option<Reference>,
    /// Overwrite existing outputs; when false, existing files are kept.
    pub rebuild: bool,
}

impl OutputSaver {
    pub fn new(
        diagnostic: &str,
        catalog: &str,
        model: &str,
        exp: &str,
        outdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            diagnostic: diagnostic.to_string(),
            catalog: catalog.to_string(),
            model: model.to_string(),
            exp: exp.to_string(),
            outdir: outdir.into(),
            reference: None,
            rebuild: true,
        }
    }

    pub fn with_reference(mut self, catalog: &str, model: &str, exp: &str) -> Self {
        self.reference = Some(Reference {
            catalog: catalog.to_string(),
            model: model.to_string(),
            exp: exp.to_string(),
        });
        self
    }

    pub fn filename(&self, product: &str, extra: &BTreeMap<String, String>, ext: &str) -> String {
        let mut parts = vec![
            self.diagnostic.as_str(),
            product,
            self.catalog.as_str(),
            self.model.as_str(),
            self.exp.as_str(),
        ];
        if let Some(r) = &self.reference {
            parts.extend([r.catalog.as_str(), r.model.as_str(), r.exp.as_str()]);
        }
        let mut name = parts.join(".");
        for (key, value) in extra {
            name.push_str(&format!(".{key}_{value}"));
        }
        format!("{name}.{ext}")
    }

    pub fn directory(&self, kind: OutputKind) -> PathBuf {
        self.outdir
            .join(&self.model)
            .join(&self.exp)
            .join(&self.diagnostic)
            .join(kind.dir_name())
    }

    pub fn path(&self, kind: OutputKind, product: &str, extra: &BTreeMap<String, String>) -> PathBuf {
        self.directory(kind)
            .join(self.filename(product, extra, kind.extension()))
    }

    fn provenance(&self, product: &str, history: Option<String>) -> Provenance {
        Provenance {
            aqua_version: VERSION.to_string(),
            date_saved: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            diagnostic: self.diagnostic.clone(),
            product: product.to_string(),
            catalog: self.catalog.clone(),
            model: self.model.clone(),
            exp: self.exp.clone(),
            reference: self.reference.clone(),
            history,
        }
    }

    fn should_write(&self, path: &Path) -> bool {
        if !self.rebuild && path.exists() {
            info!("{} exists, not rebuilding", path.display());
            return false;
        }
        true
    }

    /// Saves a data product with provenance attributes and a history line.
    pub fn save_dataset(
        &self,
        dataset: &Dataset,
        product: &str,
        extra: &BTreeMap<String, String>,
    ) -> AquaResult<PathBuf> {
        let path = self.path(OutputKind::Data, product, extra);
        if !self.should_write(&path) {
            return Ok(path);
        }
        let mut dataset = dataset.clone();
        let provenance = self.provenance(product, None);
        dataset.attrs.extend(provenance.attrs());
        dataset.append_history(&format!(
            "{} saved by {} {}",
            provenance.date_saved, self.diagnostic, product
        ));
        FilesLoader::write(&dataset, &path)?;
        info!("Saved {}", path.display());
        Ok(path)
    }

    /// Saves rendered figure bytes with a `.provenance.json` sidecar.
    pub fn save_figure(
        &self,
        bytes: &[u8],
        kind: OutputKind,
        product: &str,
        extra: &BTreeMap<String, String>,
        history: Option<String>,
    ) -> AquaResult<PathBuf> {
        if kind == OutputKind::Data {
            return Err(AquaError::Error(
                "figures must be saved as pdf or png".to_string(),
            ));
        }
        let path = self.path(kind, product, extra);
        if !self.should_write(&path) {
            return Ok(path);
        }
        let dir = self.directory(kind);
        std::fs::create_dir_all(&dir).map_err(|e| AquaError::io(&dir, e))?;
        std::fs::write(&path, bytes).map_err(|e| AquaError::io(&path, e))?;

        let sidecar = path.with_extension(format!("{}.provenance.json", kind.extension()));
        let metadata = serde_json::to_string_pretty(&self.provenance(product, history))?;
        std::fs::write(&sidecar, metadata).map_err(|e| AquaError::io(&sidecar, e))?;
        info!("Saved {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::HorizontalGrid;

    #[test]
    fn names_are_deterministic() {
        let saver = OutputSaver::new("timeseries", "climatedt", "IFS-NEMO", "historical", "/out");
        let extra = BTreeMap::from([
            ("var".to_string(), "2t".to_string()),
            ("freq".to_string(), "monthly".to_string()),
        ]);
        assert_eq!(
            saver.filename("mean", &extra, "json"),
            "timeseries.mean.climatedt.IFS-NEMO.historical.freq_monthly.var_2t.json"
        );
        assert_eq!(
            saver.path(OutputKind::Png, "mean", &BTreeMap::new()),
            PathBuf::from("/out/IFS-NEMO/historical/timeseries/png/timeseries.mean.climatedt.IFS-NEMO.historical.png")
        );

        let saver = saver.with_reference("obs", "ERA5", "era5");
        assert_eq!(
            saver.filename("bias", &BTreeMap::new(), "pdf"),
            "timeseries.bias.climatedt.IFS-NEMO.historical.obs.ERA5.era5.pdf"
        );
    }

    #[test]
    fn saved_dataset_carries_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let saver = OutputSaver::new("gm", "ci", "IFS", "control", dir.path());
        let ds = Dataset::new(HorizontalGrid::regular(2, 1).unwrap(), vec![]);
        let path = saver.save_dataset(&ds, "mean", &BTreeMap::new()).unwrap();
        let back = FilesLoader::read(&path).unwrap();
        assert_eq!(back.attrs["aqua_version"], VERSION);
        assert_eq!(back.attrs["model"], "IFS");
        assert!(back.attrs["history"].contains("saved by gm mean"));
    }

    #[test]
    fn figures_and_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let mut saver = OutputSaver::new("gm", "ci", "IFS", "control", dir.path());
        let path = saver
            .save_figure(b"%PDF-1.4", OutputKind::Pdf, "map", &BTreeMap::new(), None)
            .unwrap();
        assert!(path.with_extension("pdf.provenance.json").is_file());

        saver.rebuild = false;
        saver
            .save_figure(b"other", OutputKind::Pdf, "map", &BTreeMap::new(), None)
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");
        assert!(saver
            .save_figure(b"", OutputKind::Data, "map", &BTreeMap::new(), None)
            .is_err());
    }
}
