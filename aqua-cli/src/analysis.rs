//! Runs a configured set of diagnostics as external commands.
//!
//! ```yaml
//! diagnostics:
//!   global_biases:
//!     command: python diagnostics/global_biases/cli_global_biases.py
//!     extra_args: ["--config", "global_biases.yaml"]
//!   teleconnections:
//!     command: python diagnostics/teleconnections/cli_teleconnections.py
//!     enabled: false
//! ```
//!
//! The same layout is accepted as TOML when the file ends in `.toml`. Every
//! command gets `--model --exp [--source] [--catalog] --outputdir --loglevel`
//! appended after its extra arguments.

use aqua_core::errors::{AquaError, AquaResult};
use log::{error, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticConfig {
    pub command: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub diagnostics: BTreeMap<String, DiagnosticConfig>,
}

impl AnalysisConfig {
    pub fn read(path: &Path) -> AquaResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AquaError::io(path, e))?;
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let parsed = if is_toml {
            toml::from_str(&text).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&text).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| AquaError::Config(format!("{}: {e}", path.display())))
    }

    pub fn enabled(&self) -> impl Iterator<Item = (&String, &DiagnosticConfig)> {
        self.diagnostics.iter().filter(|(_, d)| d.enabled)
    }
}

/// What every diagnostic in a run is pointed at.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub model: String,
    pub exp: String,
    pub source: Option<String>,
    pub catalog: Option<String>,
    pub outputdir: PathBuf,
    pub loglevel: String,
}

impl RunContext {
    pub fn diagnostic_dir(&self, name: &str) -> PathBuf {
        self.outputdir.join(&self.model).join(&self.exp).join(name)
    }

    /// Arguments appended to every command. The diagnostics lay out their
    /// own `<model>/<exp>/<diagnostic>` tree under `--outputdir`.
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "--model".to_string(),
            self.model.clone(),
            "--exp".to_string(),
            self.exp.clone(),
        ];
        if let Some(source) = &self.source {
            args.extend(["--source".to_string(), source.clone()]);
        }
        if let Some(catalog) = &self.catalog {
            args.extend(["--catalog".to_string(), catalog.clone()]);
        }
        args.extend([
            "--outputdir".to_string(),
            self.outputdir.to_string_lossy().into_owned(),
            "--loglevel".to_string(),
            self.loglevel.clone(),
        ]);
        args
    }
}

#[derive(Debug)]
pub struct Outcome {
    pub name: String,
    pub log: PathBuf,
    pub result: Result<(), String>,
}

impl Outcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs one diagnostic with stdout and stderr captured in `<name>.log`.
pub fn run_diagnostic(name: &str, diagnostic: &DiagnosticConfig, ctx: &RunContext) -> Outcome {
    let dir = ctx.diagnostic_dir(name);
    let log = dir.join(format!("{name}.log"));
    let result = spawn(name, diagnostic, ctx, &dir, &log);
    match &result {
        Ok(()) => info!("{name} finished, log in {}", log.display()),
        Err(e) => error!("{name} failed: {e} (see {})", log.display()),
    }
    Outcome {
        name: name.to_string(),
        log,
        result,
    }
}

fn spawn(
    name: &str,
    diagnostic: &DiagnosticConfig,
    ctx: &RunContext,
    dir: &Path,
    log: &Path,
) -> Result<(), String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("cannot create {}: {e}", dir.display()))?;
    let stdout = File::create(log).map_err(|e| format!("cannot create {}: {e}", log.display()))?;
    let stderr = stdout.try_clone().map_err(|e| e.to_string())?;

    info!("Running {name}: {}", diagnostic.command);
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("{} \"$@\"", diagnostic.command))
        .arg(name)
        .args(&diagnostic.extra_args)
        .args(ctx.common_args())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .status()
        .map_err(|e| format!("cannot start: {e}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("exited with {status}"))
    }
}

/// Runs every enabled diagnostic, at most `threads` at a time (0: one per core).
pub fn run_all(config: &AnalysisConfig, ctx: &RunContext, threads: usize) -> AquaResult<Vec<Outcome>> {
    let enabled: Vec<_> = config.enabled().collect();
    let skipped = config.diagnostics.len() - enabled.len();
    if skipped > 0 {
        warn!("{skipped} diagnostics disabled");
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| AquaError::Error(format!("cannot start worker pool: {e}")))?;
    Ok(pool.install(|| {
        enabled
            .par_iter()
            .map(|(name, diagnostic)| run_diagnostic(name, diagnostic, ctx))
            .collect()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(dir: &Path) -> RunContext {
        RunContext {
            model: "IFS".to_string(),
            exp: "control".to_string(),
            source: Some("lra-r100-monthly".to_string()),
            catalog: None,
            outputdir: dir.to_path_buf(),
            loglevel: "INFO".to_string(),
        }
    }

    #[test]
    fn yaml_and_toml_configs() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("analysis.yaml");
        std::fs::write(
            &yaml,
            "diagnostics:\n  gm:\n    command: echo\n  ecmean:\n    command: echo\n    enabled: false\n",
        )
        .unwrap();
        let toml = dir.path().join("analysis.toml");
        std::fs::write(
            &toml,
            "[diagnostics.gm]\ncommand = \"echo\"\n\n[diagnostics.ecmean]\ncommand = \"echo\"\nenabled = false\n",
        )
        .unwrap();

        let from_yaml = AnalysisConfig::read(&yaml).unwrap();
        assert_eq!(from_yaml, AnalysisConfig::read(&toml).unwrap());
        let enabled: Vec<&String> = from_yaml.enabled().map(|(n, _)| n).collect();
        assert_eq!(enabled, vec!["gm"]);
    }

    #[test]
    fn failures_are_isolated_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalysisConfig {
            diagnostics: BTreeMap::from([
                (
                    "good".to_string(),
                    DiagnosticConfig {
                        command: "echo ran".to_string(),
                        extra_args: vec!["--flag".to_string()],
                        enabled: true,
                    },
                ),
                (
                    "bad".to_string(),
                    DiagnosticConfig {
                        command: "echo broken >&2; false".to_string(),
                        extra_args: vec![],
                        enabled: true,
                    },
                ),
            ]),
        };
        let ctx = context(dir.path());
        let outcomes = run_all(&config, &ctx, 2).unwrap();
        assert_eq!(outcomes.len(), 2);

        let good = outcomes.iter().find(|o| o.name == "good").unwrap();
        assert!(good.succeeded());
        let log = std::fs::read_to_string(&good.log).unwrap();
        assert!(log.contains("ran --flag --model IFS --exp control --source lra-r100-monthly"));
        assert_eq!(good.log, dir.path().join("IFS/control/good/good.log"));
        let root = format!("--outputdir {} --loglevel INFO", dir.path().display());
        assert!(log.contains(&root), "{log}");

        let bad = outcomes.iter().find(|o| o.name == "bad").unwrap();
        assert!(!bad.succeeded());
        assert!(std::fs::read_to_string(&bad.log).unwrap().contains("broken"));
    }
}
