//! Two-level cache of regrid weights: in memory for the session, on disk
//! across runs.
//!
//! Disk entries are written to a temporary file in the cache directory and
//! renamed into place, so a reader never sees a partially written file and
//! concurrent writers of the same key leave one complete copy.

use super::{RegridMethod, RegridWeights};
use crate::errors::{AquaError, AquaResult};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WeightsKey {
    pub source_grid: String,
    pub target_grid: String,
    pub method: RegridMethod,
    pub mask_digest: Option<u64>,
}

impl WeightsKey {
    pub fn new(source_grid: &str, target_grid: &str, method: RegridMethod) -> Self {
        Self {
            source_grid: source_grid.to_string(),
            target_grid: target_grid.to_string(),
            method,
            mask_digest: None,
        }
    }

    pub fn masked(mut self, digest: u64) -> Self {
        self.mask_digest = Some(digest);
        self
    }

    /// `weights_<src>_<tgt>_<method>[_masked_<digest>].json`
    pub fn file_name(&self) -> String {
        let mut name = format!(
            "weights_{}_{}_{}",
            sanitize(&self.source_grid),
            sanitize(&self.target_grid),
            self.method
        );
        if let Some(digest) = self.mask_digest {
            name.push_str(&format!("_masked_{digest:016x}"));
        }
        name.push_str(".json");
        name
    }

    fn matches(&self, weights: &RegridWeights) -> bool {
        weights.source_grid == self.source_grid
            && weights.target_grid == self.target_grid
            && weights.method == self.method
            && weights.mask_digest == self.mask_digest
    }
}

impl std::fmt::Display for WeightsKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{} ({})", self.source_grid, self.target_grid, self.method)?;
        if self.mask_digest.is_some() {
            write!(f, " masked")?;
        }
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

#[derive(Debug, Default)]
pub struct WeightsCache {
    dir: Option<PathBuf>,
    memory: Mutex<HashMap<WeightsKey, Arc<RegridWeights>>>,
    computations: AtomicUsize,
    disk_hits: AtomicUsize,
}

impl WeightsCache {
    /// A cache persisting weights under `dir`, created if needed.
    pub fn new(dir: impl Into<PathBuf>) -> AquaResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| AquaError::io(&dir, e))?;
        Ok(Self {
            dir: Some(dir),
            ..Self::default()
        })
    }

    /// A session-only cache.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Number of times weights had to be generated.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    /// Number of times weights were read back from disk.
    pub fn disk_hits(&self) -> usize {
        self.disk_hits.load(Ordering::Relaxed)
    }

    pub fn get_or_compute<F>(&self, key: &WeightsKey, compute: F) -> AquaResult<Arc<RegridWeights>>
    where
        F: FnOnce() -> AquaResult<RegridWeights>,
    {
        if let Some(weights) = self.lock().get(key) {
            return Ok(Arc::clone(weights));
        }

        let weights = match self.read_disk(key) {
            Some(weights) => {
                self.disk_hits.fetch_add(1, Ordering::Relaxed);
                weights
            }
            None => {
                info!("Generating regrid weights {key}");
                let weights = compute()?;
                self.computations.fetch_add(1, Ordering::Relaxed);
                self.write_disk(key, &weights)?;
                weights
            }
        };

        let weights = Arc::new(weights);
        self.lock().insert(key.clone(), Arc::clone(&weights));
        Ok(weights)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<WeightsKey, Arc<RegridWeights>>> {
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_disk(&self, key: &WeightsKey) -> Option<RegridWeights> {
        let path = self.dir.as_ref()?.join(key.file_name());
        let file = std::fs::File::open(&path).ok()?;
        match serde_json::from_reader::<_, RegridWeights>(BufReader::new(file)) {
            Ok(weights) if key.matches(&weights) => {
                debug!("Loaded regrid weights from {}", path.display());
                Some(weights)
            }
            Ok(_) => {
                warn!("Stale weights in {}, regenerating", path.display());
                None
            }
            Err(e) => {
                warn!("Unreadable weights in {}: {e}, regenerating", path.display());
                None
            }
        }
    }

    fn write_disk(&self, key: &WeightsKey, weights: &RegridWeights) -> AquaResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join(key.file_name());
        let tmp = NamedTempFile::new_in(dir).map_err(|e| AquaError::io(dir, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, weights)?;
            writer.flush().map_err(|e| AquaError::io(tmp.path(), e))?;
        }
        tmp.persist(&path).map_err(|e| AquaError::io(&path, e.error))?;
        debug!("Wrote regrid weights to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::HorizontalGrid;

    fn compute_r4() -> AquaResult<RegridWeights> {
        let source = HorizontalGrid::regular(8, 4)?;
        let target = HorizontalGrid::regular(4, 2)?;
        RegridWeights::compute(&source, &target, RegridMethod::Conservative, None)
    }

    #[test]
    fn file_names() {
        let key = WeightsKey::new("tco79", "r100", RegridMethod::Nearest);
        assert_eq!(key.file_name(), "weights_tco79_r100_nearest.json");
        let key = WeightsKey::new("hpz5_nested", "r 1/2", RegridMethod::Conservative).masked(7);
        assert_eq!(
            key.file_name(),
            "weights_hpz5-nested_r-1-2_conservative_masked_0000000000000007.json"
        );
        let other = WeightsKey::new("hpz5_nested", "r 1/2", RegridMethod::Conservative).masked(8);
        assert_ne!(key.file_name(), other.file_name());
    }

    #[test]
    fn memory_hit_skips_compute() {
        let cache = WeightsCache::in_memory();
        let key = WeightsKey::new("r8x4", "r4x2", RegridMethod::Conservative);
        let first = cache.get_or_compute(&key, compute_r4).unwrap();
        let second = cache
            .get_or_compute(&key, || panic!("weights recomputed"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.computations(), 1);
    }

    #[test]
    fn disk_entries_survive_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let key = WeightsKey::new("r8x4", "r4x2", RegridMethod::Conservative);
        let written = WeightsCache::new(dir.path())
            .unwrap()
            .get_or_compute(&key, compute_r4)
            .unwrap();
        assert!(dir.path().join(key.file_name()).is_file());

        let cache = WeightsCache::new(dir.path()).unwrap();
        let read = cache
            .get_or_compute(&key, || panic!("weights recomputed"))
            .unwrap();
        assert_eq!(*written, *read);
        assert_eq!(cache.disk_hits(), 1);
        assert_eq!(cache.computations(), 0);
    }

    #[test]
    fn corrupt_entries_are_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let key = WeightsKey::new("r8x4", "r4x2", RegridMethod::Conservative);
        std::fs::write(dir.path().join(key.file_name()), "{not json").unwrap();
        let cache = WeightsCache::new(dir.path()).unwrap();
        cache.get_or_compute(&key, compute_r4).unwrap();
        assert_eq!(cache.computations(), 1);

        let reread: RegridWeights = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join(key.file_name())).unwrap(),
        )
        .unwrap();
        assert_eq!(reread.n_target, 8);
    }
}
