use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use gapitrace_format::{TraceError, TraceErrorKind};

use crate::remap::Handle;

/// `VkPhysicalDeviceProperties::pipelineCacheUUID` is 16 bytes.
pub const PIPELINE_CACHE_UUID_SIZE: usize = 16;

/// Replay device identity folded into the cache file name, so cache data
/// captured against one GPU is never loaded against another.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineCacheDeviceIdentity {
    pub vendor_id: u32,
    pub device_id: u32,
    pub uuid: [u8; PIPELINE_CACHE_UUID_SIZE],
}

/// Loads and saves raw `VkPipelineCache` blobs on disk, one file per
/// replay-time cache handle, so cache data persists and reloads across runs
/// (spec §6, `enablePipelineCache`/`pipelineCachePath`).
pub struct PipelineCacheAccessor {
    root_path: PathBuf,
    device: PipelineCacheDeviceIdentity,
    loaded: HashMap<Handle, Vec<u8>>,
}

impl PipelineCacheAccessor {
    #[must_use]
    pub fn new(root_path: PathBuf, device: PipelineCacheDeviceIdentity) -> Self {
        Self {
            root_path,
            device,
            loaded: HashMap::new(),
        }
    }

    fn file_path(&self, key: Handle) -> PathBuf {
        let mut uuid_digits = String::new();
        for byte in self.device.uuid {
            uuid_digits.push_str(&byte.to_string());
        }
        self.root_path
            .join(format!("{key}-{}-{}-{uuid_digits}.dat", self.device.vendor_id, self.device.device_id))
    }

    /// Loads the cache blob for `key` from disk into the in-memory map, if a
    /// file exists for it. A missing file is not an error — replay proceeds
    /// with an empty cache, matching a first-ever run.
    pub fn load(&mut self, key: Handle) -> Result<bool, TraceError> {
        let path = self.file_path(key);
        match fs::read(&path) {
            Ok(data) => {
                tracing::debug!(path = %path.display(), "pipeline cache data loaded");
                self.loaded.insert(key, data);
                Ok(true)
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "pipeline cache data file not found");
                Ok(false)
            }
            Err(source) => Err(
                TraceError::new("gapitrace_replay::pipeline_cache::PipelineCacheAccessor::load", TraceErrorKind::StreamIO)
                    .with_source(source),
            ),
        }
    }

    /// Returns the previously `load`ed blob for `key`, if any.
    #[must_use]
    pub fn get(&self, key: Handle) -> Option<&[u8]> {
        self.loaded.get(&key).map(Vec::as_slice)
    }

    /// Writes `data` to disk under `key`, creating the cache root directory
    /// first if it doesn't exist.
    pub fn save(&self, key: Handle, data: &[u8]) -> Result<(), TraceError> {
        fs::create_dir_all(&self.root_path).map_err(|source| {
            TraceError::new("gapitrace_replay::pipeline_cache::PipelineCacheAccessor::save", TraceErrorKind::StreamIO)
                .with_source(source)
        })?;

        let path = self.file_path(key);
        fs::write(&path, data).map_err(|source| {
            TraceError::new("gapitrace_replay::pipeline_cache::PipelineCacheAccessor::save", TraceErrorKind::StreamIO)
                .with_source(source)
        })?;
        tracing::debug!(path = %path.display(), "pipeline cache data saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_root() -> PathBuf {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("gapitrace-pipeline-cache-test-{}-{unique}", std::process::id()))
    }

    fn identity() -> PipelineCacheDeviceIdentity {
        PipelineCacheDeviceIdentity {
            vendor_id: 0x1002,
            device_id: 0x7340,
            uuid: [7u8; PIPELINE_CACHE_UUID_SIZE],
        }
    }

    #[test]
    fn load_of_missing_file_is_not_an_error() {
        let mut accessor = PipelineCacheAccessor::new(test_root(), identity());
        assert!(!accessor.load(0x1234).unwrap());
        assert!(accessor.get(0x1234).is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let root = test_root();
        let accessor = PipelineCacheAccessor::new(root.clone(), identity());
        accessor.save(0x1234, &[1, 2, 3, 4]).unwrap();

        let mut reloaded = PipelineCacheAccessor::new(root, identity());
        assert!(reloaded.load(0x1234).unwrap());
        assert_eq!(reloaded.get(0x1234).unwrap(), &[1, 2, 3, 4]);
    }
}
