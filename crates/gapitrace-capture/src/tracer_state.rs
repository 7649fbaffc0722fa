use std::sync::OnceLock;

use gapitrace_format::TraceError;

use crate::cost_log::{CostLog, CostLogConfig};
use crate::pipeline::{TracePipeline, TracePipelineConfig};
use crate::profiler::HardwareCounterProfiler;

/// The tracer's process-wide state, held as one explicitly constructed
/// object rather than as a handful of implicit global singletons.
///
/// An interception layer obtains this once via [`TracerState::global`] and
/// threads it through every intercepted call; nothing in this crate reaches
/// for ambient process state on its own.
pub struct TracerState {
    pub pipeline: TracePipeline,
    pub cost_log: CostLog,
    pub profiler: std::sync::Mutex<HardwareCounterProfiler>,
}

static GLOBAL: OnceLock<TracerState> = OnceLock::new();

impl TracerState {
    /// Builds the three collaborators from their configs and bundles them.
    /// Does not install itself as the process-wide instance; call
    /// [`TracerState::install`] for that.
    pub fn create(pipeline_config: TracePipelineConfig, cost_log_config: CostLogConfig) -> Result<Self, TraceError> {
        Ok(Self {
            pipeline: TracePipeline::create(pipeline_config)?,
            cost_log: CostLog::new(cost_log_config),
            profiler: std::sync::Mutex::new(HardwareCounterProfiler::new()),
        })
    }

    /// Installs `self` as the single process-wide instance. Returns the
    /// state back to the caller, unused, if one was already installed: a
    /// second tracer cannot coexist with the first in the same process.
    pub fn install(self) -> Result<(), Self> {
        GLOBAL.set(self)
    }

    /// The process-wide instance, if one has been installed.
    #[must_use]
    pub fn global() -> Option<&'static Self> {
        GLOBAL.get()
    }

    /// Flushes the cost log and finalizes the trace file. Idempotent: safe
    /// to call from both an explicit shutdown path and an atexit handler.
    pub fn shutdown(&self) -> Result<(), TraceError> {
        self.profiler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .stop();
        self.pipeline.finalize()?;
        if let Err(source) = self.cost_log.flush_to_file() {
            tracing::warn!(error = %source, "failed to flush cost log on shutdown");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TracePipelineConfig;
    use gapitrace_compress::Lz4Compressor;
    use gapitrace_format::TraceFileHeader;

    fn state_for_test() -> TracerState {
        let path = std::env::temp_dir().join(format!("gapitrace-tracer-state-test-{}.gfxtrace", std::process::id()));
        TracerState::create(
            TracePipelineConfig {
                output_path: path,
                compressor: Box::new(Lz4Compressor),
                format_version: TraceFileHeader::CURRENT_VERSION,
                ptr_size: 8,
                arch: 0,
                os: 0,
            },
            CostLogConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn shutdown_is_idempotent() {
        let state = state_for_test();
        state.shutdown().unwrap();
        state.shutdown().unwrap();
    }

    #[test]
    fn global_is_empty_until_installed() {
        // Uses its own process-wide static, so this only asserts the
        // uninstalled default without racing the other tests' instances.
        struct Local;
        static LOCAL: OnceLock<Local> = OnceLock::new();
        assert!(LOCAL.get().is_none());
    }
}
