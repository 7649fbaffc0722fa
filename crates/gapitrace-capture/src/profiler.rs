/// Opaque hardware-counter profiler handle.
///
/// No GAPI/driver surface is in scope for this crate, so this does not read
/// real hardware counters; it exists so [`crate::TracerState`] has a concrete,
/// explicitly-owned third collaborator to start and stop alongside the cost
/// log and the packet pipeline, per the process-wide-state design. A real
/// backend would plug counter collection in behind `start`/`stop`.
#[derive(Debug, Default)]
pub struct HardwareCounterProfiler {
    running: bool,
}

impl HardwareCounterProfiler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        tracing::debug!("hardware counter profiler start (no-op backend)");
        self.running = true;
    }

    pub fn stop(&mut self) {
        tracing::debug!("hardware counter profiler stop (no-op backend)");
        self.running = false;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }
}
