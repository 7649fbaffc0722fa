//! Capture-side trace-packet pipeline.
//!
//! Owns the three process-wide objects the tracer entry-point module is
//! expected to hold explicitly rather than stash behind implicit globals:
//! the write-side packet pipeline ([`pipeline::TracePipeline`]), the per-call
//! cost log ([`cost_log::CostLog`]), and the hardware-counter profiler handle
//! ([`profiler::HardwareCounterProfiler`]). [`TracerState`] bundles all three.

mod cost_log;
mod pipeline;
mod profiler;
mod tracer_state;

pub use cost_log::{CostLog, CostLogConfig, CostLogFormat};
pub use pipeline::{next_packet_index, PacketDisposition, PacketMeta, PortabilityClassifier, TracePipeline, TracePipelineConfig};
pub use profiler::HardwareCounterProfiler;
pub use tracer_state::TracerState;
