//! Replay-side object remapper and resource-reconstruction engine.
//!
//! Capture-time handles never mean anything on the replay device; every
//! handle-valued argument in every packet must pass through the
//! [`ObjectRemapper`] before the call is reissued. A handful of packet kinds
//! additionally need state rebuilt that cannot simply be remapped —
//! capture-replay-stable feature enablement, ray-tracing shader-group
//! handles, and shader-binding-table layout — which is `reconstruct` and
//! `sbt`'s job.

mod memory_map;
mod options;
mod pipeline_cache;
mod ptr_width;
mod reconstruct;
mod remap;
mod sbt;

pub use memory_map::{apply_changed_data_package, MemoryMapRecord, MemoryMapStack};
pub use options::{ReplayOptions, ScreenshotFormat};
pub use pipeline_cache::{PipelineCacheAccessor, PipelineCacheDeviceIdentity};
pub use ptr_width::{ensure_ptr_size_compatible, extract_device_handle, CreateDeviceClassifier};
pub use reconstruct::{enable_capture_replay_features, shader_group_capture_replay_pointer, EnabledFeatures};
pub use remap::{Handle, HandleFieldLocation, ObjectRemapper, RemapMode, RemapTable};
pub use sbt::{
    align_up, CaptureSbtLayout, ReconstructedGroup, ReplaySbtProperties, ShaderBindingTableReconstructor,
    StridedDeviceAddressRegion,
};
