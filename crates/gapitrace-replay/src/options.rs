use std::path::PathBuf;

use crate::remap::RemapMode;

/// Parsed replay configuration (spec §6 table). The replay engine only ever
/// sees this struct; argv/env parsing is `gapitrace-replay-cli`'s job.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub open: PathBuf,

    pub num_loops: u32,
    pub loop_start_frame: u64,
    pub loop_end_frame: u64,

    pub screenshot: bool,
    pub screenshot_format: ScreenshotFormat,
    pub screenshot_prefix: PathBuf,

    pub compatibility_mode: bool,
    pub exit_on_any_error: bool,
    pub enable_portability_table_support: bool,

    pub preload_trace_file: bool,
    pub memory_percentage: u8,
    pub premapping: bool,

    pub enable_pipeline_cache: bool,
    pub pipeline_cache_path: Option<PathBuf>,

    pub force_sync_img_idx: bool,
    pub headless: bool,
    pub vsync_off: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenshotFormat {
    #[default]
    Png,
    Bmp,
    Ppm,
}

impl ReplayOptions {
    #[must_use]
    pub fn new(open: PathBuf) -> Self {
        Self {
            open,
            num_loops: 1,
            loop_start_frame: 0,
            loop_end_frame: u64::MAX,
            screenshot: false,
            screenshot_format: ScreenshotFormat::default(),
            screenshot_prefix: PathBuf::from("screenshot"),
            compatibility_mode: false,
            exit_on_any_error: false,
            enable_portability_table_support: true,
            preload_trace_file: false,
            memory_percentage: 100,
            premapping: false,
            enable_pipeline_cache: false,
            pipeline_cache_path: None,
            force_sync_img_idx: false,
            headless: false,
            vsync_off: false,
        }
    }

    /// Which remap mode the object remapper should use. Premapped mode
    /// requires a preload pass, so it only applies when both `premapping`
    /// and `preload_trace_file` are set.
    #[must_use]
    pub fn remap_mode(&self) -> RemapMode {
        if self.premapping && self.preload_trace_file {
            RemapMode::Premapped
        } else {
            RemapMode::OnDemand
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_demand_is_the_default_remap_mode() {
        let options = ReplayOptions::new(PathBuf::from("trace.gfxtrace"));
        assert_eq!(options.remap_mode(), RemapMode::OnDemand);
    }

    #[test]
    fn premapped_requires_both_flags() {
        let mut options = ReplayOptions::new(PathBuf::from("trace.gfxtrace"));
        options.premapping = true;
        assert_eq!(options.remap_mode(), RemapMode::OnDemand);

        options.preload_trace_file = true;
        assert_eq!(options.remap_mode(), RemapMode::Premapped);
    }
}
