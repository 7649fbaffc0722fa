use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use gapitrace_replay::{ReplayOptions, ScreenshotFormat as ReplayScreenshotFormat};

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ScreenshotFormat {
    #[default]
    Png,
    Bmp,
    Ppm,
}

/// Replays a captured trace file against the live GAPI.
#[derive(Parser, Debug)]
#[clap(version, long_about = None)]
pub struct Args {
    /// Trace file to replay.
    #[clap(long, value_parser)]
    pub open: PathBuf,

    #[clap(long, value_parser, default_value_t = 1)]
    pub num_loops: u32,
    #[clap(long, value_parser, default_value_t = 0)]
    pub loop_start_frame: u64,
    #[clap(long, value_parser)]
    pub loop_end_frame: Option<u64>,

    #[clap(long)]
    pub screenshot: bool,
    #[clap(long, value_enum, default_value = "png")]
    pub screenshot_format: ScreenshotFormat,
    #[clap(long, value_parser, default_value = "screenshot")]
    pub screenshot_prefix: PathBuf,

    #[clap(long)]
    pub compatibility_mode: bool,
    #[clap(long)]
    pub exit_on_any_error: bool,
    #[clap(long, default_value_t = true)]
    pub enable_portability_table_support: bool,

    #[clap(long)]
    pub preload_trace_file: bool,
    #[clap(long, value_parser, default_value_t = 100)]
    pub memory_percentage: u8,
    #[clap(long)]
    pub premapping: bool,

    #[clap(long)]
    pub enable_pipeline_cache: bool,
    #[clap(long, value_parser)]
    pub pipeline_cache_path: Option<PathBuf>,

    #[clap(long)]
    pub force_sync_img_idx: bool,
    #[clap(long)]
    pub headless: bool,
    #[clap(long)]
    pub vsync_off: bool,
}

impl From<ScreenshotFormat> for ReplayScreenshotFormat {
    fn from(format: ScreenshotFormat) -> Self {
        match format {
            ScreenshotFormat::Png => Self::Png,
            ScreenshotFormat::Bmp => Self::Bmp,
            ScreenshotFormat::Ppm => Self::Ppm,
        }
    }
}

impl From<Args> for ReplayOptions {
    fn from(args: Args) -> Self {
        let mut options = Self::new(args.open);
        options.num_loops = args.num_loops;
        options.loop_start_frame = args.loop_start_frame;
        options.loop_end_frame = args.loop_end_frame.unwrap_or(u64::MAX);
        options.screenshot = args.screenshot;
        options.screenshot_format = args.screenshot_format.into();
        options.screenshot_prefix = args.screenshot_prefix;
        options.compatibility_mode = args.compatibility_mode;
        options.exit_on_any_error = args.exit_on_any_error;
        options.enable_portability_table_support = args.enable_portability_table_support;
        options.preload_trace_file = args.preload_trace_file;
        options.memory_percentage = args.memory_percentage;
        options.premapping = args.premapping;
        options.enable_pipeline_cache = args.enable_pipeline_cache;
        options.pipeline_cache_path = args.pipeline_cache_path;
        options.force_sync_img_idx = args.force_sync_img_idx;
        options.headless = args.headless;
        options.vsync_off = args.vsync_off;
        options
    }
}
