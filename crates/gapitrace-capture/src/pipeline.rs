use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use gapitrace_compress::{compress_packet, Compressor, RawPacket};
use gapitrace_format::{
    DeviceFeatureSupport, MetadataDocument, PortabilityTable, TraceError, TraceErrorKind, TraceFileHeader,
    TraceHeaderFlags,
};
use gapitrace_stream::FileLikeStream;

/// Global, process-wide monotonic packet index. Kept as a free-standing
/// atomic, mirroring the original's `vktrace_get_unique_packet_index`: the
/// index must always come from this one counter so packet order reflects
/// true write order across threads.
static NEXT_PACKET_INDEX: AtomicU64 = AtomicU64::new(0);

/// Allocates and returns the next global packet index.
pub fn next_packet_index() -> u64 {
    NEXT_PACKET_INDEX.fetch_add(1, Ordering::SeqCst)
}

/// What the pipeline decided to do with one packet, reported back to the
/// caller (the interception layer) so it can, e.g., stop feeding packets
/// after `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDisposition {
    /// The packet was written to the stream.
    Written,
    /// The packet was a stream marker below the checkpoint sentinel and was
    /// dropped without being written.
    Dropped,
    /// The packet triggered finalization; the trace file is now closed.
    Terminated,
}

/// Per-packet metadata the interception layer supplies alongside the packet
/// bytes. The pipeline itself never interprets GAPI call semantics; it only
/// reacts to these flags, which the (out-of-scope) interception layer is
/// responsible for setting correctly.
#[derive(Debug, Clone, Default)]
pub struct PacketMeta {
    pub is_checkpoint_marker: bool,
    pub is_terminate_marker: bool,
    pub is_injected: bool,
    pub created_device_handle: Option<u64>,
    pub is_portability_relevant: bool,
    pub is_acceleration_structure_api: bool,
}

/// Decides whether a packet kind belongs in the portability table. Supplied
/// by the caller rather than hardcoded here, since the concrete set of
/// portability-relevant GAPI calls is outside this crate's scope; in
/// practice a caller's classifier is a static lookup table keyed by packet
/// kind id.
pub trait PortabilityClassifier: Send + Sync {
    fn is_portability_relevant(&self, packet_kind: u16) -> bool;
}

impl<F> PortabilityClassifier for F
where
    F: Fn(u16) -> bool + Send + Sync,
{
    fn is_portability_relevant(&self, packet_kind: u16) -> bool {
        self(packet_kind)
    }
}

pub struct TracePipelineConfig {
    pub output_path: PathBuf,
    pub compressor: Box<dyn Compressor>,
    pub format_version: u32,
    pub ptr_size: u8,
    pub arch: u64,
    pub os: u64,
}

struct SharedState {
    stream: FileLikeStream,
    running_offset: u64,
    decompress_total_size: u64,
    portability_table: PortabilityTable,
    metadata: MetadataDocument,
    saw_acceleration_structure_api: bool,
    saw_compressed_packet: bool,
    last_packet_index: u64,
    last_packet_thread: u32,
    last_packet_end_time_ns: u64,
    finalized: bool,
}

/// Capture-side trace-packet pipeline: assembles, optionally compresses,
/// indexes, and writes packets, then produces the trailer on termination.
///
/// Per-thread preparation (compression, classification) happens without
/// holding any lock; only the final append to the stream and the shared
/// bookkeeping it updates take the pipeline's lock, keeping the hot path
/// contention-free except when two threads finish large packets at the same
/// instant.
pub struct TracePipeline {
    compressor: Box<dyn Compressor>,
    header_fixed: TraceFileHeader,
    shared: Mutex<SharedState>,
}

impl TracePipeline {
    pub fn create(config: TracePipelineConfig) -> Result<Self, TraceError> {
        let file = std::fs::File::create(&config.output_path)
            .map_err(|source| TraceError::new("gapitrace_capture::pipeline::create", TraceErrorKind::StreamIO).with_source(source))?;
        let mut stream = FileLikeStream::from_file(file);

        let header = TraceFileHeader {
            format_version: config.format_version,
            tracer_family_mask: 0x1,
            arch: config.arch,
            os: config.os,
            little_endian: cfg!(target_endian = "little"),
            ptr_size: config.ptr_size,
            flags: TraceHeaderFlags::empty(),
            compress_type: 0,
            decompress_file_size: 0,
            metadata_offset: 0,
        };

        let header_bytes = gapitrace_core::encode_vec(&header).map_err(TraceError::from)?;
        stream.write_raw(&header_bytes)?;

        Ok(Self {
            compressor: config.compressor,
            header_fixed: header,
            shared: Mutex::new(SharedState {
                stream,
                running_offset: header_bytes.len() as u64,
                decompress_total_size: 0,
                portability_table: PortabilityTable::new(),
                metadata: MetadataDocument::default(),
                saw_acceleration_structure_api: false,
                saw_compressed_packet: false,
                last_packet_index: 0,
                last_packet_thread: 0,
                last_packet_end_time_ns: 0,
                finalized: false,
            }),
        })
    }

    /// Runs one packet through the processing order from capture design
    /// step 1 to step 8.
    pub fn process_packet(
        &self,
        meta: &PacketMeta,
        mut packet: RawPacket,
        thread_id: u32,
    ) -> Result<PacketDisposition, TraceError> {
        // Step 1: drop checkpoint-sentinel markers.
        if meta.is_checkpoint_marker {
            return Ok(PacketDisposition::Dropped);
        }

        // Step 2: terminate marker triggers finalization.
        if meta.is_terminate_marker {
            self.finalize()?;
            return Ok(PacketDisposition::Terminated);
        }

        let mut shared = self.shared.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if shared.finalized {
            return Ok(PacketDisposition::Terminated);
        }

        // Step 3: injected-call tracking (format version gate matches the
        // original's metadata-version check).
        if meta.is_injected && self.header_fixed.format_version >= 10 {
            shared.metadata.injected_calls.push(packet.header.global_packet_index);
        }

        // Step 4: create-device device-feature association.
        if let Some(device_handle) = meta.created_device_handle {
            shared
                .metadata
                .device_features
                .entry(format!("{device_handle:#x}"))
                .or_insert_with(DeviceFeatureSupport::default);
        }

        if meta.is_acceleration_structure_api {
            shared.saw_acceleration_structure_api = true;
        }

        // Step 5: compress if large enough and worth it. The uncompressed
        // length is captured first since `compress_packet` may replace
        // `packet.body` with its compressed form.
        let uncompressed_len = (gapitrace_format::PacketHeader::FIXED_PART_SIZE + packet.body.len()) as u64;
        if compress_packet(self.compressor.as_ref(), &mut packet)? {
            shared.saw_compressed_packet = true;
        }

        // Step 6: portability table.
        if meta.is_portability_relevant {
            let offset = shared.running_offset;
            shared.portability_table.push(offset);
        }

        // Step 7: bookkeeping. The running file offset follows the actual
        // on-disk (possibly compressed) size; the decompress-total tracks
        // what replay will need to allocate once every packet is expanded.
        shared.last_packet_index = packet.header.global_packet_index;
        shared.last_packet_thread = thread_id;
        shared.last_packet_end_time_ns = packet.header.tracer_exit_ns;
        shared.decompress_total_size += uncompressed_len;
        shared.running_offset += u64::from(packet.header.size);

        // Step 8: write.
        let header_bytes = gapitrace_core::encode_vec(&packet.header).map_err(TraceError::from)?;
        shared.stream.write_raw(&header_bytes)?;
        shared.stream.write_raw(&packet.body)?;

        Ok(PacketDisposition::Written)
    }

    /// Finalization sequence (capture design, finalization steps 1-5). A
    /// second call is a no-op, matching the original's idempotent teardown.
    pub fn finalize(&self) -> Result<(), TraceError> {
        let mut shared = self.shared.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if shared.finalized {
            return Ok(());
        }

        // Step 1: portability table, as one synthetic packet.
        let table_bytes = gapitrace_core::encode_vec(&shared.portability_table).map_err(TraceError::from)?;
        let metadata_offset = if self.header_fixed.format_version >= 10 {
            let offset = shared.running_offset;
            let doc_bytes = shared
                .metadata
                .to_padded_bytes(0)
                .map_err(|source| TraceError::new("gapitrace_capture::pipeline::finalize", TraceErrorKind::Corrupt { reason: "metadata document serialization failed" }).with_source(source))?;
            shared.stream.write_raw(&doc_bytes)?;
            shared.running_offset += doc_bytes.len() as u64;
            offset
        } else {
            0
        };

        shared.stream.write_raw(&table_bytes)?;
        shared.running_offset += table_bytes.len() as u64;

        // Step 4: back-patch header fields.
        let mut header = self.header_fixed;
        header.decompress_file_size = shared.decompress_total_size;
        header.metadata_offset = metadata_offset;
        header.flags.set(TraceHeaderFlags::PORTABILITY_TABLE_VALID, true);
        header
            .flags
            .set(TraceHeaderFlags::USES_ACCELERATION_STRUCTURE_API, shared.saw_acceleration_structure_api);
        if shared.saw_compressed_packet {
            header.compress_type = self.compressor.wire_type();
        }

        let header_bytes = gapitrace_core::encode_vec(&header).map_err(TraceError::from)?;
        shared.stream.set_position(0)?;
        shared.stream.write_raw(&header_bytes)?;
        shared.stream.flush()?;

        shared.finalized = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapitrace_compress::Lz4Compressor;
    use gapitrace_format::{PacketHeader, TracerFamily};

    fn make_packet(index: u64, body_len: usize) -> RawPacket {
        RawPacket {
            header: PacketHeader {
                size: (PacketHeader::FIXED_PART_SIZE + body_len) as u32,
                global_packet_index: index,
                thread_id: 0,
                tracer_family: TracerFamily::GAPI,
                packet_kind: 42,
                tracer_enter_ns: 0,
                entrypoint_enter_ns: 0,
                entrypoint_exit_ns: 0,
                tracer_exit_ns: index,
                aux_buffer_offset: 0,
            },
            body: vec![0u8; body_len],
        }
    }

    fn pipeline_for_test() -> (TracePipeline, PathBuf) {
        let path = std::env::temp_dir().join(format!("gapitrace-capture-test-{}.gfxtrace", std::process::id()));
        let pipeline = TracePipeline::create(TracePipelineConfig {
            output_path: path.clone(),
            compressor: Box::new(Lz4Compressor),
            format_version: TraceFileHeader::CURRENT_VERSION,
            ptr_size: 8,
            arch: 0,
            os: 0,
        })
        .unwrap();
        (pipeline, path)
    }

    #[test]
    fn dropped_marker_is_not_written() {
        let (pipeline, _path) = pipeline_for_test();
        let disposition = pipeline
            .process_packet(
                &PacketMeta {
                    is_checkpoint_marker: true,
                    ..PacketMeta::default()
                },
                make_packet(0, 0),
                0,
            )
            .unwrap();
        assert_eq!(disposition, PacketDisposition::Dropped);
    }

    #[test]
    fn terminate_finalizes_and_further_packets_are_reported_terminated() {
        let (pipeline, _path) = pipeline_for_test();
        pipeline.process_packet(&PacketMeta::default(), make_packet(0, 16), 0).unwrap();

        let disposition = pipeline
            .process_packet(
                &PacketMeta {
                    is_terminate_marker: true,
                    ..PacketMeta::default()
                },
                make_packet(1, 0),
                0,
            )
            .unwrap();
        assert_eq!(disposition, PacketDisposition::Terminated);

        let disposition = pipeline.process_packet(&PacketMeta::default(), make_packet(2, 16), 0).unwrap();
        assert_eq!(disposition, PacketDisposition::Terminated);
    }

    #[test]
    fn finalize_is_idempotent() {
        let (pipeline, _path) = pipeline_for_test();
        pipeline.finalize().unwrap();
        pipeline.finalize().unwrap();
    }
}
