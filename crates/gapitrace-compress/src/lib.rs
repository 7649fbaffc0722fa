//! Compressor abstraction over the two codecs the trace format supports, and
//! the capture-side `compress_packet` algorithm that decides, per packet,
//! whether compression is worth paying for.

use gapitrace_format::{CompressionExtHeader, PacketHeader, TraceError, TraceErrorKind, TracerFamily};

mod lz4;
mod snappy;

pub use lz4::Lz4Compressor;
pub use snappy::SnappyCompressor;

/// Packets smaller than this are never compressed: the fixed cost of the
/// compression extension header plus codec framing outweighs any savings.
pub const COMPRESS_THRESHOLD: usize = 1024;

/// A codec capable of compressing packet bodies.
///
/// Deliberately narrow: every method is synchronous, operates on
/// caller-provided buffers, and never allocates on the hot path. This mirrors
/// the two-method abstraction the original tool builds around its `lz4`/
/// `snappy` backends, so swapping codecs only means swapping which variant is
/// selected at pipeline construction.
pub trait Compressor: Send + Sync {
    /// Upper bound on the compressed length of `raw_len` bytes of input.
    fn max_compressed_length(&self, raw_len: usize) -> usize;

    /// Compresses `src` into `dst`. Returns the number of bytes written, or
    /// `None` if the codec failed outright (as opposed to merely failing to
    /// shrink the input, which the caller checks separately).
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Option<usize>;

    /// Stable small integer recorded in the trace-file header's
    /// `compress_type` field so replay can pick the matching decoder.
    fn wire_type(&self) -> u16;

    fn name(&self) -> &'static str;
}

/// Selects a [`Compressor`] by the wire type recorded in a trace-file header.
#[must_use]
pub fn compressor_for_wire_type(wire_type: u16) -> Option<Box<dyn Compressor>> {
    match wire_type {
        Lz4Compressor::WIRE_TYPE => Some(Box::new(Lz4Compressor)),
        SnappyCompressor::WIRE_TYPE => Some(Box::new(SnappyCompressor)),
        _ => None,
    }
}

/// A packet ready to be written: its header and its fully materialized body
/// bytes (everything after the fixed header part, including any inline
/// auxiliary buffer).
pub struct RawPacket {
    pub header: PacketHeader,
    pub body: Vec<u8>,
}

/// Attempts to compress `packet` in place.
///
/// Mirrors the original `compress_packet`: packets already carrying the
/// compressed tracer-family sentinel are left untouched (pass-through, not an
/// error — the tracer may see already-compressed packets replayed through
/// it); packets below [`COMPRESS_THRESHOLD`] are never attempted; a
/// compressed result that isn't strictly smaller than the input is discarded
/// and the original packet is kept.
///
/// Returns `true` if `packet` was replaced by its compressed form.
pub fn compress_packet(compressor: &dyn Compressor, packet: &mut RawPacket) -> Result<bool, TraceError> {
    if packet.header.tracer_family == TracerFamily::COMPRESSED {
        tracing::warn!(
            index = packet.header.global_packet_index,
            "packet is already compressed, skipping"
        );
        return Ok(false);
    }

    let orig_len = packet.body.len();
    if orig_len <= COMPRESS_THRESHOLD {
        return Ok(false);
    }

    let max_len = compressor.max_compressed_length(orig_len);
    let mut buf = vec![0u8; max_len];
    let Some(compressed_len) = compressor.compress(&packet.body, &mut buf) else {
        return Err(TraceError::new(
            "gapitrace_compress::compress_packet",
            TraceErrorKind::CompressionFailed {
                codec: compressor.name(),
            },
        ));
    };

    if compressed_len >= orig_len {
        tracing::warn!(
            index = packet.header.global_packet_index,
            orig_len,
            compressed_len,
            "compression did not shrink packet, keeping uncompressed form"
        );
        return Ok(false);
    }

    let ext = CompressionExtHeader {
        decompressed_size: u32::try_from(orig_len).unwrap_or(u32::MAX),
        inline_body_offset: CompressionExtHeader::SIZE as u32,
    };

    let mut new_body = Vec::with_capacity(CompressionExtHeader::SIZE + compressed_len);
    let mut ext_buf = [0u8; CompressionExtHeader::SIZE];
    gapitrace_core::encode(&ext, &mut ext_buf).map_err(TraceError::from)?;
    new_body.extend_from_slice(&ext_buf);
    new_body.extend_from_slice(&buf[..compressed_len]);

    packet.header.tracer_family = TracerFamily::COMPRESSED;
    packet.header.size = u32::try_from(PacketHeader::FIXED_PART_SIZE + new_body.len()).unwrap_or(u32::MAX);
    packet.body = new_body;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with_body(len: usize) -> RawPacket {
        RawPacket {
            header: PacketHeader {
                size: (PacketHeader::FIXED_PART_SIZE + len) as u32,
                global_packet_index: 1,
                thread_id: 0,
                tracer_family: TracerFamily::GAPI,
                packet_kind: 0,
                tracer_enter_ns: 0,
                entrypoint_enter_ns: 0,
                entrypoint_exit_ns: 0,
                tracer_exit_ns: 0,
                aux_buffer_offset: 0,
            },
            body: vec![0u8; len],
        }
    }

    #[test]
    fn skips_small_packets() {
        let mut packet = packet_with_body(16);
        let changed = compress_packet(&Lz4Compressor, &mut packet).unwrap();
        assert!(!changed);
        assert_eq!(packet.header.tracer_family, TracerFamily::GAPI);
    }

    #[test]
    fn skips_packet_at_exact_threshold() {
        let mut packet = packet_with_body(COMPRESS_THRESHOLD);
        let changed = compress_packet(&Lz4Compressor, &mut packet).unwrap();
        assert!(!changed);
        assert_eq!(packet.header.tracer_family, TracerFamily::GAPI);
    }

    #[test]
    fn compresses_large_compressible_packets() {
        let mut packet = packet_with_body(4096);
        let changed = compress_packet(&Lz4Compressor, &mut packet).unwrap();
        assert!(changed);
        assert_eq!(packet.header.tracer_family, TracerFamily::COMPRESSED);
        assert!(packet.body.len() < 4096);
    }

    #[test]
    fn skips_already_compressed_packets() {
        let mut packet = packet_with_body(4096);
        packet.header.tracer_family = TracerFamily::COMPRESSED;
        let changed = compress_packet(&Lz4Compressor, &mut packet).unwrap();
        assert!(!changed);
    }
}
