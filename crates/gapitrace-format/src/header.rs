use bitflags::bitflags;
use gapitrace_core::{
    ensure_size, invalid_field_err, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};

/// Tracer-family id stored in every packet header.
///
/// `Compressed` is a sentinel: when a packet's body was shrunk by
/// `gapitrace-compress`, its header's family is rewritten to this value so
/// the reader knows a [`CompressionExtHeader`] immediately follows the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct TracerFamily(pub u16);

impl TracerFamily {
    pub const GAPI: Self = Self(0x0001);
    pub const COMPRESSED: Self = Self(0xFFFE);
    pub const MARKER: Self = Self(0xFFFF);
}

/// Fixed-layout header that precedes every packet body.
///
/// Mirrors the original tool's per-packet header: total on-disk size, a
/// monotonic global index, the producing thread id, the tracer family, the
/// packet-kind id, four wall-clock timestamps, and the byte offset (from the
/// header base) of any inline auxiliary buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub size: u32,
    pub global_packet_index: u64,
    pub thread_id: u32,
    pub tracer_family: TracerFamily,
    pub packet_kind: u16,
    pub tracer_enter_ns: u64,
    pub entrypoint_enter_ns: u64,
    pub entrypoint_exit_ns: u64,
    pub tracer_exit_ns: u64,
    pub aux_buffer_offset: u32,
}

impl PacketHeader {
    pub const FIXED_PART_SIZE: usize = 4 + 8 + 4 + 2 + 2 + 8 * 4 + 4;
}

impl Encode for PacketHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());
        dst.write_u32(self.size);
        dst.write_u64(self.global_packet_index);
        dst.write_u32(self.thread_id);
        dst.write_u16(self.tracer_family.0);
        dst.write_u16(self.packet_kind);
        dst.write_u64(self.tracer_enter_ns);
        dst.write_u64(self.entrypoint_enter_ns);
        dst.write_u64(self.entrypoint_exit_ns);
        dst.write_u64(self.tracer_exit_ns);
        dst.write_u32(self.aux_buffer_offset);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "PacketHeader"
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for PacketHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: Self::FIXED_PART_SIZE);

        let size = src.read_u32();
        let global_packet_index = src.read_u64();
        let thread_id = src.read_u32();
        let tracer_family = TracerFamily(src.read_u16());
        let packet_kind = src.read_u16();
        let tracer_enter_ns = src.read_u64();
        let entrypoint_enter_ns = src.read_u64();
        let entrypoint_exit_ns = src.read_u64();
        let tracer_exit_ns = src.read_u64();
        let aux_buffer_offset = src.read_u32();

        if (size as usize) < Self::FIXED_PART_SIZE {
            return Err(invalid_field_err(
                "gapitrace_format::header::PacketHeader",
                "size",
                "smaller than the fixed header part",
            ));
        }

        Ok(Self {
            size,
            global_packet_index,
            thread_id,
            tracer_family,
            packet_kind,
            tracer_enter_ns,
            entrypoint_enter_ns,
            entrypoint_exit_ns,
            tracer_exit_ns,
            aux_buffer_offset,
        })
    }
}

bitflags! {
    /// Bit flags carried in the file-scope header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TraceHeaderFlags: u32 {
        /// At least one acceleration-structure build/size/create call was recorded.
        const USES_ACCELERATION_STRUCTURE_API = 1 << 0;
        /// The portability table at the end of the file was written successfully.
        const PORTABILITY_TABLE_VALID = 1 << 1;
    }
}

/// File-scope header that precedes the packet stream.
///
/// Several fields are written once at creation (`format_version`,
/// `tracer_family_mask`, `arch`, `os`, `little_endian`, `ptr_size`) and several
/// are back-patched during finalization (`flags`, `compress_type`,
/// `decompress_file_size`, `metadata_offset`): see `gapitrace-capture`'s
/// finalization sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceFileHeader {
    pub format_version: u32,
    pub tracer_family_mask: u32,
    pub arch: u64,
    pub os: u64,
    pub little_endian: bool,
    /// Size in bytes of a captured pointer: 4 or 8. Only the create-device
    /// packet honors a mismatch against the replay host's own pointer size;
    /// every other packet kind treats a mismatch as `UnsupportedVersion`.
    pub ptr_size: u8,
    pub flags: TraceHeaderFlags,
    /// 0 means "no compression was used anywhere in this file".
    pub compress_type: u16,
    pub decompress_file_size: u64,
    /// 0 means "no metadata packet was written" (pre-v10 files).
    pub metadata_offset: u64,
}

impl TraceFileHeader {
    pub const FIXED_PART_SIZE: usize = 4 + 4 + 8 + 8 + 1 + 1 + 4 + 2 + 8 + 8;

    pub const MIN_SUPPORTED_VERSION: u32 = 1;
    pub const CURRENT_VERSION: u32 = 11;

    /// Pointer width of the host this binary is running on, in bytes.
    pub const NATIVE_PTR_SIZE: u8 = std::mem::size_of::<usize>() as u8;

    /// Whether `ptr_size` matches the replay host's own pointer width.
    /// A mismatch is only safe to read through for the one packet kind
    /// (create-device) that re-extracts its handle at the trace's own
    /// recorded width; every other packet kind must treat a mismatch as
    /// fatal rather than guess at a reinterpretation.
    #[must_use]
    pub fn ptr_size_matches_host(&self) -> bool {
        self.ptr_size == Self::NATIVE_PTR_SIZE
    }
}

impl Encode for TraceFileHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());
        dst.write_u32(self.format_version);
        dst.write_u32(self.tracer_family_mask);
        dst.write_u64(self.arch);
        dst.write_u64(self.os);
        dst.write_u8(u8::from(self.little_endian));
        dst.write_u8(self.ptr_size);
        dst.write_u32(self.flags.bits());
        dst.write_u16(self.compress_type);
        dst.write_u64(self.decompress_file_size);
        dst.write_u64(self.metadata_offset);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TraceFileHeader"
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for TraceFileHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: Self::FIXED_PART_SIZE);

        let format_version = src.read_u32();
        let tracer_family_mask = src.read_u32();
        let arch = src.read_u64();
        let os = src.read_u64();
        let little_endian = src.read_u8() != 0;
        let ptr_size = src.read_u8();
        let flags = TraceHeaderFlags::from_bits_truncate(src.read_u32());
        let compress_type = src.read_u16();
        let decompress_file_size = src.read_u64();
        let metadata_offset = src.read_u64();

        if ptr_size != 4 && ptr_size != 8 {
            return Err(invalid_field_err(
                "gapitrace_format::header::TraceFileHeader",
                "ptr_size",
                "must be 4 or 8",
            ));
        }

        Ok(Self {
            format_version,
            tracer_family_mask,
            arch,
            os,
            little_endian,
            ptr_size,
            flags,
            compress_type,
            decompress_file_size,
            metadata_offset,
        })
    }
}

/// Prefix inserted immediately after a [`PacketHeader`] whose `tracer_family`
/// is [`TracerFamily::COMPRESSED`]. The compressed bytes follow this prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionExtHeader {
    pub decompressed_size: u32,
    pub inline_body_offset: u32,
}

impl CompressionExtHeader {
    pub const SIZE: usize = 4 + 4;
}

impl Encode for CompressionExtHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());
        dst.write_u32(self.decompressed_size);
        dst.write_u32(self.inline_body_offset);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CompressionExtHeader"
    }

    fn size(&self) -> usize {
        Self::SIZE
    }
}

impl<'de> Decode<'de> for CompressionExtHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: Self::SIZE);
        Ok(Self {
            decompressed_size: src.read_u32(),
            inline_body_offset: src.read_u32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapitrace_core::{decode, encode_vec};

    #[test]
    fn packet_header_round_trip() {
        let header = PacketHeader {
            size: 128,
            global_packet_index: 42,
            thread_id: 7,
            tracer_family: TracerFamily::GAPI,
            packet_kind: 9001,
            tracer_enter_ns: 1,
            entrypoint_enter_ns: 2,
            entrypoint_exit_ns: 3,
            tracer_exit_ns: 4,
            aux_buffer_offset: 64,
        };

        let encoded = encode_vec(&header).unwrap();
        let decoded: PacketHeader = decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn packet_header_rejects_size_smaller_than_fixed_part() {
        let bytes = encode_vec(&PacketHeader {
            size: 4,
            global_packet_index: 0,
            thread_id: 0,
            tracer_family: TracerFamily::GAPI,
            packet_kind: 0,
            tracer_enter_ns: 0,
            entrypoint_enter_ns: 0,
            entrypoint_exit_ns: 0,
            tracer_exit_ns: 0,
            aux_buffer_offset: 0,
        })
        .unwrap();

        let result: DecodeResult<PacketHeader> = decode(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn trace_file_header_round_trip() {
        let header = TraceFileHeader {
            format_version: TraceFileHeader::CURRENT_VERSION,
            tracer_family_mask: 0x1,
            arch: 0x0,
            os: 0x0,
            little_endian: true,
            ptr_size: 8,
            flags: TraceHeaderFlags::PORTABILITY_TABLE_VALID,
            compress_type: 1,
            decompress_file_size: 4096,
            metadata_offset: 2048,
        };

        let encoded = encode_vec(&header).unwrap();
        let decoded: TraceFileHeader = decode(&encoded).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn trace_file_header_rejects_bad_ptr_size() {
        let mut header = TraceFileHeader {
            format_version: 1,
            tracer_family_mask: 0,
            arch: 0,
            os: 0,
            little_endian: true,
            ptr_size: 8,
            flags: TraceHeaderFlags::empty(),
            compress_type: 0,
            decompress_file_size: 0,
            metadata_offset: 0,
        };
        header.ptr_size = 6;
        let encoded = encode_vec(&header).unwrap();
        let decoded: DecodeResult<TraceFileHeader> = decode(&encoded);
        assert!(decoded.is_err());
    }
}
