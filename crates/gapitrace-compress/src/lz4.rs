use crate::Compressor;

/// LZ4 block-format codec, the trace format's default compressor.
#[derive(Debug, Clone, Copy)]
pub struct Lz4Compressor;

impl Lz4Compressor {
    pub const WIRE_TYPE: u16 = 1;
}

impl Compressor for Lz4Compressor {
    fn max_compressed_length(&self, raw_len: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(raw_len)
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Option<usize> {
        lz4_flex::block::compress_into(src, dst).ok()
    }

    fn wire_type(&self) -> u16 {
        Self::WIRE_TYPE
    }

    fn name(&self) -> &'static str {
        "lz4"
    }
}

/// Decompresses an LZ4 block whose decompressed size is already known (it is
/// carried in the packet's `CompressionExtHeader`).
pub fn decompress(src: &[u8], decompressed_size: usize) -> Option<Vec<u8>> {
    lz4_flex::block::decompress(src, decompressed_size).ok()
}
