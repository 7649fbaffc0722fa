use gapitrace_core::{ensure_size, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor};

/// Index of file offsets for packets whose replay needs special handling for
/// cross-device portability (acceleration-structure build/size/create calls,
/// and any call whose semantics depend on physical-device topology).
///
/// Written once, as a single synthetic packet, during capture finalization;
/// read once, during replay preload, to decide which packets trigger
/// `gapitrace-replay`'s resource-reconstruction path ahead of time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortabilityTable {
    pub offsets: Vec<u64>,
}

impl PortabilityTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, file_offset: u64) {
        self.offsets.push(file_offset);
    }
}

impl Encode for PortabilityTable {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());
        for offset in &self.offsets {
            dst.write_u64(*offset);
        }
        // Trailing length word, per the original format: the table is found
        // by seeking from end-of-file rather than from a header pointer.
        dst.write_u64(self.offsets.len() as u64);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "PortabilityTable"
    }

    fn size(&self) -> usize {
        (self.offsets.len() + 1) * 8
    }
}

impl<'de> Decode<'de> for PortabilityTable {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        // The trailing length word is only meaningful when read from the end
        // of the file; when decoding a self-contained packet body, all
        // remaining 8-byte words but the last are offsets.
        let total_words = src.len() / 8;
        if total_words == 0 {
            return Ok(Self::default());
        }

        let mut offsets = Vec::with_capacity(total_words - 1);
        for _ in 0..total_words - 1 {
            ensure_size!(in: src, size: 8);
            offsets.push(src.read_u64());
        }
        ensure_size!(in: src, size: 8);
        let declared_len = src.read_u64() as usize;

        if declared_len != offsets.len() {
            return Err(gapitrace_core::invalid_field_err(
                "gapitrace_format::portability::PortabilityTable",
                "declared_len",
                "does not match the number of offsets preceding it",
            ));
        }

        Ok(Self { offsets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapitrace_core::{decode, encode_vec};

    #[test]
    fn empty_table_round_trips() {
        let table = PortabilityTable::new();
        let encoded = encode_vec(&table).unwrap();
        let decoded: PortabilityTable = decode(&encoded).unwrap();
        assert_eq!(table, decoded);
    }

    #[test]
    fn table_with_offsets_round_trips_in_order() {
        let mut table = PortabilityTable::new();
        table.push(128);
        table.push(4096);
        table.push(65536);

        let encoded = encode_vec(&table).unwrap();
        let decoded: PortabilityTable = decode(&encoded).unwrap();
        assert_eq!(table, decoded);
    }

    #[test]
    fn table_rejects_mismatched_trailing_length() {
        let mut table = PortabilityTable::new();
        table.push(1);
        table.push(2);
        let mut encoded = encode_vec(&table).unwrap();
        let last = encoded.len() - 8;
        encoded[last..].copy_from_slice(&99u64.to_le_bytes());

        let decoded: DecodeResult<PortabilityTable> = decode(&encoded);
        assert!(decoded.is_err());
    }
}
