use gapitrace_core::{ensure_size, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor};

/// One descriptor inside a [`ChangedDataPackage`].
///
/// The original tool reuses a single descriptor struct both as a regular
/// entry (`offset`/`length` of one dirty byte range) and, as the package's
/// first entry, as a header carrying the block count in `offset` and the
/// total byte count in `length`. This type only models the regular entry;
/// `ChangedDataPackage` owns the header-vs-entries distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedBlockInfo {
    pub offset: u64,
    pub length: u64,
}

impl ChangedBlockInfo {
    pub const SIZE: usize = 8 + 8;
}

impl Encode for ChangedBlockInfo {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());
        dst.write_u64(self.offset);
        dst.write_u64(self.length);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ChangedBlockInfo"
    }

    fn size(&self) -> usize {
        Self::SIZE
    }
}

impl<'de> Decode<'de> for ChangedBlockInfo {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: Self::SIZE);
        Ok(Self {
            offset: src.read_u64(),
            length: src.read_u64(),
        })
    }
}

/// The flush output of a shadowed mapping: a descriptor header followed by
/// one descriptor and one byte range per dirty block, in ascending offset
/// order.
///
/// Invariant (see `gapitrace-shadow`): applying each block's bytes at its
/// offset to a copy of the pre-write snapshot reproduces the post-write
/// mapping exactly; two flushes with no intervening writes between them
/// produce an empty package.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangedDataPackage {
    pub blocks: Vec<ChangedBlockInfo>,
    pub data: Vec<u8>,
}

impl ChangedDataPackage {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn total_length(&self) -> u64 {
        self.blocks.iter().map(|b| b.length).sum()
    }
}

impl Encode for ChangedDataPackage {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let header = ChangedBlockInfo {
            offset: self.blocks.len() as u64,
            length: self.total_length(),
        };
        header.encode(dst)?;
        for block in &self.blocks {
            block.encode(dst)?;
        }
        dst.write_slice(&self.data);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ChangedDataPackage"
    }

    fn size(&self) -> usize {
        ChangedBlockInfo::SIZE * (1 + self.blocks.len()) + self.data.len()
    }
}

impl<'de> Decode<'de> for ChangedDataPackage {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let header = ChangedBlockInfo::decode(src)?;
        let block_count = header.offset as usize;

        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            blocks.push(ChangedBlockInfo::decode(src)?);
        }

        let total = header.length as usize;
        ensure_size!(in: src, size: total);
        let data = src.read_slice(total).to_vec();

        Ok(Self { blocks, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapitrace_core::{decode, encode_vec};

    #[test]
    fn empty_package_round_trips() {
        let package = ChangedDataPackage::default();
        assert!(package.is_empty());
        let encoded = encode_vec(&package).unwrap();
        let decoded: ChangedDataPackage = decode(&encoded).unwrap();
        assert_eq!(package, decoded);
    }

    #[test]
    fn package_with_blocks_round_trips_in_order() {
        let package = ChangedDataPackage {
            blocks: vec![
                ChangedBlockInfo { offset: 0, length: 4 },
                ChangedBlockInfo { offset: 4096, length: 2 },
            ],
            data: vec![1, 2, 3, 4, 9, 9],
        };

        let encoded = encode_vec(&package).unwrap();
        let decoded: ChangedDataPackage = decode(&encoded).unwrap();
        assert_eq!(package, decoded);
        assert_eq!(decoded.total_length(), 6);
    }
}
