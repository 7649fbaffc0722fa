use gapitrace_format::ChangedDataPackage;

/// One active `map`/`unmap` span over a device allocation, as tracked by the
/// remapper's memory-kind auxiliary record (spec §4.5). The application may
/// map the same allocation multiple times across its lifetime; each mapping
/// gets its own record, pushed onto a stack so a nested unmap always closes
/// the most recent map.
#[derive(Debug, Clone, Copy)]
pub struct MemoryMapRecord {
    pub offset: u64,
    pub size: u64,
    /// Set while the replay-side allocation backing this map is still
    /// pending (e.g. waiting on a deferred `vkAllocateMemory` replay).
    pub pending_alloc: bool,
    /// Address of the replay-side shadow buffer, once known. `None` while
    /// `pending_alloc` is set.
    pub shadow_ptr: Option<usize>,
}

/// Per-allocation stack of active map ranges.
#[derive(Debug, Default)]
pub struct MemoryMapStack {
    records: Vec<MemoryMapRecord>,
}

impl MemoryMapStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: MemoryMapRecord) {
        self.records.push(record);
    }

    /// Pops the innermost map, mirroring the most-recent `map` being the one
    /// a bare `unmap` call closes.
    pub fn pop(&mut self) -> Option<MemoryMapRecord> {
        self.records.pop()
    }

    #[must_use]
    pub fn current(&self) -> Option<&MemoryMapRecord> {
        self.records.last()
    }

    #[must_use]
    pub fn current_mut(&mut self) -> Option<&mut MemoryMapRecord> {
        self.records.last_mut()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.records.len()
    }
}

/// Reapplies a changed-data package into `dest`, the replay-side shadow
/// buffer for the currently active mapping, using the page-shadow format
/// decoder's block layout directly. Each block is applied at its recorded
/// offset relative to the start of the mapping.
pub fn apply_changed_data_package(dest: &mut [u8], package: &ChangedDataPackage) {
    let mut cursor = 0usize;
    for block in &package.blocks {
        let start = usize::try_from(block.offset).unwrap_or(usize::MAX);
        let len = usize::try_from(block.length).unwrap_or(0);
        let Some(slice) = dest.get_mut(start..start + len) else {
            tracing::warn!(start, len, "changed-data block falls outside destination mapping, skipping");
            cursor += len;
            continue;
        };
        slice.copy_from_slice(&package.data[cursor..cursor + len]);
        cursor += len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gapitrace_format::ChangedBlockInfo;

    #[test]
    fn stack_push_pop_is_lifo() {
        let mut stack = MemoryMapStack::new();
        stack.push(MemoryMapRecord {
            offset: 0,
            size: 64,
            pending_alloc: false,
            shadow_ptr: Some(0x1000),
        });
        stack.push(MemoryMapRecord {
            offset: 64,
            size: 64,
            pending_alloc: true,
            shadow_ptr: None,
        });

        assert_eq!(stack.depth(), 2);
        let top = stack.pop().unwrap();
        assert_eq!(top.offset, 64);
        assert_eq!(stack.current().unwrap().offset, 0);
    }

    #[test]
    fn apply_changed_data_package_writes_each_block_at_its_offset() {
        let mut dest = vec![0u8; 16];
        let package = ChangedDataPackage {
            blocks: vec![
                ChangedBlockInfo { offset: 0, length: 4 },
                ChangedBlockInfo { offset: 8, length: 2 },
            ],
            data: vec![1, 2, 3, 4, 9, 9],
        };

        apply_changed_data_package(&mut dest, &package);
        assert_eq!(&dest[0..4], &[1, 2, 3, 4]);
        assert_eq!(&dest[8..10], &[9, 9]);
        assert_eq!(&dest[4..8], &[0, 0, 0, 0]);
    }
}
