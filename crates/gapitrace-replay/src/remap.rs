use std::collections::BTreeMap;

use gapitrace_format::{TraceError, TraceErrorKind};

/// An opaque GAPI handle, capture-time or replay-time, as stored on the
/// wire: always 8 bytes, little-endian, zero meaning null.
pub type Handle = u64;

/// One pointer- or handle-valued field's location inside a packet body, used
/// by [`ObjectRemapper`] to rewrite premapped packets in place.
#[derive(Debug, Clone, Copy)]
pub struct HandleFieldLocation {
    pub offset: usize,
    pub kind: &'static str,
}

/// The two behaviorally equivalent remap strategies from the replay object
/// remapper (spec §4.5). Both share the same external contract: ask for a
/// capture-time handle's replay-time counterpart, get back a [`Handle`] or
/// `UnknownHandle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapMode {
    /// Each replay call looks up its handle arguments individually.
    OnDemand,
    /// Packet buffers are rewritten once, during preload, and replay then
    /// issues calls with zero lookup overhead.
    Premapped,
}

/// Capture-time → replay-time handle table for a single GAPI object kind
/// (e.g. one table for devices, one for buffers, one for images, ...).
#[derive(Debug, Default)]
pub struct RemapTable {
    entries: BTreeMap<Handle, Handle>,
}

impl RemapTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `capture_handle` now maps to `replay_handle`. Called
    /// when a create-style packet's replay call returns its live handle.
    pub fn insert(&mut self, capture_handle: Handle, replay_handle: Handle) {
        self.entries.insert(capture_handle, replay_handle);
    }

    /// Resolves a capture-time handle. The null handle always maps to
    /// itself without a table lookup, matching `VK_NULL_HANDLE`-style
    /// optional-argument conventions.
    pub fn get(&self, kind: &'static str, capture_handle: Handle) -> Result<Handle, TraceError> {
        if capture_handle == 0 {
            return Ok(0);
        }
        self.entries
            .get(&capture_handle)
            .copied()
            .ok_or_else(|| TraceError::new("gapitrace_replay::remap::RemapTable::get", TraceErrorKind::UnknownHandle { kind }))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-kind handle tables plus the chosen remap strategy. One instance is
/// shared across the whole replay run.
pub struct ObjectRemapper {
    mode: RemapMode,
    tables: BTreeMap<&'static str, RemapTable>,
}

impl ObjectRemapper {
    #[must_use]
    pub fn new(mode: RemapMode) -> Self {
        Self {
            mode,
            tables: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> RemapMode {
        self.mode
    }

    /// Records a new capture→replay handle association for `kind`,
    /// allocating that kind's table on first use.
    pub fn register(&mut self, kind: &'static str, capture_handle: Handle, replay_handle: Handle) {
        self.tables.entry(kind).or_default().insert(capture_handle, replay_handle);
    }

    /// Resolves one capture-time handle of the given kind. Used directly in
    /// on-demand mode, and internally by [`Self::premap_packet`] in
    /// premapped mode — the lookup itself is identical in both modes; only
    /// when it runs differs.
    pub fn resolve(&self, kind: &'static str, capture_handle: Handle) -> Result<Handle, TraceError> {
        match self.tables.get(kind) {
            Some(table) => table.get(kind, capture_handle),
            None if capture_handle == 0 => Ok(0),
            None => Err(TraceError::new(
                "gapitrace_replay::remap::ObjectRemapper::resolve",
                TraceErrorKind::UnknownHandle { kind },
            )),
        }
    }

    /// Rewrites every handle-valued field named in `locations` in place,
    /// resolving each through its table. Used once per packet during
    /// premapped-mode preload; not used at all in on-demand mode.
    pub fn premap_packet(&self, locations: &[HandleFieldLocation], body: &mut [u8]) -> Result<(), TraceError> {
        for location in locations {
            let end = location.offset + 8;
            let field = body.get(location.offset..end).ok_or_else(|| {
                TraceError::new(
                    "gapitrace_replay::remap::ObjectRemapper::premap_packet",
                    TraceErrorKind::Corrupt {
                        reason: "handle field location out of bounds",
                    },
                )
            })?;
            let capture_handle = Handle::from_le_bytes(field.try_into().expect("slice is exactly 8 bytes"));
            let replay_handle = self.resolve(location.kind, capture_handle)?;
            body[location.offset..end].copy_from_slice(&replay_handle.to_le_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_always_resolves_to_null() {
        let remapper = ObjectRemapper::new(RemapMode::OnDemand);
        assert_eq!(remapper.resolve("device", 0).unwrap(), 0);
    }

    #[test]
    fn unregistered_handle_is_unknown() {
        let remapper = ObjectRemapper::new(RemapMode::OnDemand);
        let err = remapper.resolve("buffer", 0x1234).unwrap_err();
        assert!(matches!(err.kind(), TraceErrorKind::UnknownHandle { kind: "buffer" }));
    }

    #[test]
    fn registered_handle_resolves() {
        let mut remapper = ObjectRemapper::new(RemapMode::OnDemand);
        remapper.register("buffer", 0x1234, 0x9999);
        assert_eq!(remapper.resolve("buffer", 0x1234).unwrap(), 0x9999);
    }

    #[test]
    fn premap_packet_rewrites_in_place() {
        let mut remapper = ObjectRemapper::new(RemapMode::Premapped);
        remapper.register("image", 0x1, 0x42);

        let mut body = vec![0u8; 16];
        body[4..12].copy_from_slice(&1u64.to_le_bytes());

        remapper
            .premap_packet(&[HandleFieldLocation { offset: 4, kind: "image" }], &mut body)
            .unwrap();

        let rewritten = u64::from_le_bytes(body[4..12].try_into().unwrap());
        assert_eq!(rewritten, 0x42);
    }

    #[test]
    fn premap_packet_rejects_out_of_bounds_location() {
        let remapper = ObjectRemapper::new(RemapMode::Premapped);
        let mut body = vec![0u8; 4];
        let err = remapper
            .premap_packet(&[HandleFieldLocation { offset: 4, kind: "image" }], &mut body)
            .unwrap_err();
        assert!(matches!(err.kind(), TraceErrorKind::Corrupt { .. }));
    }
}
