use gapitrace_format::{TraceError, TraceErrorKind, TraceFileHeader};

use crate::remap::Handle;

/// Decides whether a packet kind is a create-device call: the one packet
/// kind allowed to read its device-out handle at the trace's own captured
/// pointer width instead of the replay host's native width. Supplied by the
/// caller, mirroring `gapitrace_capture`'s `PortabilityClassifier` — the
/// concrete packet-kind-to-GAPI-call mapping lives outside this crate.
pub trait CreateDeviceClassifier: Send + Sync {
    fn is_create_device(&self, packet_kind: u16) -> bool;
}

impl<F> CreateDeviceClassifier for F
where
    F: Fn(u16) -> bool + Send + Sync,
{
    fn is_create_device(&self, packet_kind: u16) -> bool {
        self(packet_kind)
    }
}

/// Rejects a pointer-size mismatch between the trace and the replay host,
/// unless `packet_kind` is the create-device call. Per the mixed-pointer-size
/// open question: implementers must not guess at a reinterpretation for any
/// packet kind besides create-device.
pub fn ensure_ptr_size_compatible(
    classifier: &dyn CreateDeviceClassifier,
    packet_kind: u16,
    trace_ptr_size: u8,
) -> Result<(), TraceError> {
    if trace_ptr_size == TraceFileHeader::NATIVE_PTR_SIZE || classifier.is_create_device(packet_kind) {
        return Ok(());
    }
    Err(TraceError::new(
        "gapitrace_replay::ptr_width::ensure_ptr_size_compatible",
        TraceErrorKind::UnsupportedVersion {
            found: u32::from(trace_ptr_size),
            min: u32::from(TraceFileHeader::NATIVE_PTR_SIZE),
            max: u32::from(TraceFileHeader::NATIVE_PTR_SIZE),
        },
    ))
}

/// Extracts a device handle from a create-device packet body at `offset`,
/// honoring the trace's captured pointer size (4 or 8 bytes) rather than the
/// host's native width, zero-extending a 32-bit value to a full [`Handle`].
pub fn extract_device_handle(body: &[u8], offset: usize, ptr_size: u8) -> Result<Handle, TraceError> {
    let value = match ptr_size {
        4 => body
            .get(offset..offset + 4)
            .map(|field| u64::from(u32::from_le_bytes(field.try_into().expect("slice is exactly 4 bytes")))),
        8 => body
            .get(offset..offset + 8)
            .map(|field| u64::from_le_bytes(field.try_into().expect("slice is exactly 8 bytes"))),
        _ => None,
    };
    value.ok_or_else(|| {
        TraceError::new(
            "gapitrace_replay::ptr_width::extract_device_handle",
            TraceErrorKind::Corrupt {
                reason: "device handle field out of bounds or unsupported pointer size",
            },
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native() -> u8 {
        TraceFileHeader::NATIVE_PTR_SIZE
    }

    fn mismatched() -> u8 {
        if native() == 8 {
            4
        } else {
            8
        }
    }

    #[test]
    fn matching_ptr_size_is_always_fine() {
        assert!(ensure_ptr_size_compatible(&|_: u16| false, 7, native()).is_ok());
    }

    #[test]
    fn mismatch_is_rejected_for_non_create_device_packets() {
        let err = ensure_ptr_size_compatible(&|_: u16| false, 7, mismatched()).unwrap_err();
        assert!(matches!(err.kind(), TraceErrorKind::UnsupportedVersion { .. }));
    }

    #[test]
    fn mismatch_is_allowed_for_create_device_packets() {
        assert!(ensure_ptr_size_compatible(&|kind: u16| kind == 7, 7, mismatched()).is_ok());
    }

    #[test]
    fn extract_device_handle_reads_4_byte_field() {
        let mut body = vec![0u8; 16];
        body[4..8].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        let handle = extract_device_handle(&body, 4, 4).unwrap();
        assert_eq!(handle, 0x1234_5678);
    }

    #[test]
    fn extract_device_handle_reads_8_byte_field() {
        let mut body = vec![0u8; 16];
        body[0..8].copy_from_slice(&0xdead_beef_0000_0001u64.to_le_bytes());
        let handle = extract_device_handle(&body, 0, 8).unwrap();
        assert_eq!(handle, 0xdead_beef_0000_0001);
    }

    #[test]
    fn extract_device_handle_rejects_out_of_bounds() {
        let body = vec![0u8; 4];
        assert!(extract_device_handle(&body, 2, 8).is_err());
    }
}
