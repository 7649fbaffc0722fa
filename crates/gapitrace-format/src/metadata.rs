use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The structured document appended once on finalization (format version
/// ≥ 10) and rewritten once more, in place, once per-device feature support
/// is known (format version ≥ 11).
///
/// On disk this is UTF-8 JSON, NUL-padded to an 8-byte boundary so the
/// rewrite in step 3 of finalization (see `gapitrace-capture`) never needs to
/// grow the file: the padded length reserved at first write must be at least
/// as large as the final length after `device_features` is populated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataDocument {
    /// Global packet indices of calls the tracer itself synthesized, rather
    /// than calls the application actually made.
    #[serde(rename = "injectedCalls", default)]
    pub injected_calls: Vec<u64>,

    /// Per-device capture-replay feature support, keyed by the device handle
    /// rendered as a lowercase hex string (`0x...`) so the document stays
    /// valid JSON regardless of the captured pointer width.
    #[serde(rename = "deviceFeatures", default)]
    pub device_features: BTreeMap<String, DeviceFeatureSupport>,
}

/// Per-device capture-replay feature flags, grounded on the original
/// `deviceFeatureSupport` query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceFeatureSupport {
    #[serde(rename = "bufferDeviceAddressCaptureReplay", default)]
    pub buffer_device_address_capture_replay: bool,
    #[serde(rename = "accelerationStructureCaptureReplay", default)]
    pub acceleration_structure_capture_replay: bool,
    #[serde(rename = "rayTracingShaderGroupHandleCaptureReplay", default)]
    pub ray_tracing_shader_group_handle_capture_replay: bool,
    #[serde(rename = "shaderGroupHandleSize", default)]
    pub shader_group_handle_size: u32,
}

impl MetadataDocument {
    /// Serializes to the padded on-disk form: JSON bytes followed by NUL
    /// padding out to the next multiple of 8, and at least `min_len` bytes
    /// total so a later in-place rewrite (adding `device_features`) has room
    /// to grow without relocating the packet.
    pub fn to_padded_bytes(&self, min_len: usize) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        let target = bytes.len().max(min_len);
        let padded_len = target.div_ceil(8) * 8;
        bytes.resize(padded_len, 0);
        Ok(bytes)
    }

    /// Parses back a padded on-disk document, trimming the trailing NUL run.
    pub fn from_padded_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let trimmed_len = bytes.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
        serde_json::from_slice(&bytes[..trimmed_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_padded_bytes() {
        let mut doc = MetadataDocument::default();
        doc.injected_calls.push(3);
        doc.injected_calls.push(7);
        doc.device_features.insert(
            "0xdeadbeef".to_owned(),
            DeviceFeatureSupport {
                buffer_device_address_capture_replay: true,
                acceleration_structure_capture_replay: false,
                ray_tracing_shader_group_handle_capture_replay: true,
                shader_group_handle_size: 32,
            },
        );

        let bytes = doc.to_padded_bytes(0).unwrap();
        assert_eq!(bytes.len() % 8, 0);
        let decoded = MetadataDocument::from_padded_bytes(&bytes).unwrap();
        assert_eq!(doc, decoded);
    }

    #[test]
    fn padded_bytes_respect_min_len_reservation() {
        let doc = MetadataDocument::default();
        let bytes = doc.to_padded_bytes(256).unwrap();
        assert!(bytes.len() >= 256);
        assert_eq!(bytes.len() % 8, 0);
    }
}
