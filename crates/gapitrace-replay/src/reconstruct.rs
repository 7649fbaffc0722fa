use gapitrace_format::DeviceFeatureSupport;

/// Which capture-replay-stable features the replayer actually turned on for
/// a device, after reconciling what the trace asked for against what the
/// live physical device reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnabledFeatures {
    pub buffer_device_address_capture_replay: bool,
    pub acceleration_structure_capture_replay: bool,
    pub ray_tracing_shader_group_handle_capture_replay: bool,
}

/// Reconciles the metadata document's per-device feature request against
/// what the live replay device supports (spec §4.6, capture-replay feature
/// enablement). Every requested-but-unsupported feature is logged as a
/// warning; the corresponding create-info flag is simply left off, and
/// replay proceeds best-effort.
pub fn enable_capture_replay_features(requested: DeviceFeatureSupport, device_supports: DeviceFeatureSupport) -> EnabledFeatures {
    let mut enabled = EnabledFeatures::default();

    if requested.buffer_device_address_capture_replay {
        if device_supports.buffer_device_address_capture_replay {
            enabled.buffer_device_address_capture_replay = true;
        } else {
            tracing::warn!("buffer-device-address capture-replay requested but not supported by replay device");
        }
    }

    if requested.acceleration_structure_capture_replay {
        if device_supports.acceleration_structure_capture_replay {
            enabled.acceleration_structure_capture_replay = true;
        } else {
            tracing::warn!("acceleration-structure capture-replay requested but not supported by replay device");
        }
    }

    if requested.ray_tracing_shader_group_handle_capture_replay {
        if device_supports.ray_tracing_shader_group_handle_capture_replay {
            enabled.ray_tracing_shader_group_handle_capture_replay = true;
        } else {
            tracing::warn!("ray-tracing shader-group-handle capture-replay requested but not supported by replay device");
        }
    }

    enabled
}

/// Computes the `pShaderGroupCaptureReplayHandle` pointer target for one
/// ray-tracing pipeline shader group (spec §4.6, ray-tracing pipeline
/// creation): a slice into the packet's `pData` blob at
/// `group_index * handle_size`, or `None` if the device doesn't support
/// shader-group-handle capture-replay, in which case the flag is left
/// cleared and the pointer left null.
#[must_use]
pub fn shader_group_capture_replay_pointer(
    data: &[u8],
    handle_size: usize,
    group_index: usize,
    device_supports_handle_capture_replay: bool,
) -> Option<&[u8]> {
    if !device_supports_handle_capture_replay {
        return None;
    }
    let start = group_index.checked_mul(handle_size)?;
    data.get(start..start + handle_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_features_are_not_enabled() {
        let requested = DeviceFeatureSupport {
            buffer_device_address_capture_replay: true,
            acceleration_structure_capture_replay: true,
            ray_tracing_shader_group_handle_capture_replay: false,
            shader_group_handle_size: 0,
        };
        let supports = DeviceFeatureSupport {
            buffer_device_address_capture_replay: true,
            acceleration_structure_capture_replay: false,
            ray_tracing_shader_group_handle_capture_replay: false,
            shader_group_handle_size: 0,
        };

        let enabled = enable_capture_replay_features(requested, supports);
        assert!(enabled.buffer_device_address_capture_replay);
        assert!(!enabled.acceleration_structure_capture_replay);
        assert!(!enabled.ray_tracing_shader_group_handle_capture_replay);
    }

    #[test]
    fn shader_group_pointer_is_none_when_unsupported() {
        let data = vec![0u8; 64];
        assert!(shader_group_capture_replay_pointer(&data, 32, 1, false).is_none());
    }

    #[test]
    fn shader_group_pointer_indexes_by_handle_size() {
        let mut data = vec![0u8; 64];
        data[32..64].copy_from_slice(&[7u8; 32]);
        let slice = shader_group_capture_replay_pointer(&data, 32, 1, true).unwrap();
        assert_eq!(slice, &[7u8; 32][..]);
    }
}
