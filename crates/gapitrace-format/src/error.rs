use thiserror::Error;

pub type TraceResult<T> = Result<T, TraceError>;
pub type TraceError = gapitrace_error::Error<TraceErrorKind>;

/// Failure modes for the capture and replay pipelines.
///
/// `StreamIO` and `ShadowFault` wrap a source error from `gapitrace-stream`/
/// `gapitrace-shadow`; the rest are self-contained.
#[derive(Debug, Error)]
pub enum TraceErrorKind {
    #[error("stream I/O failed")]
    StreamIO,
    #[error("packet is corrupt: {reason}")]
    Corrupt { reason: &'static str },
    #[error("unsupported trace format version {found} (supported: {min}..={max})")]
    UnsupportedVersion { found: u32, min: u32, max: u32 },
    #[error("unknown handle of kind {kind} referenced during replay")]
    UnknownHandle { kind: &'static str },
    #[error("capture and replay physical devices are incompatible: {reason}")]
    PlatformsIncompatible { reason: &'static str },
    #[error("feature unavailable on replay device: {feature}")]
    FeatureUnavailable { feature: &'static str },
    #[error("compression failed for codec {codec}")]
    CompressionFailed { codec: &'static str },
    #[error("page-guard shadow fault")]
    ShadowFault,
    #[error("operation unsupported on a socket-backed stream")]
    UnsupportedOnSocket,
}

impl From<gapitrace_core::EncodeError> for TraceError {
    fn from(error: gapitrace_core::EncodeError) -> Self {
        Self::new("gapitrace_format::encode", TraceErrorKind::Corrupt { reason: "encode failed" }).with_source(error)
    }
}

impl From<gapitrace_core::DecodeError> for TraceError {
    fn from(error: gapitrace_core::DecodeError) -> Self {
        Self::new("gapitrace_format::decode", TraceErrorKind::Corrupt { reason: "decode failed" }).with_source(error)
    }
}
