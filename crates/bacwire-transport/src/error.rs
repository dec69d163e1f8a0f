use bacwire_core::apdu::{AbortReason, RejectReason};
use bacwire_core::types::{ErrorClass, ErrorCode};
use bacwire_core::{DecodeError, EncodeError};
use bacwire_datalink::DataLinkError;
use thiserror::Error;

/// Failures of the transport itself: start-up, local transmission, and
/// frames the engine had to drop.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("datalink error: {0}")]
    DataLink(#[from] DataLinkError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("transport terminated")]
    Terminated,
}

/// Why a confirmed request did not complete with an ack.
///
/// Every [`ResultHandle`](crate::ResultHandle) resolves to exactly one
/// `Result<ServiceAck, RequestError>`, so this type is `Clone` and shared
/// between waiters and completion consumers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("request timed out")]
    TimedOut,
    #[error("request rejected: {0}")]
    Rejected(RejectReason),
    #[error("request aborted: {reason} (by_peer={by_peer})")]
    Aborted { reason: AbortReason, by_peer: bool },
    #[error("remote service error for service choice {service_choice}")]
    Remote {
        service_choice: u8,
        error_class: Option<ErrorClass>,
        error_code: Option<ErrorCode>,
    },
    #[error("all invoke ids are in use")]
    InvokeIdsExhausted,
    #[error("message needs {segments} segments, more than can be sent")]
    TooManySegments { segments: usize },
    #[error("response payload exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },
    #[error("remote device does not support service choice {0}")]
    ServiceNotSupported(u8),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("datalink error: {0}")]
    DataLink(String),
    #[error("transport terminated")]
    Shutdown,
}

impl From<DataLinkError> for RequestError {
    fn from(err: DataLinkError) -> Self {
        Self::DataLink(err.to_string())
    }
}

impl RequestError {
    /// Aborted by this side of the exchange.
    pub const fn local_abort(reason: AbortReason) -> Self {
        Self::Aborted {
            reason,
            by_peer: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RequestError, TransportError};
    use bacwire_core::apdu::AbortReason;
    use bacwire_datalink::DataLinkError;

    #[test]
    fn datalink_failures_keep_their_message() {
        let err: RequestError = DataLinkError::FrameTooLarge.into();
        assert_eq!(err, RequestError::DataLink("frame too large".into()));
        let err: TransportError = DataLinkError::Closed.into();
        assert_eq!(err.to_string(), "datalink error: link closed");
    }

    #[test]
    fn abort_display_names_origin() {
        let err = RequestError::local_abort(AbortReason::SegmentationNotSupported);
        assert_eq!(
            err.to_string(),
            "request aborted: segmentation-not-supported (by_peer=false)"
        );
    }
}
