//! Answering confirmed requests from peers.
//!
//! The engine decodes each incoming request and hands it to a
//! [`ServiceHandler`]; the handler's verdict becomes a simple ack, complex
//! ack, Error, Reject or Abort on the wire.

use crate::engine::Timer;
use crate::handle::ServiceAck;
use crate::segmentation::{ReassemblyBuffer, SegmentWindow, MAX_SEGMENTS};
use bacwire_core::apdu::{AbortReason, ConfirmedRequestHeader, RejectReason};
use bacwire_core::services::{ConfirmedRequest, UnconfirmedRequest};
use bacwire_core::types::{ErrorClass, ErrorCode, MaxApdu, MaxSegments};
use bacwire_core::DecodeError;
use bacwire_datalink::DataLinkAddress;

/// How a handler declines a confirmed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceFailure {
    Error {
        error_class: ErrorClass,
        error_code: ErrorCode,
    },
    Reject(RejectReason),
    Abort(AbortReason),
}

impl ServiceFailure {
    pub const fn error(error_class: ErrorClass, error_code: ErrorCode) -> Self {
        Self::Error {
            error_class,
            error_code,
        }
    }
}

/// Services this device offers to peers.
///
/// Called on the engine task; implementations should return promptly.
pub trait ServiceHandler: Send + Sync + 'static {
    fn confirmed(
        &self,
        source: &DataLinkAddress,
        request: ConfirmedRequest,
    ) -> Result<ServiceAck, ServiceFailure>;

    /// Sees every unconfirmed request, after the engine has answered Who-Is
    /// and recorded I-Am itself.
    fn unconfirmed(&self, _source: &DataLinkAddress, _request: &UnconfirmedRequest) {}
}

/// Rejects every confirmed request as an unrecognized service.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoServices;

impl ServiceHandler for NoServices {
    fn confirmed(
        &self,
        _source: &DataLinkAddress,
        _request: ConfirmedRequest,
    ) -> Result<ServiceAck, ServiceFailure> {
        Err(ServiceFailure::Reject(RejectReason::UnrecognizedService))
    }
}

/// Reject reason for a request payload that failed to decode.
pub(crate) fn reject_reason(err: &DecodeError) -> RejectReason {
    match err {
        DecodeError::UnknownService(_) => RejectReason::UnrecognizedService,
        DecodeError::InvalidTag => RejectReason::InvalidTag,
        DecodeError::UnexpectedEof => RejectReason::MissingRequiredParameter,
        DecodeError::TrailingData { .. } => RejectReason::TooManyArguments,
        DecodeError::InvalidValue => RejectReason::ParameterOutOfRange,
        DecodeError::Unsupported => RejectReason::InvalidParameterDataType,
        _ => RejectReason::Other,
    }
}

/// Where a server-side segmented exchange stands.
#[derive(Debug)]
pub(crate) enum ServerPhase {
    /// Collecting the segments of a request.
    Reassembling(ReassemblyBuffer),
    /// Sending the segments of a complex ack.
    Responding(SegmentWindow),
}

/// What the requesting client said it can take, from the request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClientLimits {
    pub max_apdu: usize,
    pub max_segments: Option<usize>,
    pub segmented_response_accepted: bool,
}

impl ClientLimits {
    pub fn from_header(header: &ConfirmedRequestHeader) -> Self {
        Self {
            max_apdu: MaxApdu::from_u8(header.max_apdu).octets(),
            max_segments: MaxSegments::from_u8(header.max_segments).limit(),
            segmented_response_accepted: header.segmented_response_accepted,
        }
    }

    /// Whether a response of `segments` segments may be sent.
    pub fn accepts_segments(&self, segments: usize) -> bool {
        segments <= MAX_SEGMENTS && self.max_segments.map_or(true, |limit| segments <= limit)
    }
}

/// Server-side state of a segmented exchange, keyed by peer and invoke id.
#[derive(Debug)]
pub(crate) struct ServerTransaction {
    pub service_choice: u8,
    pub limits: ClientLimits,
    pub phase: ServerPhase,
    pub retries_remaining: u8,
    pub timer: Option<Timer>,
}
