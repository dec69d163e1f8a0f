/// Confirmed-service request/response headers and segment acks.
pub mod confirmed;
/// APDU type discriminant.
pub mod pdu;
/// Reject and abort reason codes.
pub mod reason;
/// Unconfirmed-service request header.
pub mod unconfirmed;

pub use confirmed::{
    AbortPdu, BacnetError, ComplexAckHeader, ConfirmedRequestHeader, RejectPdu, SegmentAck,
    SimpleAck, COMPLEX_ACK_SEGMENTED_HEADER_LEN, CONFIRMED_SEGMENTED_HEADER_LEN,
};
pub use pdu::ApduType;
pub use reason::{AbortReason, RejectReason};
pub use unconfirmed::UnconfirmedRequestHeader;
