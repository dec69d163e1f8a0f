use core::fmt;

/// Failure to serialize a PDU or service payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// The fixed-size output ran out of room.
    BufferTooSmall,
    ValueOutOfRange,
    InvalidLength,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BufferTooSmall => "output buffer exhausted",
            Self::ValueOutOfRange => "value cannot be represented on the wire",
            Self::InvalidLength => "length field out of bounds",
        })
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncodeError {}

/// Failure to parse bytes received from the wire.
///
/// The variants line up with BACnet reject reasons so a responder can tell
/// the requester what was wrong with its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    UnexpectedEof,
    InvalidTag,
    InvalidLength,
    InvalidValue,
    /// A value type this crate does not decode.
    Unsupported,
    UnknownService(u8),
    /// The payload decoded but `extra` octets were left over.
    TrailingData { extra: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => f.write_str("input ended early"),
            Self::InvalidTag => f.write_str("malformed tag"),
            Self::InvalidLength => f.write_str("length field out of bounds"),
            Self::InvalidValue => f.write_str("value out of range"),
            Self::Unsupported => f.write_str("unsupported value type"),
            Self::UnknownService(choice) => write!(f, "unknown service choice {choice}"),
            Self::TrailingData { extra } => write!(f, "{extra} octets after the payload"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}
