//! Service payload codecs.
//!
//! Each codec encodes and decodes the bytes after the APDU header. The
//! unions below tie payloads to their service choice so callers can dispatch
//! with a `match` on the variant.

pub mod i_am;
pub mod read_property;
pub mod read_property_multiple;
pub mod value_codec;
pub mod who_is;
pub mod write_property;
pub mod write_property_multiple;

use crate::encoding::{reader::Reader, writer::encode_to_vec, writer::Writer};
use crate::{DecodeError, EncodeError};
use alloc::vec::Vec;

pub use i_am::{IAmRequest, SERVICE_I_AM};
pub use read_property::{ReadPropertyAck, ReadPropertyRequest, SERVICE_READ_PROPERTY};
pub use read_property_multiple::{
    PropertyReference, ReadAccessResult, ReadAccessSpecification, ReadPropertyMultipleAck,
    ReadPropertyMultipleRequest, ReadResult, ReadResultElement, SERVICE_READ_PROPERTY_MULTIPLE,
};
pub use who_is::{WhoIsRequest, SERVICE_WHO_IS};
pub use write_property::{WritePropertyRequest, SERVICE_WRITE_PROPERTY};
pub use write_property_multiple::{
    PropertyValue, WriteAccessSpecification, WritePropertyMultipleRequest,
    SERVICE_WRITE_PROPERTY_MULTIPLE,
};

/// Decodes with `decode` and fails if bytes are left over.
fn decode_all<T>(
    bytes: &[u8],
    decode: impl FnOnce(&mut Reader<'_>) -> Result<T, DecodeError>,
) -> Result<T, DecodeError> {
    let mut r = Reader::new(bytes);
    let value = decode(&mut r)?;
    if !r.is_empty() {
        return Err(DecodeError::TrailingData {
            extra: r.remaining(),
        });
    }
    Ok(value)
}

/// Confirmed service requests understood by this crate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConfirmedRequest {
    ReadProperty(ReadPropertyRequest),
    WriteProperty(WritePropertyRequest),
    ReadPropertyMultiple(ReadPropertyMultipleRequest),
    WritePropertyMultiple(WritePropertyMultipleRequest),
}

impl ConfirmedRequest {
    pub const fn service_choice(&self) -> u8 {
        match self {
            Self::ReadProperty(_) => SERVICE_READ_PROPERTY,
            Self::WriteProperty(_) => SERVICE_WRITE_PROPERTY,
            Self::ReadPropertyMultiple(_) => SERVICE_READ_PROPERTY_MULTIPLE,
            Self::WritePropertyMultiple(_) => SERVICE_WRITE_PROPERTY_MULTIPLE,
        }
    }

    /// Whether a successful reply carries data (complex ack) rather than a simple ack.
    pub const fn expects_complex_ack(&self) -> bool {
        matches!(self, Self::ReadProperty(_) | Self::ReadPropertyMultiple(_))
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::ReadProperty(req) => req.encode(w),
            Self::WriteProperty(req) => req.encode(w),
            Self::ReadPropertyMultiple(req) => req.encode(w),
            Self::WritePropertyMultiple(req) => req.encode(w),
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        encode_to_vec(|w| self.encode(w))
    }

    pub fn decode(service_choice: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        match service_choice {
            SERVICE_READ_PROPERTY => {
                decode_all(payload, ReadPropertyRequest::decode).map(Self::ReadProperty)
            }
            SERVICE_WRITE_PROPERTY => {
                decode_all(payload, WritePropertyRequest::decode).map(Self::WriteProperty)
            }
            SERVICE_READ_PROPERTY_MULTIPLE => {
                decode_all(payload, ReadPropertyMultipleRequest::decode)
                    .map(Self::ReadPropertyMultiple)
            }
            SERVICE_WRITE_PROPERTY_MULTIPLE => {
                decode_all(payload, WritePropertyMultipleRequest::decode)
                    .map(Self::WritePropertyMultiple)
            }
            other => Err(DecodeError::UnknownService(other)),
        }
    }
}

impl From<ReadPropertyRequest> for ConfirmedRequest {
    fn from(req: ReadPropertyRequest) -> Self {
        Self::ReadProperty(req)
    }
}

impl From<WritePropertyRequest> for ConfirmedRequest {
    fn from(req: WritePropertyRequest) -> Self {
        Self::WriteProperty(req)
    }
}

impl From<ReadPropertyMultipleRequest> for ConfirmedRequest {
    fn from(req: ReadPropertyMultipleRequest) -> Self {
        Self::ReadPropertyMultiple(req)
    }
}

impl From<WritePropertyMultipleRequest> for ConfirmedRequest {
    fn from(req: WritePropertyMultipleRequest) -> Self {
        Self::WritePropertyMultiple(req)
    }
}

/// Complex-ack payloads understood by this crate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComplexAck {
    ReadProperty(ReadPropertyAck),
    ReadPropertyMultiple(ReadPropertyMultipleAck),
}

impl ComplexAck {
    pub const fn service_choice(&self) -> u8 {
        match self {
            Self::ReadProperty(_) => SERVICE_READ_PROPERTY,
            Self::ReadPropertyMultiple(_) => SERVICE_READ_PROPERTY_MULTIPLE,
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::ReadProperty(ack) => ack.encode(w),
            Self::ReadPropertyMultiple(ack) => ack.encode(w),
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        encode_to_vec(|w| self.encode(w))
    }

    pub fn decode(service_choice: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        match service_choice {
            SERVICE_READ_PROPERTY => {
                decode_all(payload, ReadPropertyAck::decode).map(Self::ReadProperty)
            }
            SERVICE_READ_PROPERTY_MULTIPLE => {
                decode_all(payload, ReadPropertyMultipleAck::decode)
                    .map(Self::ReadPropertyMultiple)
            }
            other => Err(DecodeError::UnknownService(other)),
        }
    }
}

/// Unconfirmed service requests understood by this crate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnconfirmedRequest {
    WhoIs(WhoIsRequest),
    IAm(IAmRequest),
}

impl UnconfirmedRequest {
    pub const fn service_choice(&self) -> u8 {
        match self {
            Self::WhoIs(_) => SERVICE_WHO_IS,
            Self::IAm(_) => SERVICE_I_AM,
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::WhoIs(req) => req.encode(w),
            Self::IAm(req) => req.encode(w),
        }
    }

    pub fn decode(service_choice: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        match service_choice {
            SERVICE_WHO_IS => decode_all(payload, WhoIsRequest::decode).map(Self::WhoIs),
            SERVICE_I_AM => decode_all(payload, IAmRequest::decode).map(Self::IAm),
            other => Err(DecodeError::UnknownService(other)),
        }
    }
}

impl From<WhoIsRequest> for UnconfirmedRequest {
    fn from(req: WhoIsRequest) -> Self {
        Self::WhoIs(req)
    }
}

impl From<IAmRequest> for UnconfirmedRequest {
    fn from(req: IAmRequest) -> Self {
        Self::IAm(req)
    }
}
