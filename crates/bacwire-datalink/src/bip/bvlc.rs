use bacwire_core::encoding::{reader::Reader, writer::Writer};
use bacwire_core::{DecodeError, EncodeError};

pub const BVLC_TYPE_BIP: u8 = 0x81;
pub const BVLC_HEADER_LEN: usize = 4;

/// BVLL functions this link sends or reacts to. Broadcast and foreign
/// device table administration is left to the BBMD and decodes as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BvlcFunction {
    Result,
    ForwardedNpdu,
    RegisterForeignDevice,
    DistributeBroadcastToNetwork,
    OriginalUnicastNpdu,
    OriginalBroadcastNpdu,
    Unknown(u8),
}

const FUNCTION_CODES: [(BvlcFunction, u8); 6] = [
    (BvlcFunction::Result, 0x00),
    (BvlcFunction::ForwardedNpdu, 0x04),
    (BvlcFunction::RegisterForeignDevice, 0x05),
    (BvlcFunction::DistributeBroadcastToNetwork, 0x09),
    (BvlcFunction::OriginalUnicastNpdu, 0x0A),
    (BvlcFunction::OriginalBroadcastNpdu, 0x0B),
];

impl BvlcFunction {
    pub fn from_u8(value: u8) -> Self {
        FUNCTION_CODES
            .iter()
            .find(|(_, code)| *code == value)
            .map_or(Self::Unknown(value), |(function, _)| *function)
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Unknown(v) => v,
            known => FUNCTION_CODES
                .iter()
                .find(|(function, _)| *function == known)
                .map_or(0xFF, |(_, code)| *code),
        }
    }

    /// Functions whose body is an NPDU this link hands upward.
    pub const fn carries_npdu(self) -> bool {
        matches!(
            self,
            Self::OriginalUnicastNpdu
                | Self::OriginalBroadcastNpdu
                | Self::DistributeBroadcastToNetwork
                | Self::ForwardedNpdu
        )
    }
}

/// Four-octet BVLC header. `length` covers the whole datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BvlcHeader {
    pub function: BvlcFunction,
    pub length: u16,
}

impl BvlcHeader {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(BVLC_TYPE_BIP)?;
        w.write_u8(self.function.to_u8())?;
        w.write_be_u16(self.length)
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        if r.read_u8()? != BVLC_TYPE_BIP {
            return Err(DecodeError::InvalidValue);
        }
        let function = BvlcFunction::from_u8(r.read_u8()?);
        let length = r.read_be_u16()?;
        if (length as usize) < BVLC_HEADER_LEN {
            return Err(DecodeError::InvalidLength);
        }
        Ok(Self { function, length })
    }

    /// Octets following the header according to `length`.
    pub fn body_len(&self) -> usize {
        self.length as usize - BVLC_HEADER_LEN
    }
}
