use crate::apdu::ApduType;
use crate::encoding::{reader::Reader, writer::Writer};
use crate::{DecodeError, EncodeError};

/// The two octets in front of every Who-Is and I-Am.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnconfirmedRequestHeader {
    pub service_choice: u8,
}

impl UnconfirmedRequestHeader {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_all(&[ApduType::UnconfirmedRequest.pdu_bits(), self.service_choice])
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let [pdu, service_choice] = r.read_array()?;
        match ApduType::from_u8(pdu >> 4) {
            Some(ApduType::UnconfirmedRequest) if pdu & 0x0F == 0 => Ok(Self { service_choice }),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}
