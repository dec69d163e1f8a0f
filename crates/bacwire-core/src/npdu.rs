use crate::encoding::{reader::Reader, writer::Writer};
use crate::{DecodeError, EncodeError};

/// BACnet network layer protocol version (always `0x01`).
pub const NPDU_VERSION: u8 = 0x01;

pub const CONTROL_NETWORK_MESSAGE: u8 = 0x80;
pub const CONTROL_DESTINATION: u8 = 0x20;
pub const CONTROL_SOURCE: u8 = 0x08;
pub const CONTROL_EXPECTING_REPLY: u8 = 0x04;

/// A remote network number plus MAC, as carried in DNET/SNET fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NpduAddress {
    pub network: u16,
    pub mac: [u8; 6],
    pub mac_len: u8,
}

/// Network-layer header in front of every APDU.
///
/// Routing is not performed here; addresses are decoded so frames relayed by a
/// router still parse, and carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Npdu {
    pub control: u8,
    pub destination: Option<NpduAddress>,
    pub source: Option<NpduAddress>,
    pub hop_count: Option<u8>,
    pub message_type: Option<u8>,
    pub vendor_id: Option<u16>,
}

impl Npdu {
    pub const fn new(control: u8) -> Self {
        Self {
            control,
            destination: None,
            source: None,
            hop_count: None,
            message_type: None,
            vendor_id: None,
        }
    }

    /// Local-network header for an application message.
    pub const fn application(expecting_reply: bool) -> Self {
        Self::new(if expecting_reply {
            CONTROL_EXPECTING_REPLY
        } else {
            0
        })
    }

    pub const fn is_network_message(&self) -> bool {
        (self.control & CONTROL_NETWORK_MESSAGE) != 0
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(NPDU_VERSION)?;
        w.write_u8(self.control)?;

        if let Some(dest) = self.destination {
            encode_addr(w, dest)?;
        }
        if let Some(src) = self.source {
            encode_addr(w, src)?;
        }
        if self.destination.is_some() {
            w.write_u8(self.hop_count.unwrap_or(255))?;
        }
        if self.is_network_message() {
            w.write_u8(self.message_type.unwrap_or(0))?;
            if matches!(self.message_type, Some(0x80..=0xFF)) {
                w.write_be_u16(self.vendor_id.unwrap_or(0))?;
            }
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        if r.read_u8()? != NPDU_VERSION {
            return Err(DecodeError::InvalidValue);
        }

        let control = r.read_u8()?;
        let destination = if (control & CONTROL_DESTINATION) != 0 {
            Some(decode_addr(r)?)
        } else {
            None
        };
        let source = if (control & CONTROL_SOURCE) != 0 {
            Some(decode_addr(r)?)
        } else {
            None
        };
        let hop_count = if destination.is_some() {
            Some(r.read_u8()?)
        } else {
            None
        };

        let (message_type, vendor_id) = if (control & CONTROL_NETWORK_MESSAGE) != 0 {
            let mt = r.read_u8()?;
            let vid = if mt >= 0x80 {
                Some(r.read_be_u16()?)
            } else {
                None
            };
            (Some(mt), vid)
        } else {
            (None, None)
        };

        Ok(Self {
            control,
            destination,
            source,
            hop_count,
            message_type,
            vendor_id,
        })
    }
}

/// Splits a datalink payload into its NPDU header and APDU bytes.
///
/// Returns `Ok(None)` for network-layer messages, which carry no APDU.
pub fn split_frame(frame: &[u8]) -> Result<Option<(Npdu, &[u8])>, DecodeError> {
    let mut r = Reader::new(frame);
    let npdu = Npdu::decode(&mut r)?;
    if npdu.is_network_message() {
        return Ok(None);
    }
    Ok(Some((npdu, r.rest())))
}

fn encode_addr(w: &mut Writer<'_>, addr: NpduAddress) -> Result<(), EncodeError> {
    if addr.mac_len as usize > addr.mac.len() {
        return Err(EncodeError::InvalidLength);
    }
    w.write_be_u16(addr.network)?;
    w.write_u8(addr.mac_len)?;
    w.write_all(&addr.mac[..addr.mac_len as usize])
}

fn decode_addr(r: &mut Reader<'_>) -> Result<NpduAddress, DecodeError> {
    let network = r.read_be_u16()?;
    let mac_len = r.read_u8()?;
    if mac_len as usize > 6 {
        return Err(DecodeError::InvalidLength);
    }
    let mut mac = [0u8; 6];
    mac[..mac_len as usize].copy_from_slice(r.read_exact(mac_len as usize)?);
    Ok(NpduAddress {
        network,
        mac,
        mac_len,
    })
}

#[cfg(test)]
mod tests {
    use super::{split_frame, Npdu, NpduAddress, CONTROL_DESTINATION};
    use crate::encoding::{reader::Reader, writer::Writer};

    #[test]
    fn npdu_roundtrip_with_destination() {
        let mut p = Npdu::new(CONTROL_DESTINATION);
        p.destination = Some(NpduAddress {
            network: 1,
            mac: [192, 168, 1, 2, 0xBA, 0xC0],
            mac_len: 6,
        });
        p.hop_count = Some(255);

        let mut buf = [0u8; 32];
        let mut w = Writer::new(&mut buf);
        p.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        let dec = Npdu::decode(&mut r).unwrap();
        assert_eq!(dec, p);
    }

    #[test]
    fn split_frame_returns_apdu_bytes() {
        let frame = [0x01, 0x04, 0x02, 0x75, 0x01, 0x0C];
        let (npdu, apdu) = split_frame(&frame).unwrap().unwrap();
        assert_eq!(npdu, Npdu::application(true));
        assert_eq!(apdu, &[0x02, 0x75, 0x01, 0x0C]);
    }

    #[test]
    fn split_frame_skips_network_messages() {
        // Who-Is-Router-To-Network
        assert!(split_frame(&[0x01, 0x80, 0x00]).unwrap().is_none());
    }

    #[test]
    fn rejects_wrong_version() {
        assert!(split_frame(&[0x02, 0x00, 0x10, 0x08]).is_err());
    }
}
