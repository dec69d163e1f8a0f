#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApduType {
    ConfirmedRequest = 0,
    UnconfirmedRequest = 1,
    SimpleAck = 2,
    ComplexAck = 3,
    SegmentAck = 4,
    Error = 5,
    Reject = 6,
    Abort = 7,
}

impl ApduType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::ConfirmedRequest),
            1 => Some(Self::UnconfirmedRequest),
            2 => Some(Self::SimpleAck),
            3 => Some(Self::ComplexAck),
            4 => Some(Self::SegmentAck),
            5 => Some(Self::Error),
            6 => Some(Self::Reject),
            7 => Some(Self::Abort),
            _ => None,
        }
    }

    /// Reads the PDU type from the high nibble of the first APDU octet.
    pub fn of(apdu: &[u8]) -> Option<Self> {
        apdu.first().and_then(|b0| Self::from_u8(b0 >> 4))
    }

    pub(crate) const fn pdu_bits(self) -> u8 {
        (self as u8) << 4
    }
}

#[cfg(test)]
mod tests {
    use super::ApduType;

    #[test]
    fn of_reads_high_nibble() {
        assert_eq!(ApduType::of(&[0x0A, 0x05]), Some(ApduType::ConfirmedRequest));
        assert_eq!(ApduType::of(&[0x41]), Some(ApduType::SegmentAck));
        assert_eq!(ApduType::of(&[0x80]), None);
        assert_eq!(ApduType::of(&[]), None);
    }
}
