use crate::types::BitString;

/// Bits in `protocol-services-supported` covered by this revision.
pub const SERVICES_SUPPORTED_BITS: usize = 41;

/// Bit position of each unconfirmed service choice (0..=10) in the bitstring.
const UNCONFIRMED_BITS: [usize; 11] = [26, 27, 28, 29, 30, 31, 32, 33, 34, 36, 40];

/// The `protocol-services-supported` bitstring of a device.
///
/// Confirmed service choices map directly to bit positions; unconfirmed
/// choices live further up and are looked up in a table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServicesSupported(BitString);

impl ServicesSupported {
    pub fn none() -> Self {
        Self(BitString::with_len(SERVICES_SUPPORTED_BITS))
    }

    pub fn all() -> Self {
        let mut bits = Self::none();
        for bit in 0..SERVICES_SUPPORTED_BITS {
            bits.0.set(bit, true);
        }
        bits
    }

    pub fn with_confirmed(mut self, service_choice: u8) -> Self {
        self.0.set(service_choice as usize, true);
        self
    }

    pub fn with_unconfirmed(mut self, service_choice: u8) -> Self {
        if let Some(bit) = UNCONFIRMED_BITS.get(service_choice as usize) {
            self.0.set(*bit, true);
        }
        self
    }

    pub fn supports_confirmed(&self, service_choice: u8) -> bool {
        (service_choice as usize) < UNCONFIRMED_BITS[0] && self.0.get(service_choice as usize)
    }

    pub fn supports_unconfirmed(&self, service_choice: u8) -> bool {
        UNCONFIRMED_BITS
            .get(service_choice as usize)
            .is_some_and(|bit| self.0.get(*bit))
    }

    pub fn as_bit_string(&self) -> &BitString {
        &self.0
    }
}

impl From<BitString> for ServicesSupported {
    fn from(bits: BitString) -> Self {
        Self(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::ServicesSupported;

    #[test]
    fn confirmed_and_unconfirmed_positions() {
        let s = ServicesSupported::none()
            .with_confirmed(12)
            .with_unconfirmed(8);
        assert!(s.supports_confirmed(12));
        assert!(!s.supports_confirmed(16));
        assert!(s.supports_unconfirmed(8));
        assert!(s.as_bit_string().get(34));
        assert_eq!(s.as_bit_string().data.len(), 6);
        assert_eq!(s.as_bit_string().unused_bits, 7);
    }

    #[test]
    fn all_supports_everything_listed() {
        let s = ServicesSupported::all();
        assert!(s.supports_confirmed(16));
        assert!(s.supports_unconfirmed(0));
    }
}
