use alloc::vec::Vec;

/// A BACnet bit string: `data` holds bits MSB-first, with `unused_bits`
/// padding bits at the end of the last octet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitString {
    pub unused_bits: u8,
    pub data: Vec<u8>,
}

impl BitString {
    pub fn new(unused_bits: u8, data: Vec<u8>) -> Self {
        Self { unused_bits, data }
    }

    /// An all-clear bit string holding exactly `bits` bits.
    pub fn with_len(bits: usize) -> Self {
        let octets = bits.div_ceil(8);
        Self {
            unused_bits: (octets * 8 - bits) as u8,
            data: alloc::vec![0; octets],
        }
    }

    pub fn len(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.unused_bits as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, bit: usize) -> bool {
        bit < self.len() && (self.data[bit / 8] & (0x80 >> (bit % 8))) != 0
    }

    /// Sets `bit`; out-of-range bits are ignored.
    pub fn set(&mut self, bit: usize, value: bool) {
        if bit >= self.len() {
            return;
        }
        let mask = 0x80 >> (bit % 8);
        if value {
            self.data[bit / 8] |= mask;
        } else {
            self.data[bit / 8] &= !mask;
        }
    }
}
