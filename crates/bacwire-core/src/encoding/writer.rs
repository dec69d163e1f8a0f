use crate::EncodeError;
use alloc::vec;
use alloc::vec::Vec;

/// Largest buffer [`encode_to_vec`] will try before giving up.
pub const MAX_ENCODED_LEN: usize = 1 << 20;

#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub const fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn as_written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), EncodeError> {
        if self.remaining() < 1 {
            return Err(EncodeError::BufferTooSmall);
        }
        self.buf[self.pos] = value;
        self.pos += 1;
        Ok(())
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        if self.remaining() < data.len() {
            return Err(EncodeError::BufferTooSmall);
        }
        let end = self.pos + data.len();
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    pub fn write_be_u16(&mut self, value: u16) -> Result<(), EncodeError> {
        self.write_all(&value.to_be_bytes())
    }

    pub fn write_be_u32(&mut self, value: u32) -> Result<(), EncodeError> {
        self.write_all(&value.to_be_bytes())
    }
}

/// Runs `encode` against doubling scratch buffers until it fits.
///
/// Service payloads such as a thousand-object WritePropertyMultiple do not fit
/// a single frame, so callers that segment need the whole encoding up front.
pub fn encode_to_vec<F>(mut encode: F) -> Result<Vec<u8>, EncodeError>
where
    F: FnMut(&mut Writer<'_>) -> Result<(), EncodeError>,
{
    let mut size = 512usize;
    loop {
        let mut buf = vec![0u8; size];
        let mut w = Writer::new(&mut buf);
        match encode(&mut w) {
            Ok(()) => {
                let len = w.position();
                buf.truncate(len);
                return Ok(buf);
            }
            Err(EncodeError::BufferTooSmall) if size < MAX_ENCODED_LEN => size *= 2,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{encode_to_vec, Writer};
    use crate::EncodeError;

    #[test]
    fn writer_writes_values() {
        let mut buf = [0u8; 4];
        let mut w = Writer::new(&mut buf);
        w.write_u8(1).unwrap();
        w.write_all(&[2, 3]).unwrap();
        assert_eq!(w.as_written(), &[1, 2, 3]);
    }

    #[test]
    fn writer_bounds() {
        let mut buf = [0u8; 1];
        let mut w = Writer::new(&mut buf);
        w.write_u8(1).unwrap();
        assert_eq!(w.write_u8(2).unwrap_err(), EncodeError::BufferTooSmall);
    }

    #[test]
    fn encode_to_vec_grows_past_initial_buffer() {
        let out = encode_to_vec(|w| {
            for i in 0..3000u32 {
                w.write_u8((i % 251) as u8)?;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(out.len(), 3000);
        assert_eq!(out[2999], (2999 % 251) as u8);
    }

    #[test]
    fn encode_to_vec_passes_through_other_errors() {
        let err = encode_to_vec(|_| Err(EncodeError::ValueOutOfRange)).unwrap_err();
        assert_eq!(err, EncodeError::ValueOutOfRange);
    }
}
