use crate::encoding::{reader::Reader, writer::Writer};
use crate::{DecodeError, EncodeError};

const CONTEXT_CLASS: u8 = 0b0000_1000;
const OPENING: u8 = 6;
const CLOSING: u8 = 7;
const EXTENDED_LEN: u8 = 5;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppTag {
    Null = 0,
    Boolean = 1,
    UnsignedInt = 2,
    SignedInt = 3,
    Real = 4,
    Double = 5,
    OctetString = 6,
    CharacterString = 7,
    BitString = 8,
    Enumerated = 9,
    Date = 10,
    Time = 11,
    ObjectId = 12,
}

impl AppTag {
    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        Ok(match value {
            0 => Self::Null,
            1 => Self::Boolean,
            2 => Self::UnsignedInt,
            3 => Self::SignedInt,
            4 => Self::Real,
            5 => Self::Double,
            6 => Self::OctetString,
            7 => Self::CharacterString,
            8 => Self::BitString,
            9 => Self::Enumerated,
            10 => Self::Date,
            11 => Self::Time,
            12 => Self::ObjectId,
            _ => return Err(DecodeError::InvalidTag),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Application { tag: AppTag, len: u32 },
    Context { tag_num: u8, len: u32 },
    Opening { tag_num: u8 },
    Closing { tag_num: u8 },
}

impl Tag {
    pub fn encode(self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Tag::Application { tag, len } => encode_header(w, tag as u8, 0, Some(len)),
            Tag::Context { tag_num, len } => encode_header(w, tag_num, CONTEXT_CLASS, Some(len)),
            Tag::Opening { tag_num } => encode_header(w, tag_num, CONTEXT_CLASS | OPENING, None),
            Tag::Closing { tag_num } => encode_header(w, tag_num, CONTEXT_CLASS | CLOSING, None),
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let first = r.read_u8()?;
        let class_context = (first & CONTEXT_CLASS) != 0;

        let mut tag_num = first >> 4;
        if tag_num == 0x0f {
            tag_num = r.read_u8()?;
        }

        let len_val = first & 0x07;
        if class_context && len_val == OPENING {
            return Ok(Tag::Opening { tag_num });
        }
        if class_context && len_val == CLOSING {
            return Ok(Tag::Closing { tag_num });
        }

        let len = decode_len(r, len_val)?;
        if class_context {
            Ok(Tag::Context { tag_num, len })
        } else {
            Ok(Tag::Application {
                tag: AppTag::from_u8(tag_num)?,
                len,
            })
        }
    }

    /// Decodes the next tag and fails unless it closes `tag_num`.
    pub fn expect_closing(r: &mut Reader<'_>, tag_num: u8) -> Result<(), DecodeError> {
        match Tag::decode(r)? {
            Tag::Closing { tag_num: n } if n == tag_num => Ok(()),
            _ => Err(DecodeError::InvalidTag),
        }
    }

    /// Decodes the next tag and fails unless it opens `tag_num`.
    pub fn expect_opening(r: &mut Reader<'_>, tag_num: u8) -> Result<(), DecodeError> {
        match Tag::decode(r)? {
            Tag::Opening { tag_num: n } if n == tag_num => Ok(()),
            _ => Err(DecodeError::InvalidTag),
        }
    }
}

/// `low_bits` carries the class bit plus either the opening/closing marker or,
/// when `len` is given, the length code computed here.
fn encode_header(
    w: &mut Writer<'_>,
    tag_num: u8,
    low_bits: u8,
    len: Option<u32>,
) -> Result<(), EncodeError> {
    let mut first = if tag_num <= 14 { tag_num << 4 } else { 0xF0 };
    first |= low_bits;
    if let Some(len) = len {
        first |= if len <= 4 { len as u8 } else { EXTENDED_LEN };
    }
    w.write_u8(first)?;

    if tag_num > 14 {
        w.write_u8(tag_num)?;
    }

    match len {
        Some(len) if len > 4 && len <= 253 => w.write_u8(len as u8),
        Some(len) if len > 253 && len <= 65535 => {
            w.write_u8(254)?;
            w.write_be_u16(len as u16)
        }
        Some(len) if len > 65535 => {
            w.write_u8(255)?;
            w.write_be_u32(len)
        }
        _ => Ok(()),
    }
}

fn decode_len(r: &mut Reader<'_>, len_code: u8) -> Result<u32, DecodeError> {
    match len_code {
        0..=4 => Ok(len_code as u32),
        EXTENDED_LEN => match r.read_u8()? {
            254 => Ok(r.read_be_u16()? as u32),
            255 => r.read_be_u32(),
            v => Ok(v as u32),
        },
        _ => Err(DecodeError::InvalidLength),
    }
}

#[cfg(test)]
mod tests {
    use super::{AppTag, Tag};
    use crate::encoding::{reader::Reader, writer::Writer};

    fn roundtrip(tag: Tag) -> Tag {
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        tag.encode(&mut w).unwrap();
        let mut r = Reader::new(w.as_written());
        let out = Tag::decode(&mut r).unwrap();
        assert!(r.is_empty());
        out
    }

    #[test]
    fn roundtrip_application_tag() {
        let t = Tag::Application {
            tag: AppTag::UnsignedInt,
            len: 3,
        };
        assert_eq!(roundtrip(t), t);
    }

    #[test]
    fn roundtrip_extended() {
        let t = Tag::Context {
            tag_num: 30,
            len: 300,
        };
        assert_eq!(roundtrip(t), t);
        let t = Tag::Application {
            tag: AppTag::OctetString,
            len: 70_000,
        };
        assert_eq!(roundtrip(t), t);
    }

    #[test]
    fn opening_and_closing_bytes() {
        let mut buf = [0u8; 4];
        let mut w = Writer::new(&mut buf);
        Tag::Opening { tag_num: 3 }.encode(&mut w).unwrap();
        Tag::Closing { tag_num: 3 }.encode(&mut w).unwrap();
        assert_eq!(w.as_written(), &[0x3E, 0x3F]);

        let mut r = Reader::new(&[0x3E, 0x3F]);
        Tag::expect_opening(&mut r, 3).unwrap();
        assert!(Tag::expect_opening(&mut r, 3).is_err());
    }
}
