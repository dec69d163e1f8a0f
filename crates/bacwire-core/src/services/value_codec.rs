use crate::encoding::{
    primitives::{decode_signed, decode_unsigned, encode_app_signed, encode_app_unsigned_like},
    reader::Reader,
    tag::{AppTag, Tag},
    writer::Writer,
};
use crate::types::{BitString, DataValue, Date, ObjectId, Time};
use crate::{DecodeError, EncodeError};
use alloc::string::String;
use alloc::vec::Vec;

fn u32_len(len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::ValueOutOfRange)
}

pub fn encode_application_data_value(
    w: &mut Writer<'_>,
    value: &DataValue,
) -> Result<(), EncodeError> {
    match value {
        DataValue::Null => Tag::Application {
            tag: AppTag::Null,
            len: 0,
        }
        .encode(w),
        DataValue::Boolean(v) => Tag::Application {
            tag: AppTag::Boolean,
            len: u32::from(*v),
        }
        .encode(w),
        DataValue::Unsigned(v) => encode_app_unsigned_like(w, AppTag::UnsignedInt, *v),
        DataValue::Signed(v) => encode_app_signed(w, *v),
        DataValue::Real(v) => {
            Tag::Application {
                tag: AppTag::Real,
                len: 4,
            }
            .encode(w)?;
            w.write_all(&v.to_bits().to_be_bytes())
        }
        DataValue::Double(v) => {
            Tag::Application {
                tag: AppTag::Double,
                len: 8,
            }
            .encode(w)?;
            w.write_all(&v.to_bits().to_be_bytes())
        }
        DataValue::OctetString(v) => {
            Tag::Application {
                tag: AppTag::OctetString,
                len: u32_len(v.len())?,
            }
            .encode(w)?;
            w.write_all(v)
        }
        DataValue::CharacterString(v) => {
            let bytes = v.as_bytes();
            Tag::Application {
                tag: AppTag::CharacterString,
                len: u32_len(bytes.len().saturating_add(1))?,
            }
            .encode(w)?;
            // character set 0: UTF-8
            w.write_u8(0)?;
            w.write_all(bytes)
        }
        DataValue::BitString(v) => {
            if v.unused_bits > 7 {
                return Err(EncodeError::ValueOutOfRange);
            }
            Tag::Application {
                tag: AppTag::BitString,
                len: u32_len(v.data.len().saturating_add(1))?,
            }
            .encode(w)?;
            w.write_u8(v.unused_bits)?;
            w.write_all(&v.data)
        }
        DataValue::Enumerated(v) => encode_app_unsigned_like(w, AppTag::Enumerated, *v),
        DataValue::Date(v) => {
            Tag::Application {
                tag: AppTag::Date,
                len: 4,
            }
            .encode(w)?;
            w.write_all(&[v.year_since_1900, v.month, v.day, v.weekday])
        }
        DataValue::Time(v) => {
            Tag::Application {
                tag: AppTag::Time,
                len: 4,
            }
            .encode(w)?;
            w.write_all(&[v.hour, v.minute, v.second, v.hundredths])
        }
        DataValue::ObjectId(v) => {
            Tag::Application {
                tag: AppTag::ObjectId,
                len: 4,
            }
            .encode(w)?;
            w.write_be_u32(v.raw())
        }
        DataValue::List(values) => {
            for child in values {
                encode_application_data_value(w, child)?;
            }
            Ok(())
        }
        DataValue::Constructed { tag_num, values } => {
            Tag::Opening { tag_num: *tag_num }.encode(w)?;
            for child in values {
                encode_application_data_value(w, child)?;
            }
            Tag::Closing { tag_num: *tag_num }.encode(w)
        }
    }
}

pub fn decode_application_data_value(r: &mut Reader<'_>) -> Result<DataValue, DecodeError> {
    let tag = Tag::decode(r)?;
    decode_application_data_value_from_tag(r, tag)
}

/// Decodes every value up to (and including) the closing tag `closing_tag_num`.
///
/// One value decodes as itself; zero or several become a [`DataValue::List`].
pub fn decode_property_value(
    r: &mut Reader<'_>,
    closing_tag_num: u8,
) -> Result<DataValue, DecodeError> {
    let mut values = Vec::new();
    loop {
        let tag = Tag::decode(r)?;
        if tag == (Tag::Closing {
            tag_num: closing_tag_num,
        }) {
            break;
        }
        values.push(decode_application_data_value_from_tag(r, tag)?);
    }
    if values.len() == 1 {
        Ok(values.remove(0))
    } else {
        Ok(DataValue::List(values))
    }
}

pub fn decode_application_data_value_from_tag(
    r: &mut Reader<'_>,
    tag: Tag,
) -> Result<DataValue, DecodeError> {
    let (app, len) = match tag {
        Tag::Application { tag, len } => (tag, len as usize),
        Tag::Opening { tag_num } => {
            let mut children = Vec::new();
            loop {
                let child_tag = Tag::decode(r)?;
                if child_tag == (Tag::Closing { tag_num }) {
                    break;
                }
                children.push(decode_application_data_value_from_tag(r, child_tag)?);
            }
            return Ok(DataValue::Constructed {
                tag_num,
                values: children,
            });
        }
        _ => return Err(DecodeError::Unsupported),
    };

    match (app, len) {
        (AppTag::Null, _) => Ok(DataValue::Null),
        (AppTag::Boolean, len) => Ok(DataValue::Boolean(len != 0)),
        (AppTag::UnsignedInt, len) => Ok(DataValue::Unsigned(decode_unsigned(r, len)?)),
        (AppTag::SignedInt, len) => Ok(DataValue::Signed(decode_signed(r, len)?)),
        (AppTag::Real, 4) => Ok(DataValue::Real(f32::from_bits(r.read_be_u32()?))),
        (AppTag::Double, 8) => {
            let hi = r.read_be_u32()? as u64;
            let lo = r.read_be_u32()? as u64;
            Ok(DataValue::Double(f64::from_bits((hi << 32) | lo)))
        }
        (AppTag::OctetString, len) => Ok(DataValue::OctetString(r.read_exact(len)?.to_vec())),
        (AppTag::CharacterString, len) => {
            if len == 0 {
                return Err(DecodeError::InvalidLength);
            }
            let raw = r.read_exact(len)?;
            if raw[0] != 0 {
                return Err(DecodeError::Unsupported);
            }
            let s = core::str::from_utf8(&raw[1..]).map_err(|_| DecodeError::InvalidValue)?;
            Ok(DataValue::CharacterString(String::from(s)))
        }
        (AppTag::BitString, len) => {
            if len == 0 {
                return Err(DecodeError::InvalidLength);
            }
            let raw = r.read_exact(len)?;
            if raw[0] > 7 {
                return Err(DecodeError::InvalidValue);
            }
            Ok(DataValue::BitString(BitString::new(raw[0], raw[1..].to_vec())))
        }
        (AppTag::Enumerated, len) => Ok(DataValue::Enumerated(decode_unsigned(r, len)?)),
        (AppTag::Date, 4) => {
            let b = r.read_exact(4)?;
            Ok(DataValue::Date(Date {
                year_since_1900: b[0],
                month: b[1],
                day: b[2],
                weekday: b[3],
            }))
        }
        (AppTag::Time, 4) => {
            let b = r.read_exact(4)?;
            Ok(DataValue::Time(Time {
                hour: b[0],
                minute: b[1],
                second: b[2],
                hundredths: b[3],
            }))
        }
        (AppTag::ObjectId, 4) => Ok(DataValue::ObjectId(ObjectId::from_raw(r.read_be_u32()?))),
        _ => Err(DecodeError::InvalidLength),
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_application_data_value, decode_property_value, encode_application_data_value};
    use crate::encoding::{reader::Reader, tag::Tag, writer::Writer};
    use crate::types::{BitString, DataValue, Date, ObjectId, ObjectType, Time};
    use alloc::vec;

    #[test]
    fn value_codec_roundtrip_supported_types() {
        let values = [
            DataValue::Null,
            DataValue::Boolean(true),
            DataValue::Unsigned(123),
            DataValue::Signed(-123),
            DataValue::Real(12.5),
            DataValue::Double(42.25),
            DataValue::OctetString(vec![1, 2, 3]),
            DataValue::from("hello"),
            DataValue::BitString(BitString::new(1, vec![0b1010_0000])),
            DataValue::Enumerated(9),
            DataValue::Date(Date {
                year_since_1900: 124,
                month: 2,
                day: 3,
                weekday: 6,
            }),
            DataValue::Time(Time {
                hour: 1,
                minute: 2,
                second: 3,
                hundredths: 4,
            }),
            DataValue::ObjectId(ObjectId::new(ObjectType::Device, 1)),
        ];

        for v in values {
            let mut buf = [0u8; 64];
            let mut w = Writer::new(&mut buf);
            encode_application_data_value(&mut w, &v).unwrap();
            let mut r = Reader::new(w.as_written());
            assert_eq!(decode_application_data_value(&mut r).unwrap(), v);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn property_value_collects_lists() {
        let list = DataValue::List(vec![
            DataValue::ObjectId(ObjectId::device(2)),
            DataValue::ObjectId(ObjectId::new(ObjectType::AnalogValue, 0)),
        ]);
        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        Tag::Opening { tag_num: 3 }.encode(&mut w).unwrap();
        encode_application_data_value(&mut w, &list).unwrap();
        Tag::Closing { tag_num: 3 }.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        Tag::expect_opening(&mut r, 3).unwrap();
        let got = decode_property_value(&mut r, 3).unwrap();
        assert_eq!(got, list);
        assert_eq!(got.object_ids().len(), 2);
    }

    #[test]
    fn constructed_roundtrip() {
        let value = DataValue::Constructed {
            tag_num: 2,
            values: vec![
                DataValue::Unsigned(42),
                DataValue::Constructed {
                    tag_num: 0,
                    values: vec![DataValue::Boolean(true), DataValue::Real(3.5)],
                },
            ],
        };

        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        encode_application_data_value(&mut w, &value).unwrap();
        let mut r = Reader::new(w.as_written());
        assert_eq!(decode_application_data_value(&mut r).unwrap(), value);
    }
}
