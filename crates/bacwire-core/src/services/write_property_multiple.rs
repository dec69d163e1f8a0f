use crate::encoding::{
    primitives::{
        decode_ctx_unsigned, decode_optional_ctx_unsigned, decode_unsigned, encode_ctx_object_id,
        encode_ctx_unsigned,
    },
    reader::Reader,
    tag::Tag,
    writer::Writer,
};
use crate::services::value_codec::{decode_property_value, encode_application_data_value};
use crate::types::{DataValue, ObjectId, PropertyId};
use crate::{DecodeError, EncodeError};
use alloc::vec::Vec;

pub const SERVICE_WRITE_PROPERTY_MULTIPLE: u8 = 0x10;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropertyValue {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub value: DataValue,
    pub priority: Option<u8>,
}

impl PropertyValue {
    pub fn new(property_id: PropertyId, value: DataValue) -> Self {
        Self {
            property_id,
            array_index: None,
            value,
            priority: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteAccessSpecification {
    pub object_id: ObjectId,
    pub properties: Vec<PropertyValue>,
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WritePropertyMultipleRequest {
    pub specs: Vec<WriteAccessSpecification>,
}

impl WritePropertyMultipleRequest {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        for spec in &self.specs {
            encode_ctx_object_id(w, 0, spec.object_id.raw())?;
            Tag::Opening { tag_num: 1 }.encode(w)?;

            for prop in &spec.properties {
                encode_ctx_unsigned(w, 0, prop.property_id.to_u32())?;
                if let Some(idx) = prop.array_index {
                    encode_ctx_unsigned(w, 1, idx)?;
                }

                Tag::Opening { tag_num: 2 }.encode(w)?;
                encode_application_data_value(w, &prop.value)?;
                Tag::Closing { tag_num: 2 }.encode(w)?;

                if let Some(priority) = prop.priority {
                    encode_ctx_unsigned(w, 3, priority as u32)?;
                }
            }

            Tag::Closing { tag_num: 1 }.encode(w)?;
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut specs = Vec::new();
        while !r.is_empty() {
            let object_id = ObjectId::from_raw(decode_ctx_unsigned(r, 0)?);
            Tag::expect_opening(r, 1)?;
            let mut properties = Vec::new();
            loop {
                let property_id = match Tag::decode(r)? {
                    Tag::Closing { tag_num: 1 } => break,
                    Tag::Context { tag_num: 0, len } => {
                        PropertyId::from_u32(decode_unsigned(r, len as usize)?)
                    }
                    _ => return Err(DecodeError::InvalidTag),
                };
                let array_index = decode_optional_ctx_unsigned(r, 1)?;
                Tag::expect_opening(r, 2)?;
                let value = decode_property_value(r, 2)?;
                let priority = match decode_optional_ctx_unsigned(r, 3)? {
                    Some(p @ 1..=16) => Some(p as u8),
                    Some(_) => return Err(DecodeError::InvalidValue),
                    None => None,
                };
                properties.push(PropertyValue {
                    property_id,
                    array_index,
                    value,
                    priority,
                });
            }
            specs.push(WriteAccessSpecification {
                object_id,
                properties,
            });
        }
        if specs.is_empty() {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(Self { specs })
    }
}

#[cfg(test)]
mod tests {
    use super::{PropertyValue, WriteAccessSpecification, WritePropertyMultipleRequest};
    use crate::encoding::{reader::Reader, writer::encode_to_vec};
    use crate::types::{DataValue, EngineeringUnits, ObjectId, ObjectType, PropertyId};
    use alloc::vec;

    #[test]
    fn roundtrip_thousand_objects() {
        let specs = (0..1000)
            .map(|i| WriteAccessSpecification {
                object_id: ObjectId::new(ObjectType::AnalogValue, i),
                properties: vec![
                    PropertyValue::new(PropertyId::PresentValue, DataValue::Real(2.28)),
                    PropertyValue::new(
                        PropertyId::Units,
                        DataValue::Enumerated(EngineeringUnits::Btus.to_u32()),
                    ),
                ],
            })
            .collect();
        let req = WritePropertyMultipleRequest { specs };
        let bytes = encode_to_vec(|w| req.encode(w)).unwrap();
        assert!(bytes.len() > 1476 * 10);

        let mut r = Reader::new(&bytes);
        let decoded = WritePropertyMultipleRequest::decode(&mut r).unwrap();
        assert_eq!(decoded.specs.len(), 1000);
        assert_eq!(decoded, req);
    }
}
