use crate::encoding::{
    primitives::{
        decode_app_enumerated, decode_ctx_unsigned, decode_optional_ctx_unsigned, decode_unsigned,
        encode_app_enumerated, encode_ctx_object_id, encode_ctx_unsigned,
    },
    reader::Reader,
    tag::Tag,
    writer::Writer,
};
use crate::services::value_codec::{decode_property_value, encode_application_data_value};
use crate::types::{DataValue, ErrorClass, ErrorCode, ObjectId, PropertyId};
use crate::{DecodeError, EncodeError};
use alloc::vec::Vec;

pub const SERVICE_READ_PROPERTY_MULTIPLE: u8 = 0x0E;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropertyReference {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
}

impl From<PropertyId> for PropertyReference {
    fn from(property_id: PropertyId) -> Self {
        Self {
            property_id,
            array_index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadAccessSpecification {
    pub object_id: ObjectId,
    pub properties: Vec<PropertyReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadPropertyMultipleRequest {
    pub specs: Vec<ReadAccessSpecification>,
}

impl ReadPropertyMultipleRequest {
    /// One object, several properties.
    pub fn single(object_id: ObjectId, properties: &[PropertyId]) -> Self {
        Self {
            specs: alloc::vec![ReadAccessSpecification {
                object_id,
                properties: properties.iter().copied().map(Into::into).collect(),
            }],
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        for spec in &self.specs {
            encode_ctx_object_id(w, 0, spec.object_id.raw())?;
            Tag::Opening { tag_num: 1 }.encode(w)?;
            for prop in &spec.properties {
                encode_ctx_unsigned(w, 0, prop.property_id.to_u32())?;
                if let Some(idx) = prop.array_index {
                    encode_ctx_unsigned(w, 1, idx)?;
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
                match Tag::decode(r)? {
                    Tag::Closing { tag_num: 1 } => break,
                    Tag::Context { tag_num: 0, len } => {
                        let property_id = PropertyId::from_u32(decode_unsigned(r, len as usize)?);
                        let array_index = decode_optional_ctx_unsigned(r, 1)?;
                        properties.push(PropertyReference {
                            property_id,
                            array_index,
                        });
                    }
                    _ => return Err(DecodeError::InvalidTag),
                }
            }
            specs.push(ReadAccessSpecification {
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

/// Outcome of reading one property: its value, or the access error the
/// responder put in its place.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReadResult {
    Value(DataValue),
    Error {
        error_class: ErrorClass,
        error_code: ErrorCode,
    },
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadResultElement {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub result: ReadResult,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadAccessResult {
    pub object_id: ObjectId,
    pub results: Vec<ReadResultElement>,
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadPropertyMultipleAck {
    pub results: Vec<ReadAccessResult>,
}

impl ReadPropertyMultipleAck {
    /// First value read for `property_id` on `object_id`, skipping access errors.
    pub fn value(&self, object_id: ObjectId, property_id: PropertyId) -> Option<&DataValue> {
        self.results
            .iter()
            .filter(|r| r.object_id == object_id)
            .flat_map(|r| r.results.iter())
            .find(|e| e.property_id == property_id)
            .and_then(|e| match &e.result {
                ReadResult::Value(v) => Some(v),
                ReadResult::Error { .. } => None,
            })
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        for access in &self.results {
            encode_ctx_object_id(w, 0, access.object_id.raw())?;
            Tag::Opening { tag_num: 1 }.encode(w)?;
            for element in &access.results {
                encode_ctx_unsigned(w, 2, element.property_id.to_u32())?;
                if let Some(idx) = element.array_index {
                    encode_ctx_unsigned(w, 3, idx)?;
                }
                match &element.result {
                    ReadResult::Value(value) => {
                        Tag::Opening { tag_num: 4 }.encode(w)?;
                        encode_application_data_value(w, value)?;
                        Tag::Closing { tag_num: 4 }.encode(w)?;
                    }
                    ReadResult::Error {
                        error_class,
                        error_code,
                    } => {
                        Tag::Opening { tag_num: 5 }.encode(w)?;
                        encode_app_enumerated(w, error_class.to_u32())?;
                        encode_app_enumerated(w, error_code.to_u32())?;
                        Tag::Closing { tag_num: 5 }.encode(w)?;
                    }
                }
            }
            Tag::Closing { tag_num: 1 }.encode(w)?;
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut results = Vec::new();
        while !r.is_empty() {
            let object_id = ObjectId::from_raw(decode_ctx_unsigned(r, 0)?);
            Tag::expect_opening(r, 1)?;

            let mut elements = Vec::new();
            loop {
                let property_id = match Tag::decode(r)? {
                    Tag::Closing { tag_num: 1 } => break,
                    Tag::Context { tag_num: 2, len } => {
                        PropertyId::from_u32(decode_unsigned(r, len as usize)?)
                    }
                    _ => return Err(DecodeError::InvalidTag),
                };
                let array_index = decode_optional_ctx_unsigned(r, 3)?;

                let result = match Tag::decode(r)? {
                    Tag::Opening { tag_num: 4 } => ReadResult::Value(decode_property_value(r, 4)?),
                    Tag::Opening { tag_num: 5 } => {
                        let class = decode_app_enumerated(r)?;
                        let code = decode_app_enumerated(r)?;
                        Tag::expect_closing(r, 5)?;
                        ReadResult::Error {
                            error_class: ErrorClass::from_u32(class),
                            error_code: ErrorCode::from_u32(code),
                        }
                    }
                    _ => return Err(DecodeError::InvalidTag),
                };

                elements.push(ReadResultElement {
                    property_id,
                    array_index,
                    result,
                });
            }

            results.push(ReadAccessResult {
                object_id,
                results: elements,
            });
        }
        Ok(Self { results })
    }
}
