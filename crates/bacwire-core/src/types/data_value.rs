use crate::types::{BitString, Date, ObjectId, Time};
use alloc::string::String;
use alloc::vec::Vec;

/// An application-tagged BACnet value.
///
/// `List` holds a property value made of several application values in a row,
/// such as an `object-list`. `Constructed` holds a context-tagged block.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataValue {
    Null,
    Boolean(bool),
    Unsigned(u32),
    Signed(i32),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(String),
    BitString(BitString),
    Enumerated(u32),
    Date(Date),
    Time(Time),
    ObjectId(ObjectId),
    List(Vec<DataValue>),
    Constructed { tag_num: u8, values: Vec<DataValue> },
}

impl DataValue {
    pub fn as_unsigned(&self) -> Option<u32> {
        match self {
            Self::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_enumerated(&self) -> Option<u32> {
        match self {
            Self::Enumerated(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f32> {
        match self {
            Self::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Object identifiers held by this value, whether it is a single id or a list.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        match self {
            Self::ObjectId(id) => alloc::vec![*id],
            Self::List(items) => items
                .iter()
                .filter_map(|v| match v {
                    Self::ObjectId(id) => Some(*id),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl From<f32> for DataValue {
    fn from(value: f32) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        Self::CharacterString(value.into())
    }
}

impl From<ObjectId> for DataValue {
    fn from(value: ObjectId) -> Self {
        Self::ObjectId(value)
    }
}
