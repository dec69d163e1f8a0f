//! An in-memory object database that answers property services.
//!
//! [`ObjectStore`] implements [`ServiceHandler`] for ReadProperty,
//! WriteProperty, ReadPropertyMultiple and WritePropertyMultiple. The device
//! object's capability properties are computed from the transport
//! configuration rather than stored.

use crate::config::TransportConfig;
use crate::handle::ServiceAck;
use crate::server::{ServiceFailure, ServiceHandler};
use bacwire_core::services::{
    ComplexAck, ConfirmedRequest, ReadAccessResult, ReadPropertyAck, ReadPropertyMultipleAck,
    ReadPropertyMultipleRequest, ReadResult, ReadResultElement, WritePropertyMultipleRequest,
    SERVICE_I_AM, SERVICE_READ_PROPERTY, SERVICE_READ_PROPERTY_MULTIPLE, SERVICE_WHO_IS,
    SERVICE_WRITE_PROPERTY, SERVICE_WRITE_PROPERTY_MULTIPLE,
};
use bacwire_core::types::{
    BitString, DataValue, EngineeringUnits, ErrorClass, ErrorCode, EventState, ObjectId,
    ObjectType, PropertyId, Segmentation, ServicesSupported,
};
use bacwire_datalink::DataLinkAddress;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Properties = BTreeMap<PropertyId, DataValue>;

const VENDOR_NAME: &str = "bacwire";

/// Properties the device object computes on every read.
const DERIVED: [PropertyId; 5] = [
    PropertyId::ObjectList,
    PropertyId::SegmentationSupported,
    PropertyId::MaxApduLengthAccepted,
    PropertyId::ProtocolServicesSupported,
    PropertyId::VendorIdentifier,
];

fn unknown_object() -> ServiceFailure {
    ServiceFailure::error(ErrorClass::Object, ErrorCode::UnknownObject)
}

fn unknown_property() -> ServiceFailure {
    ServiceFailure::error(ErrorClass::Property, ErrorCode::UnknownProperty)
}

fn invalid_array_index() -> ServiceFailure {
    ServiceFailure::error(ErrorClass::Property, ErrorCode::InvalidArrayIndex)
}

fn write_access_denied() -> ServiceFailure {
    ServiceFailure::error(ErrorClass::Property, ErrorCode::WriteAccessDenied)
}

/// Picks element `index` out of an array value; index 0 is the length.
fn array_element(value: DataValue, index: u32) -> Result<DataValue, ServiceFailure> {
    let DataValue::List(items) = value else {
        return Err(invalid_array_index());
    };
    match index {
        0 => Ok(DataValue::Unsigned(items.len() as u32)),
        i => items
            .into_iter()
            .nth(i as usize - 1)
            .ok_or_else(invalid_array_index),
    }
}

/// Typical analog-value properties around `present_value`.
pub fn analog_value_properties(present_value: f32) -> Vec<(PropertyId, DataValue)> {
    vec![
        (PropertyId::PresentValue, DataValue::Real(present_value)),
        (
            PropertyId::Units,
            DataValue::Enumerated(EngineeringUnits::NoUnits.to_u32()),
        ),
        (PropertyId::OutOfService, DataValue::Boolean(false)),
        (
            PropertyId::EventState,
            DataValue::Enumerated(EventState::Normal.to_u32()),
        ),
        (PropertyId::StatusFlags, DataValue::BitString(BitString::with_len(4))),
    ]
}

/// Objects and their properties, keyed by identifier.
#[derive(Debug)]
pub struct ObjectStore {
    device_id: ObjectId,
    max_apdu: u32,
    segmentation: Segmentation,
    vendor_id: u32,
    objects: RwLock<BTreeMap<ObjectId, Properties>>,
}

impl ObjectStore {
    /// A store holding only the device object described by `config`.
    pub fn new(config: &TransportConfig) -> Self {
        let device_id = config.device_id();
        let device: Properties = [
            (PropertyId::ObjectIdentifier, DataValue::ObjectId(device_id)),
            (
                PropertyId::ObjectName,
                DataValue::from(format!("bacwire-{}", config.device_instance).as_str()),
            ),
            (
                PropertyId::ObjectType,
                DataValue::Enumerated(u32::from(ObjectType::Device.to_u16())),
            ),
            (PropertyId::VendorName, DataValue::from(VENDOR_NAME)),
        ]
        .into_iter()
        .collect();
        Self {
            device_id,
            max_apdu: config.max_apdu.octets() as u32,
            segmentation: config.segmentation,
            vendor_id: u32::from(config.vendor_id),
            objects: RwLock::new(BTreeMap::from([(device_id, device)])),
        }
    }

    pub fn device_id(&self) -> ObjectId {
        self.device_id
    }

    fn objects(&self) -> RwLockReadGuard<'_, BTreeMap<ObjectId, Properties>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn objects_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<ObjectId, Properties>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces an object. Its identifier and type are filled in.
    pub fn add_object(
        &self,
        object_id: ObjectId,
        properties: impl IntoIterator<Item = (PropertyId, DataValue)>,
    ) {
        let mut props: Properties = properties.into_iter().collect();
        props.insert(PropertyId::ObjectIdentifier, DataValue::ObjectId(object_id));
        props.insert(
            PropertyId::ObjectType,
            DataValue::Enumerated(u32::from(object_id.object_type().to_u16())),
        );
        props
            .entry(PropertyId::ObjectName)
            .or_insert_with(|| {
                DataValue::from(
                    format!("{:?}-{}", object_id.object_type(), object_id.instance()).as_str(),
                )
            });
        self.objects_mut().insert(object_id, props);
    }

    pub fn remove_object(&self, object_id: ObjectId) -> bool {
        object_id != self.device_id && self.objects_mut().remove(&object_id).is_some()
    }

    /// Every object, the device first.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let objects = self.objects();
        std::iter::once(self.device_id)
            .chain(objects.keys().copied().filter(|id| *id != self.device_id))
            .collect()
    }

    fn services_supported() -> ServicesSupported {
        ServicesSupported::none()
            .with_confirmed(SERVICE_READ_PROPERTY)
            .with_confirmed(SERVICE_WRITE_PROPERTY)
            .with_confirmed(SERVICE_READ_PROPERTY_MULTIPLE)
            .with_confirmed(SERVICE_WRITE_PROPERTY_MULTIPLE)
            .with_unconfirmed(SERVICE_WHO_IS)
            .with_unconfirmed(SERVICE_I_AM)
    }

    fn derived(&self, property_id: PropertyId) -> Option<DataValue> {
        let value = match property_id {
            PropertyId::ObjectList => DataValue::List(
                self.object_ids()
                    .into_iter()
                    .map(DataValue::ObjectId)
                    .collect(),
            ),
            PropertyId::SegmentationSupported => {
                DataValue::Enumerated(self.segmentation.to_u32())
            }
            PropertyId::MaxApduLengthAccepted => DataValue::Unsigned(self.max_apdu),
            PropertyId::ProtocolServicesSupported => {
                DataValue::BitString(Self::services_supported().as_bit_string().clone())
            }
            PropertyId::VendorIdentifier => DataValue::Unsigned(self.vendor_id),
            _ => return None,
        };
        Some(value)
    }

    /// Reads one property, or one element of an array property.
    pub fn read(
        &self,
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
    ) -> Result<DataValue, ServiceFailure> {
        let derived = if object_id == self.device_id {
            self.derived(property_id)
        } else {
            None
        };
        let value = match derived {
            Some(value) => value,
            None => self
                .objects()
                .get(&object_id)
                .ok_or_else(unknown_object)?
                .get(&property_id)
                .cloned()
                .ok_or_else(unknown_property)?,
        };
        match array_index {
            Some(index) => array_element(value, index),
            None => Ok(value),
        }
    }

    /// Replaces a property value. The new value must have the stored type.
    pub fn write(
        &self,
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
        value: DataValue,
    ) -> Result<(), ServiceFailure> {
        let mut objects = self.objects_mut();
        let props = objects.get_mut(&object_id).ok_or_else(unknown_object)?;
        if matches!(
            property_id,
            PropertyId::ObjectIdentifier | PropertyId::ObjectType
        ) || (object_id == self.device_id && DERIVED.contains(&property_id))
        {
            return Err(write_access_denied());
        }
        let current = props.get_mut(&property_id).ok_or_else(unknown_property)?;
        let slot = match array_index {
            None => current,
            Some(0) => return Err(write_access_denied()),
            Some(index) => match current {
                DataValue::List(items) => items
                    .get_mut(index as usize - 1)
                    .ok_or_else(invalid_array_index)?,
                _ => return Err(invalid_array_index()),
            },
        };
        if std::mem::discriminant(slot) != std::mem::discriminant(&value) {
            return Err(ServiceFailure::error(
                ErrorClass::Property,
                ErrorCode::InvalidDataType,
            ));
        }
        *slot = value;
        Ok(())
    }

    fn read_multiple(&self, request: &ReadPropertyMultipleRequest) -> ReadPropertyMultipleAck {
        let results = request
            .specs
            .iter()
            .map(|spec| ReadAccessResult {
                object_id: spec.object_id,
                results: spec
                    .properties
                    .iter()
                    .map(|reference| ReadResultElement {
                        property_id: reference.property_id,
                        array_index: reference.array_index,
                        result: match self.read(
                            spec.object_id,
                            reference.property_id,
                            reference.array_index,
                        ) {
                            Ok(value) => ReadResult::Value(value),
                            Err(ServiceFailure::Error {
                                error_class,
                                error_code,
                            }) => ReadResult::Error {
                                error_class,
                                error_code,
                            },
                            Err(_) => ReadResult::Error {
                                error_class: ErrorClass::Services,
                                error_code: ErrorCode::Other,
                            },
                        },
                    })
                    .collect(),
            })
            .collect();
        ReadPropertyMultipleAck { results }
    }

    /// Applies writes in order and stops at the first failure; earlier
    /// writes stay applied.
    fn write_multiple(&self, request: WritePropertyMultipleRequest) -> Result<(), ServiceFailure> {
        for spec in request.specs {
            for property in spec.properties {
                self.write(
                    spec.object_id,
                    property.property_id,
                    property.array_index,
                    property.value,
                )?;
            }
        }
        Ok(())
    }
}

impl ServiceHandler for ObjectStore {
    fn confirmed(
        &self,
        source: &DataLinkAddress,
        request: ConfirmedRequest,
    ) -> Result<ServiceAck, ServiceFailure> {
        log::trace!(
            "serving service {} for {source}",
            request.service_choice()
        );
        match request {
            ConfirmedRequest::ReadProperty(req) => {
                let value = self.read(req.object_id, req.property_id, req.array_index)?;
                Ok(ServiceAck::Complex(ComplexAck::ReadProperty(
                    ReadPropertyAck {
                        object_id: req.object_id,
                        property_id: req.property_id,
                        array_index: req.array_index,
                        value,
                    },
                )))
            }
            ConfirmedRequest::WriteProperty(req) => {
                self.write(req.object_id, req.property_id, req.array_index, req.value)?;
                Ok(ServiceAck::Simple)
            }
            ConfirmedRequest::ReadPropertyMultiple(req) => Ok(ServiceAck::Complex(
                ComplexAck::ReadPropertyMultiple(self.read_multiple(&req)),
            )),
            ConfirmedRequest::WritePropertyMultiple(req) => {
                self.write_multiple(req)?;
                Ok(ServiceAck::Simple)
            }
        }
    }
}
