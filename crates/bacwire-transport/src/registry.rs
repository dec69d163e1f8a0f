//! Cache of discovered peer devices.
//!
//! Records are owned here and handed out as snapshots; callers change a
//! record only through [`DeviceRegistry::set_cached_property`] and friends.

use bacwire_core::services::IAmRequest;
use bacwire_core::types::{
    DataValue, MaxApdu, ObjectId, PropertyId, Segmentation, ServicesSupported,
};
use bacwire_datalink::DataLinkAddress;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const EVENT_CAPACITY: usize = 64;

/// A peer device as last seen.
///
/// Values in `cached_properties` take precedence over what was learned from
/// I-Am or a capability probe, so caller overrides survive rediscovery.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RemoteDevice {
    instance: u32,
    address: DataLinkAddress,
    max_apdu_length_accepted: Option<u32>,
    segmentation_supported: Option<Segmentation>,
    vendor_id: Option<u32>,
    cached_properties: HashMap<PropertyId, DataValue>,
}

impl RemoteDevice {
    /// A proxy with unknown capabilities.
    pub fn new(instance: u32, address: DataLinkAddress) -> Self {
        Self {
            instance,
            address,
            max_apdu_length_accepted: None,
            segmentation_supported: None,
            vendor_id: None,
            cached_properties: HashMap::new(),
        }
    }

    pub fn with_capabilities(mut self, max_apdu: u32, segmentation: Segmentation) -> Self {
        self.max_apdu_length_accepted = Some(max_apdu);
        self.segmentation_supported = Some(segmentation);
        self
    }

    pub fn with_property(mut self, property: PropertyId, value: DataValue) -> Self {
        self.cached_properties.insert(property, value);
        self
    }

    fn from_i_am(address: DataLinkAddress, i_am: &IAmRequest) -> Self {
        let mut device = Self::new(i_am.device_id.instance(), address)
            .with_capabilities(i_am.max_apdu, i_am.segmentation);
        device.vendor_id = Some(i_am.vendor_id);
        device
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    pub fn object_id(&self) -> ObjectId {
        ObjectId::device(self.instance)
    }

    pub fn address(&self) -> DataLinkAddress {
        self.address
    }

    pub fn vendor_id(&self) -> Option<u32> {
        self.vendor_id
    }

    pub fn max_apdu_length_accepted(&self) -> Option<u32> {
        self.cached_properties
            .get(&PropertyId::MaxApduLengthAccepted)
            .and_then(DataValue::as_unsigned)
            .or(self.max_apdu_length_accepted)
    }

    pub fn segmentation_supported(&self) -> Option<Segmentation> {
        self.cached_properties
            .get(&PropertyId::SegmentationSupported)
            .and_then(DataValue::as_enumerated)
            .and_then(Segmentation::from_u32)
            .or(self.segmentation_supported)
    }

    /// Known only when cached (typically set by the caller).
    pub fn services_supported(&self) -> Option<ServicesSupported> {
        match self.cached_properties.get(&PropertyId::ProtocolServicesSupported) {
            Some(DataValue::BitString(bits)) => Some(ServicesSupported::from(bits.clone())),
            _ => None,
        }
    }

    /// Whether segmentation decisions can be made without asking the device.
    pub fn capabilities_known(&self) -> bool {
        self.max_apdu_length_accepted().is_some() && self.segmentation_supported().is_some()
    }

    /// Largest APDU the device takes, bounded by what the protocol allows.
    pub fn max_apdu(&self) -> Option<MaxApdu> {
        self.max_apdu_length_accepted()
            .map(|octets| MaxApdu::from_octets(octets as usize))
    }

    pub fn cached_property(&self, property: PropertyId) -> Option<&DataValue> {
        self.cached_properties.get(&property)
    }

    pub fn cached_properties(&self) -> impl Iterator<Item = (&PropertyId, &DataValue)> {
        self.cached_properties.iter()
    }
}

/// Registry change notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Discovered(RemoteDevice),
    AddressChanged {
        instance: u32,
        old: DataLinkAddress,
        new: DataLinkAddress,
    },
    Removed(u32),
}

/// Shared, cheaply cloneable device cache keyed by instance number.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<u32, RemoteDevice>>>,
    events: broadcast::Sender<DeviceEvent>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Creates or refreshes the record for an I-Am.
    ///
    /// A new address replaces the old one; cached properties are kept.
    pub async fn upsert_i_am(&self, source: DataLinkAddress, i_am: &IAmRequest) -> RemoteDevice {
        let instance = i_am.device_id.instance();
        let mut devices = self.devices.write().await;
        match devices.get_mut(&instance) {
            Some(existing) => {
                let old = existing.address;
                existing.address = source;
                existing.max_apdu_length_accepted = Some(i_am.max_apdu);
                existing.segmentation_supported = Some(i_am.segmentation);
                existing.vendor_id = Some(i_am.vendor_id);
                if old != source {
                    log::info!("device {instance} moved from {old} to {source}");
                    let _ = self.events.send(DeviceEvent::AddressChanged {
                        instance,
                        old,
                        new: source,
                    });
                }
                existing.clone()
            }
            None => {
                let device = RemoteDevice::from_i_am(source, i_am);
                log::info!("discovered device {instance} at {source}");
                devices.insert(instance, device.clone());
                let _ = self.events.send(DeviceEvent::Discovered(device.clone()));
                device
            }
        }
    }

    /// Adds or replaces a proxy created by the caller.
    pub async fn insert(&self, device: RemoteDevice) {
        let mut devices = self.devices.write().await;
        let event = DeviceEvent::Discovered(device.clone());
        devices.insert(device.instance, device);
        let _ = self.events.send(event);
    }

    pub async fn get(&self, instance: u32) -> Option<RemoteDevice> {
        self.devices.read().await.get(&instance).cloned()
    }

    /// Snapshot of every device, ordered by instance.
    pub async fn all(&self) -> Vec<RemoteDevice> {
        let mut devices: Vec<RemoteDevice> = self.devices.read().await.values().cloned().collect();
        devices.sort_by_key(RemoteDevice::instance);
        devices
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Stores a property value for `instance`. Returns `false` if unknown.
    pub async fn set_cached_property(
        &self,
        instance: u32,
        property: PropertyId,
        value: DataValue,
    ) -> bool {
        match self.devices.write().await.get_mut(&instance) {
            Some(device) => {
                device.cached_properties.insert(property, value);
                true
            }
            None => false,
        }
    }

    pub async fn clear_cached_property(&self, instance: u32, property: PropertyId) -> bool {
        self.devices
            .write()
            .await
            .get_mut(&instance)
            .and_then(|device| device.cached_properties.remove(&property))
            .is_some()
    }

    /// Records capabilities read from the device itself.
    pub async fn learn_capabilities(
        &self,
        instance: u32,
        max_apdu: Option<u32>,
        segmentation: Option<Segmentation>,
    ) -> Option<RemoteDevice> {
        let mut devices = self.devices.write().await;
        let device = devices.get_mut(&instance)?;
        if max_apdu.is_some() {
            device.max_apdu_length_accepted = max_apdu;
        }
        if segmentation.is_some() {
            device.segmentation_supported = segmentation;
        }
        Some(device.clone())
    }

    pub async fn remove(&self, instance: u32) -> Option<RemoteDevice> {
        let removed = self.devices.write().await.remove(&instance);
        if removed.is_some() {
            let _ = self.events.send(DeviceEvent::Removed(instance));
        }
        removed
    }
}
