//! Shared argument handling for the bacwire command-line tools.

use bacwire_core::services::WhoIsRequest;
use bacwire_core::types::{ObjectType, PropertyId};
use bacwire_datalink::{BacnetIpTransport, DataLinkAddress};
use bacwire_transport::{
    NoServices, RemoteDevice, ServiceHandler, Transport, TransportConfig, TransportError,
};
use clap::{Args, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Options every tool takes for its own BACnet/IP endpoint.
#[derive(Args, Debug, Clone)]
pub struct LocalArgs {
    /// Local socket to bind.
    #[arg(long, default_value = "0.0.0.0:0")]
    pub bind: SocketAddr,
    /// Device instance this tool presents itself as.
    #[arg(long, default_value_t = 4_194_302)]
    pub local_instance: u32,
    /// Register as a foreign device with this BBMD.
    #[arg(long)]
    pub bbmd: Option<SocketAddr>,
    #[arg(long, default_value_t = 60)]
    pub foreign_ttl: u16,
    #[arg(long, default_value_t = 3)]
    pub timeout_secs: u64,
    #[arg(long, default_value_t = 2)]
    pub retries: u8,
}

impl LocalArgs {
    pub fn config(&self) -> TransportConfig {
        TransportConfig::new(self.local_instance)
            .with_apdu_timeout(Duration::from_secs(self.timeout_secs.max(1)))
            .with_retries(self.retries)
    }

    pub async fn start(&self) -> Result<Transport, TransportError> {
        self.start_with_handler(self.config(), Arc::new(NoServices))
            .await
    }

    pub async fn start_with_handler(
        &self,
        config: TransportConfig,
        handler: Arc<dyn ServiceHandler>,
    ) -> Result<Transport, TransportError> {
        let link = match self.bbmd {
            Some(bbmd) => {
                let link = BacnetIpTransport::bind_foreign(self.bind, bbmd).await?;
                link.register_foreign_device(self.foreign_ttl).await?;
                link
            }
            None => BacnetIpTransport::bind(self.bind).await?,
        };
        Transport::start_with_handler(link, config, handler)
    }
}

/// Which device a tool talks to.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Device instance of the target.
    #[arg(long)]
    pub device: u32,
    /// Skip discovery and address the device directly.
    #[arg(long)]
    pub ip: Option<IpAddr>,
    #[arg(long, default_value_t = DataLinkAddress::BACNET_IP_DEFAULT_PORT)]
    pub port: u16,
}

impl TargetArgs {
    /// Looks the device up with a Who-Is unless an address was given.
    pub async fn resolve(
        &self,
        transport: &Transport,
        wait: Duration,
    ) -> Result<Option<RemoteDevice>, TransportError> {
        if let Some(ip) = self.ip {
            let device = RemoteDevice::new(self.device, DataLinkAddress::Ip((ip, self.port).into()));
            transport.devices().insert(device.clone()).await;
            return Ok(Some(device));
        }
        let found = transport
            .discover(WhoIsRequest::range(self.device, self.device), wait)
            .await?;
        Ok(found.into_iter().next())
    }
}

/// CLI-friendly names for [`ObjectType`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ObjectTypeArg {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    Device,
    MultiStateInput,
    MultiStateOutput,
    MultiStateValue,
}

impl ObjectTypeArg {
    pub const fn into_object_type(self) -> ObjectType {
        match self {
            Self::AnalogInput => ObjectType::AnalogInput,
            Self::AnalogOutput => ObjectType::AnalogOutput,
            Self::AnalogValue => ObjectType::AnalogValue,
            Self::BinaryInput => ObjectType::BinaryInput,
            Self::BinaryOutput => ObjectType::BinaryOutput,
            Self::BinaryValue => ObjectType::BinaryValue,
            Self::Device => ObjectType::Device,
            Self::MultiStateInput => ObjectType::MultiStateInput,
            Self::MultiStateOutput => ObjectType::MultiStateOutput,
            Self::MultiStateValue => ObjectType::MultiStateValue,
        }
    }
}

/// CLI-friendly names for the properties the tools read and write.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PropertyArg {
    Description,
    EventState,
    MaxApduLengthAccepted,
    ObjectList,
    ObjectName,
    OutOfService,
    PresentValue,
    ProtocolServicesSupported,
    SegmentationSupported,
    StatusFlags,
    Units,
    VendorIdentifier,
    VendorName,
}

impl PropertyArg {
    pub const fn into_property_id(self) -> PropertyId {
        match self {
            Self::Description => PropertyId::Description,
            Self::EventState => PropertyId::EventState,
            Self::MaxApduLengthAccepted => PropertyId::MaxApduLengthAccepted,
            Self::ObjectList => PropertyId::ObjectList,
            Self::ObjectName => PropertyId::ObjectName,
            Self::OutOfService => PropertyId::OutOfService,
            Self::PresentValue => PropertyId::PresentValue,
            Self::ProtocolServicesSupported => PropertyId::ProtocolServicesSupported,
            Self::SegmentationSupported => PropertyId::SegmentationSupported,
            Self::StatusFlags => PropertyId::StatusFlags,
            Self::Units => PropertyId::Units,
            Self::VendorIdentifier => PropertyId::VendorIdentifier,
            Self::VendorName => PropertyId::VendorName,
        }
    }
}
