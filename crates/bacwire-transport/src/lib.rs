//! Confirmed-request transport for BACnet devices.
//!
//! [`Transport`] owns a background engine that correlates confirmed requests
//! with their replies by invoke id, segments and reassembles oversized APDUs,
//! retries on timeout, and answers the requests of peers through a
//! [`ServiceHandler`]. Discovered peers are cached in a [`DeviceRegistry`].
//!
//! ```no_run
//! use bacwire_core::services::{ReadPropertyRequest, WhoIsRequest};
//! use bacwire_core::types::{ObjectId, PropertyId};
//! use bacwire_datalink::MemoryNetwork;
//! use bacwire_transport::{Transport, TransportConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let network = MemoryNetwork::new();
//! let transport = Transport::start(network.link()?, TransportConfig::new(1))?;
//! transport.send_broadcast(WhoIsRequest::global()).await?;
//! if let Some(peer) = transport.get_remote_device(2).await {
//!     let ack = transport
//!         .send(&peer, ReadPropertyRequest::new(ObjectId::device(2), PropertyId::ObjectName))
//!         .wait()
//!         .await?;
//!     println!("{ack:?}");
//! }
//! transport.terminate().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod engine;
pub mod error;
mod frame;
pub mod handle;
pub mod invoke;
pub mod registry;
pub mod request;
pub mod segmentation;
pub mod server;
pub mod store;
mod transport;

pub use config::TransportConfig;
pub use error::{RequestError, TransportError};
pub use handle::{Outcome, ResultHandle, ServiceAck};
pub use registry::{DeviceEvent, DeviceRegistry, RemoteDevice};
pub use server::{NoServices, ServiceFailure, ServiceHandler};
pub use store::ObjectStore;
pub use transport::Transport;
