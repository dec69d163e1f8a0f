//! Frame transport for bacwire.
//!
//! A [`DataLink`] moves whole NPDUs to and from a [`DataLinkAddress`]. Two
//! links ship here: [`BacnetIpTransport`] (BACnet/IP over UDP) and
//! [`MemoryNetwork`], an in-process hub used by tests and simulations.

pub mod address;
pub mod bip;
pub mod memory;
pub mod traits;

pub use address::{DataLinkAddress, MacAddress};
pub use bip::transport::BacnetIpTransport;
pub use memory::{DropFilter, MemoryLink, MemoryNetwork};
pub use traits::{DataLink, DataLinkError, MAX_FRAME_LEN};
