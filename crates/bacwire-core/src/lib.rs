//! BACnet protocol framing and service codecs.
//!
//! `bacwire-core` encodes and decodes the NPDU and APDU headers, the
//! segmentation fields carried by confirmed requests and complex acks, and the
//! small set of service payloads the bacwire transport speaks: Who-Is, I-Am,
//! ReadProperty, WriteProperty, ReadPropertyMultiple and WritePropertyMultiple.
//!
//! The crate is `no_std` with `alloc`; service payloads own their data so they
//! can be moved between tasks.
//!
//! # Feature flags
//!
//! - **`std`** (default): enables `std::error::Error` implementations.
//! - **`serde`**: derives `Serialize`/`Deserialize` on core types.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

/// APDU headers for every PDU type, plus reject and abort reasons.
pub mod apdu;
/// Binary encoding primitives, tag system, and reader/writer.
pub mod encoding;
/// Error types for encoding and decoding operations.
pub mod error;
/// NPDU (Network Protocol Data Unit) encoding and decoding.
pub mod npdu;
/// Service payload codecs and the closed request/ack unions.
pub mod services;
/// Object identifiers, property identifiers, data values and device capabilities.
pub mod types;

pub use error::{DecodeError, EncodeError};
