/// BACnet Virtual Link Control header codec.
pub mod bvlc;
/// UDP transport speaking BVLC framing.
pub mod transport;
