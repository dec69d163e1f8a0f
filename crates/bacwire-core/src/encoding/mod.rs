/// Encode/decode helpers for BACnet primitive values and context tags.
pub mod primitives;
/// Bounds-checked byte reader for decoding frames.
pub mod reader;
/// BACnet tag system (application, context, opening/closing).
pub mod tag;
/// Byte writer over a caller-owned buffer, plus a growing `Vec` helper.
pub mod writer;
