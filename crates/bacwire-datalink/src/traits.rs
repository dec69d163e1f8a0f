use crate::DataLinkAddress;
use std::future::Future;
use thiserror::Error;

/// Largest NPDU any link here will hand to [`DataLink::recv`].
pub const MAX_FRAME_LEN: usize = 1600;

/// Errors that can occur at the data-link layer.
#[derive(Debug, Error)]
pub enum DataLinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too large")]
    FrameTooLarge,
    #[error("invalid frame")]
    InvalidFrame,
    #[error("unsupported BVLC function 0x{0:02x}")]
    UnsupportedBvlcFunction(u8),
    #[error("BVLC result code 0x{0:04x}")]
    BvlcResult(u16),
    #[error("bbmd not configured")]
    BbmdNotConfigured,
    #[error("address {0} cannot be reached over this link")]
    UnsupportedAddress(DataLinkAddress),
    #[error("link closed")]
    Closed,
}

/// Sends and receives raw NPDUs.
///
/// The futures are `Send` so a link can be driven from spawned tasks; impls
/// may still be written with `async fn`.
pub trait DataLink: Send + Sync + 'static {
    /// Sends `payload` to the given data-link `address`.
    fn send(
        &self,
        address: DataLinkAddress,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), DataLinkError>> + Send;

    /// Receives a frame into `buf`, returning `(bytes_read, source_address)`.
    fn recv(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, DataLinkAddress), DataLinkError>> + Send;

    /// Address that reaches every device on the local network.
    fn broadcast_address(&self) -> DataLinkAddress;
}
