use crate::bip::bvlc::{BvlcFunction, BvlcHeader, BVLC_HEADER_LEN};
use crate::{DataLink, DataLinkAddress, DataLinkError, MAX_FRAME_LEN};
use bacwire_core::encoding::{reader::Reader, writer::Writer};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;

/// BACnet/IP over a single UDP socket.
///
/// When a BBMD is configured the link behaves as a foreign device:
/// broadcasts go to the BBMD as Distribute-Broadcast-To-Network.
#[derive(Debug, Clone)]
pub struct BacnetIpTransport {
    socket: Arc<UdpSocket>,
    bbmd: Option<SocketAddr>,
    broadcast_port: u16,
}

impl BacnetIpTransport {
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, DataLinkError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket: Arc::new(socket),
            bbmd: None,
            broadcast_port: DataLinkAddress::BACNET_IP_DEFAULT_PORT,
        })
    }

    pub async fn bind_foreign(
        bind_addr: SocketAddr,
        bbmd_addr: SocketAddr,
    ) -> Result<Self, DataLinkError> {
        let mut transport = Self::bind(bind_addr).await?;
        transport.bbmd = Some(bbmd_addr);
        Ok(transport)
    }

    /// Port used by [`DataLink::broadcast_address`]. Defaults to 47808.
    pub fn with_broadcast_port(mut self, port: u16) -> Self {
        self.broadcast_port = port;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DataLinkError> {
        self.socket.local_addr().map_err(DataLinkError::Io)
    }

    pub fn bbmd_addr(&self) -> Option<SocketAddr> {
        self.bbmd
    }

    /// Sends Register-Foreign-Device to the configured BBMD.
    ///
    /// The BVLC-Result comes back through [`DataLink::recv`], which logs
    /// success and surfaces a NAK as [`DataLinkError::BvlcResult`].
    pub async fn register_foreign_device(&self, ttl_seconds: u16) -> Result<(), DataLinkError> {
        let bbmd = self.bbmd.ok_or(DataLinkError::BbmdNotConfigured)?;
        self.send_frame(
            BvlcFunction::RegisterForeignDevice,
            &ttl_seconds.to_be_bytes(),
            bbmd,
        )
        .await
    }

    async fn send_frame(
        &self,
        function: BvlcFunction,
        payload: &[u8],
        target: SocketAddr,
    ) -> Result<(), DataLinkError> {
        let mut frame = [0u8; MAX_FRAME_LEN];
        let total_len = BVLC_HEADER_LEN
            .checked_add(payload.len())
            .ok_or(DataLinkError::FrameTooLarge)?;
        if total_len > frame.len() {
            return Err(DataLinkError::FrameTooLarge);
        }

        let mut w = Writer::new(&mut frame);
        BvlcHeader {
            function,
            length: total_len as u16,
        }
        .encode(&mut w)
        .map_err(|_| DataLinkError::InvalidFrame)?;
        w.write_all(payload)
            .map_err(|_| DataLinkError::FrameTooLarge)?;

        self.socket.send_to(w.as_written(), target).await?;
        Ok(())
    }
}

fn copy_out(payload: &[u8], buf: &mut [u8]) -> Result<usize, DataLinkError> {
    if payload.len() > buf.len() {
        return Err(DataLinkError::FrameTooLarge);
    }
    buf[..payload.len()].copy_from_slice(payload);
    Ok(payload.len())
}

impl DataLink for BacnetIpTransport {
    async fn send(&self, address: DataLinkAddress, payload: &[u8]) -> Result<(), DataLinkError> {
        let addr = address
            .as_socket_addr()
            .ok_or(DataLinkError::UnsupportedAddress(address))?;

        let (function, target) = if address.is_broadcast() {
            match self.bbmd {
                Some(bbmd) => (BvlcFunction::DistributeBroadcastToNetwork, bbmd),
                None => (BvlcFunction::OriginalBroadcastNpdu, addr),
            }
        } else {
            (BvlcFunction::OriginalUnicastNpdu, addr)
        };
        self.send_frame(function, payload, target).await
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, DataLinkAddress), DataLinkError> {
        let mut frame = [0u8; MAX_FRAME_LEN];
        loop {
            let (n, src) = self.socket.recv_from(&mut frame).await?;
            let mut r = Reader::new(&frame[..n]);
            let hdr = BvlcHeader::decode(&mut r).map_err(|_| DataLinkError::InvalidFrame)?;
            let body = r
                .read_exact(hdr.body_len())
                .map_err(|_| DataLinkError::InvalidFrame)?;

            match hdr.function {
                BvlcFunction::OriginalUnicastNpdu
                | BvlcFunction::OriginalBroadcastNpdu
                | BvlcFunction::DistributeBroadcastToNetwork => {
                    return Ok((copy_out(body, buf)?, DataLinkAddress::Ip(src)));
                }
                BvlcFunction::ForwardedNpdu => {
                    if body.len() < 6 {
                        return Err(DataLinkError::InvalidFrame);
                    }
                    let origin_ip = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
                    let origin_port = u16::from_be_bytes([body[4], body[5]]);
                    let n = copy_out(&body[6..], buf)?;
                    return Ok((
                        n,
                        DataLinkAddress::Ip(SocketAddr::new(IpAddr::V4(origin_ip), origin_port)),
                    ));
                }
                BvlcFunction::Result => {
                    if body.len() < 2 {
                        return Err(DataLinkError::InvalidFrame);
                    }
                    let code = u16::from_be_bytes([body[0], body[1]]);
                    if code != 0 {
                        return Err(DataLinkError::BvlcResult(code));
                    }
                    log::debug!("bvlc result ok from {src}");
                }
                BvlcFunction::Unknown(v) => return Err(DataLinkError::UnsupportedBvlcFunction(v)),
                other => {
                    log::trace!("ignoring bvlc {other:?} from {src}");
                }
            }
        }
    }

    fn broadcast_address(&self) -> DataLinkAddress {
        DataLinkAddress::local_broadcast(self.broadcast_port)
    }
}

#[cfg(test)]
mod tests {
    use super::BacnetIpTransport;
    use crate::bip::bvlc::{BvlcFunction, BvlcHeader, BVLC_TYPE_BIP};
    use crate::{DataLink, DataLinkAddress, DataLinkError};
    use bacwire_core::encoding::{reader::Reader, writer::Writer};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::net::UdpSocket;

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[tokio::test]
    async fn unicast_roundtrip_between_two_links() {
        let a = BacnetIpTransport::bind(loopback()).await.unwrap();
        let b = BacnetIpTransport::bind(loopback()).await.unwrap();
        let b_addr = DataLinkAddress::Ip(b.local_addr().unwrap());

        a.send(b_addr, &[1, 4, 0xAA]).await.unwrap();

        let mut out = [0u8; 16];
        let (n, src) = b.recv(&mut out).await.unwrap();
        assert_eq!(&out[..n], &[1, 4, 0xAA]);
        assert_eq!(src, DataLinkAddress::Ip(a.local_addr().unwrap()));
    }

    #[tokio::test]
    async fn recv_forwarded_npdu_returns_forwarded_origin() {
        let transport = BacnetIpTransport::bind(loopback()).await.unwrap();
        let target = transport.local_addr().unwrap();
        let sender = UdpSocket::bind(loopback()).await.unwrap();

        let mut frame = [0u8; 64];
        let mut w = Writer::new(&mut frame);
        BvlcHeader {
            function: BvlcFunction::ForwardedNpdu,
            length: 4 + 6 + 3,
        }
        .encode(&mut w)
        .unwrap();
        w.write_all(&[10, 1, 2, 3]).unwrap();
        w.write_be_u16(47808).unwrap();
        w.write_all(&[1, 2, 3]).unwrap();

        sender.send_to(w.as_written(), target).await.unwrap();

        let mut out = [0u8; 16];
        let (n, src) = transport.recv(&mut out).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert_eq!(
            src,
            DataLinkAddress::Ip(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)),
                47808
            ))
        );
    }

    #[tokio::test]
    async fn broadcast_uses_distribute_to_network_when_bbmd_configured() {
        let bbmd = UdpSocket::bind(loopback()).await.unwrap();
        let bbmd_addr = bbmd.local_addr().unwrap();

        let transport = BacnetIpTransport::bind_foreign(loopback(), bbmd_addr)
            .await
            .unwrap();

        transport
            .send(transport.broadcast_address(), &[1, 2, 3])
            .await
            .unwrap();

        let mut recv = [0u8; 64];
        let (n, _) = bbmd.recv_from(&mut recv).await.unwrap();
        let mut r = Reader::new(&recv[..n]);
        let hdr = BvlcHeader::decode(&mut r).unwrap();
        assert_eq!(hdr.function, BvlcFunction::DistributeBroadcastToNetwork);
        assert_eq!(r.rest(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn register_foreign_device_sends_ttl_and_nak_surfaces() {
        let bbmd = UdpSocket::bind(loopback()).await.unwrap();
        let transport = BacnetIpTransport::bind_foreign(loopback(), bbmd.local_addr().unwrap())
            .await
            .unwrap();

        transport.register_foreign_device(90).await.unwrap();

        let mut recv = [0u8; 64];
        let (n, src) = bbmd.recv_from(&mut recv).await.unwrap();
        let mut r = Reader::new(&recv[..n]);
        let hdr = BvlcHeader::decode(&mut r).unwrap();
        assert_eq!(hdr.function, BvlcFunction::RegisterForeignDevice);
        assert_eq!(r.read_be_u16().unwrap(), 90);

        bbmd.send_to(&[BVLC_TYPE_BIP, 0x00, 0x00, 0x06, 0x00, 0x30], src)
            .await
            .unwrap();
        let mut out = [0u8; 16];
        let err = transport.recv(&mut out).await.unwrap_err();
        assert!(matches!(err, DataLinkError::BvlcResult(0x30)));
    }

    #[tokio::test]
    async fn register_without_bbmd_fails() {
        let transport = BacnetIpTransport::bind(loopback()).await.unwrap();
        let err = transport.register_foreign_device(60).await.unwrap_err();
        assert!(matches!(err, DataLinkError::BbmdNotConfigured));
    }

    #[tokio::test]
    async fn mac_address_is_not_routable_over_ip() {
        let transport = BacnetIpTransport::bind(loopback()).await.unwrap();
        let err = transport
            .send(DataLinkAddress::station(4), &[1])
            .await
            .unwrap_err();
        assert!(matches!(err, DataLinkError::UnsupportedAddress(_)));
    }

    #[tokio::test]
    async fn unknown_bvlc_function_errors() {
        let transport = BacnetIpTransport::bind(loopback()).await.unwrap();
        let target = transport.local_addr().unwrap();
        let sender = UdpSocket::bind(loopback()).await.unwrap();

        let frame = [BVLC_TYPE_BIP, 0x99, 0x00, 0x04];
        sender.send_to(&frame, target).await.unwrap();

        let mut out = [0u8; 16];
        let err = transport.recv(&mut out).await.unwrap_err();
        assert!(matches!(err, DataLinkError::UnsupportedBvlcFunction(0x99)));
    }
}
