//! In-process network for tests and simulation.
//!
//! Every [`MemoryLink`] attached to a [`MemoryNetwork`] gets a one-octet
//! station MAC. Frames are delivered in send order after the configured
//! latency; unknown destinations are dropped silently, as on a real wire.

use crate::{DataLink, DataLinkAddress, DataLinkError, MacAddress};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Decides whether a frame is lost: `(source, destination, frame) -> drop?`.
pub type DropFilter = Arc<dyn Fn(&DataLinkAddress, &DataLinkAddress, &[u8]) -> bool + Send + Sync>;

struct Delivery {
    frame: Vec<u8>,
    source: DataLinkAddress,
    deliver_at: Instant,
}

#[derive(Default)]
struct NetworkState {
    links: HashMap<MacAddress, mpsc::UnboundedSender<Delivery>>,
    next_station: u8,
    latency: Duration,
    drop_filter: Option<DropFilter>,
}

/// Shared hub; clones refer to the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        let network = Self::new();
        network.set_latency(latency);
        network
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Installs a loss filter. Frames for which it returns `true` vanish.
    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: Fn(&DataLinkAddress, &DataLinkAddress, &[u8]) -> bool + Send + Sync + 'static,
    {
        self.lock().drop_filter = Some(Arc::new(filter));
    }

    pub fn clear_drop_filter(&self) {
        self.lock().drop_filter = None;
    }

    /// Attaches a link at the next free station number (starting at 1).
    pub fn link(&self) -> Result<MemoryLink, DataLinkError> {
        let station = {
            let mut state = self.lock();
            let mut candidate = state.next_station;
            loop {
                candidate = candidate.wrapping_add(1);
                if candidate == state.next_station {
                    return Err(DataLinkError::Closed);
                }
                if candidate != 0 && !state.links.contains_key(&MacAddress::station(candidate)) {
                    break;
                }
            }
            state.next_station = candidate;
            candidate
        };
        self.link_at(MacAddress::station(station))
    }

    /// Attaches a link with an explicit MAC, replacing any previous holder.
    pub fn link_at(&self, mac: MacAddress) -> Result<MemoryLink, DataLinkError> {
        if mac.is_broadcast() {
            return Err(DataLinkError::UnsupportedAddress(DataLinkAddress::Mac {
                network: None,
                mac,
            }));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().links.insert(mac, tx);
        Ok(MemoryLink {
            mac,
            network: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver(&self, source: MacAddress, destination: DataLinkAddress, frame: &[u8]) {
        let state = self.lock();
        let from = DataLinkAddress::Mac {
            network: None,
            mac: source,
        };
        let deliver_at = Instant::now() + state.latency;
        let targets: Vec<(&MacAddress, &mpsc::UnboundedSender<Delivery>)> = match destination {
            DataLinkAddress::Mac { mac, .. } if mac.is_broadcast() => state
                .links
                .iter()
                .filter(|(m, _)| **m != source)
                .collect(),
            DataLinkAddress::Mac { mac, .. } => state.links.get_key_value(&mac).into_iter().collect(),
            DataLinkAddress::Ip(_) => Vec::new(),
        };
        for (mac, tx) in targets {
            let to = DataLinkAddress::Mac {
                network: None,
                mac: *mac,
            };
            if let Some(filter) = &state.drop_filter {
                if filter(&from, &to, frame) {
                    log::trace!("memory network dropped {} octets {from} -> {to}", frame.len());
                    continue;
                }
            }
            let _ = tx.send(Delivery {
                frame: frame.to_vec(),
                source: from,
                deliver_at,
            });
        }
    }

    fn detach(&self, mac: MacAddress) {
        let mut state = self.lock();
        if state.links.get(&mac).is_some_and(|tx| tx.is_closed()) {
            state.links.remove(&mac);
        }
    }
}

/// One station on a [`MemoryNetwork`].
pub struct MemoryLink {
    mac: MacAddress,
    network: MemoryNetwork,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
}

impl MemoryLink {
    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn address(&self) -> DataLinkAddress {
        DataLinkAddress::Mac {
            network: None,
            mac: self.mac,
        }
    }
}

impl std::fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLink").field("mac", &self.mac).finish()
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.rx.get_mut().close();
        self.network.detach(self.mac);
    }
}

impl DataLink for MemoryLink {
    async fn send(&self, address: DataLinkAddress, payload: &[u8]) -> Result<(), DataLinkError> {
        if address.as_socket_addr().is_some() {
            return Err(DataLinkError::UnsupportedAddress(address));
        }
        if payload.len() > crate::MAX_FRAME_LEN {
            return Err(DataLinkError::FrameTooLarge);
        }
        self.network.deliver(self.mac, address, payload);
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, DataLinkAddress), DataLinkError> {
        let delivery = {
            let mut rx = self.rx.lock().await;
            rx.recv().await.ok_or(DataLinkError::Closed)?
        };
        tokio::time::sleep_until(delivery.deliver_at).await;
        if delivery.frame.len() > buf.len() {
            return Err(DataLinkError::FrameTooLarge);
        }
        buf[..delivery.frame.len()].copy_from_slice(&delivery.frame);
        Ok((delivery.frame.len(), delivery.source))
    }

    fn broadcast_address(&self) -> DataLinkAddress {
        DataLinkAddress::Mac {
            network: None,
            mac: MacAddress::BROADCAST,
        }
    }
}
