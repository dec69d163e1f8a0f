use crate::config::TransportConfig;
use crate::engine::{read_frames, Engine, Event, Submission};
use crate::frame::CONFIRMED_HEADER_LEN;
use crate::handle::{self, Outcome, Resolver, ResultHandle};
use crate::registry::{DeviceEvent, DeviceRegistry, RemoteDevice};
use crate::server::{NoServices, ServiceHandler};
use crate::{RequestError, TransportError};
use bacwire_core::services::{
    ConfirmedRequest, ReadPropertyRequest, UnconfirmedRequest, WhoIsRequest,
};
use bacwire_core::types::{MaxApdu, PropertyId, Segmentation};
use bacwire_datalink::{BacnetIpTransport, DataLink, DataLinkAddress};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

struct Inner {
    events: mpsc::UnboundedSender<Event>,
    registry: DeviceRegistry,
    config: TransportConfig,
    engine: Mutex<Option<JoinHandle<()>>>,
    reader: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Shutdown);
        self.reader.abort();
    }
}

/// A local BACnet device's connection to the network.
///
/// Cloning is cheap; clones share the engine. The engine stops on
/// [`terminate`](Self::terminate) or when the last clone is dropped.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("device_instance", &self.inner.config.device_instance)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Starts a transport that rejects every request from peers.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start<D: DataLink>(link: D, config: TransportConfig) -> Result<Self, TransportError> {
        Self::start_with_handler(link, config, Arc::new(NoServices))
    }

    /// Starts a transport that answers peers through `handler`.
    pub fn start_with_handler<D: DataLink>(
        link: D,
        config: TransportConfig,
        handler: Arc<dyn ServiceHandler>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let link = Arc::new(link);
        let registry = DeviceRegistry::new();
        let (events, rx) = mpsc::unbounded_channel();
        let engine = Engine::new(
            link.clone(),
            config.clone(),
            registry.clone(),
            handler,
            events.clone(),
        );
        let engine = tokio::spawn(engine.run(rx));
        let reader = tokio::spawn(read_frames(link, events.clone()));
        log::info!("transport for device {} started", config.device_instance);
        Ok(Self {
            inner: Arc::new(Inner {
                events,
                registry,
                config,
                engine: Mutex::new(Some(engine)),
                reader,
            }),
        })
    }

    /// Binds a BACnet/IP socket and starts a transport on it.
    pub async fn bind_ip(
        bind_addr: SocketAddr,
        config: TransportConfig,
        handler: Arc<dyn ServiceHandler>,
    ) -> Result<Self, TransportError> {
        let link = BacnetIpTransport::bind(bind_addr).await?;
        Self::start_with_handler(link, config, handler)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    pub fn subscribe_devices(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.registry.subscribe()
    }

    pub async fn get_remote_device(&self, instance: u32) -> Option<RemoteDevice> {
        self.inner.registry.get(instance).await
    }

    /// Sends a confirmed request to `device` without waiting for the reply.
    ///
    /// The handle resolves exactly once: with the ack, the peer's error,
    /// reject or abort, a local failure, or [`RequestError::TimedOut`].
    pub fn send(&self, device: &RemoteDevice, request: impl Into<ConfirmedRequest>) -> ResultHandle {
        let (handle, resolver) = handle::pair();
        self.dispatch(device.clone(), request.into(), resolver);
        handle
    }

    /// Like [`send`](Self::send), also running `consumer` with the outcome.
    pub fn send_with(
        &self,
        device: &RemoteDevice,
        request: impl Into<ConfirmedRequest>,
        consumer: impl FnOnce(Outcome) + Send + 'static,
    ) -> ResultHandle {
        let handle = self.send(device, request);
        handle.on_complete(consumer);
        handle
    }

    fn dispatch(&self, device: RemoteDevice, request: ConfirmedRequest, resolver: Resolver) {
        let service_choice = request.service_choice();
        if device
            .services_supported()
            .is_some_and(|services| !services.supports_confirmed(service_choice))
        {
            resolver.resolve(Err(RequestError::ServiceNotSupported(service_choice)));
            return;
        }
        let payload = match request.to_vec() {
            Ok(payload) => payload,
            Err(err) => {
                resolver.resolve(Err(err.into()));
                return;
            }
        };
        if !device.capabilities_known()
            && CONFIRMED_HEADER_LEN + payload.len() > MaxApdu::UpTo50.octets()
        {
            let transport = self.clone();
            tokio::spawn(async move {
                let device = transport.probe(device).await;
                transport.submit(&device, service_choice, payload, resolver);
            });
            return;
        }
        self.submit(&device, service_choice, payload, resolver);
    }

    fn submit(
        &self,
        device: &RemoteDevice,
        service_choice: u8,
        payload: Vec<u8>,
        resolver: Resolver,
    ) {
        let submission = Submission {
            destination: device.address(),
            service_choice,
            payload,
            peer_max_apdu: device
                .max_apdu_length_accepted()
                .map_or(MaxApdu::UpTo50.octets(), |octets| octets as usize),
            peer_segmentation: device
                .segmentation_supported()
                .unwrap_or(Segmentation::NoSegmentation),
            resolver,
        };
        if let Err(mpsc::error::SendError(Event::Submit(submission))) =
            self.inner.events.send(Event::Submit(submission))
        {
            submission.resolver.resolve(Err(RequestError::Shutdown));
        }
    }

    /// Reads the device's segmentation support and maximum APDU size.
    ///
    /// Values read are recorded in the registry. Whatever could not be read
    /// falls back to 50 octets without segmentation for this request only.
    async fn probe(&self, device: RemoteDevice) -> RemoteDevice {
        let object_id = device.object_id();
        let read = |property_id| {
            let (handle, resolver) = handle::pair();
            let request = ConfirmedRequest::from(ReadPropertyRequest::new(object_id, property_id));
            match request.to_vec() {
                Ok(payload) => self.submit(&device, request.service_choice(), payload, resolver),
                Err(err) => {
                    resolver.resolve(Err(err.into()));
                }
            }
            handle
        };
        let segmentation = read(PropertyId::SegmentationSupported);
        let max_apdu = read(PropertyId::MaxApduLengthAccepted);

        let read_value = |outcome: Outcome, property_id: PropertyId| match outcome {
            Ok(ack) => ack.into_read_property().map(|ack| ack.value),
            Err(err) => {
                log::debug!(
                    "device {}: could not read {property_id:?}: {err}",
                    device.instance()
                );
                None
            }
        };
        let segmentation = read_value(segmentation.wait().await, PropertyId::SegmentationSupported)
            .and_then(|value| value.as_enumerated())
            .and_then(Segmentation::from_u32);
        let max_apdu = read_value(max_apdu.wait().await, PropertyId::MaxApduLengthAccepted)
            .and_then(|value| value.as_unsigned());

        if segmentation.is_none() || max_apdu.is_none() {
            log::warn!(
                "device {}: capabilities unknown, assuming {} octets without segmentation",
                device.instance(),
                MaxApdu::UpTo50.octets()
            );
        }
        self.inner
            .registry
            .learn_capabilities(device.instance(), max_apdu, segmentation)
            .await;
        let max_apdu = max_apdu
            .or(device.max_apdu_length_accepted())
            .unwrap_or(MaxApdu::UpTo50.octets() as u32);
        let segmentation = segmentation
            .or(device.segmentation_supported())
            .unwrap_or(Segmentation::NoSegmentation);
        device.with_capabilities(max_apdu, segmentation)
    }

    async fn send_unconfirmed(
        &self,
        destination: Option<DataLinkAddress>,
        request: UnconfirmedRequest,
    ) -> Result<(), TransportError> {
        let (done, result) = oneshot::channel();
        self.inner
            .events
            .send(Event::Unconfirmed {
                destination,
                request,
                done,
            })
            .map_err(|_| TransportError::Terminated)?;
        result.await.map_err(|_| TransportError::Terminated)?
    }

    /// Sends an unconfirmed request to every device on the local network.
    pub async fn send_broadcast(
        &self,
        request: impl Into<UnconfirmedRequest>,
    ) -> Result<(), TransportError> {
        self.send_unconfirmed(None, request.into()).await
    }

    pub async fn send_unicast(
        &self,
        destination: DataLinkAddress,
        request: impl Into<UnconfirmedRequest>,
    ) -> Result<(), TransportError> {
        self.send_unconfirmed(Some(destination), request.into())
            .await
    }

    /// Announces this device with a broadcast I-Am.
    pub async fn i_am(&self) -> Result<(), TransportError> {
        self.send_broadcast(self.inner.config.i_am()).await
    }

    /// Broadcasts `who_is`, waits `wait` for answers, and returns the
    /// matching devices known by then.
    pub async fn discover(
        &self,
        who_is: WhoIsRequest,
        wait: Duration,
    ) -> Result<Vec<RemoteDevice>, TransportError> {
        self.send_broadcast(who_is).await?;
        tokio::time::sleep(wait).await;
        let mut devices = self.inner.registry.all().await;
        devices.retain(|device| who_is.matches(device.instance()));
        Ok(devices)
    }

    /// Stops the engine. Outstanding requests resolve with
    /// [`RequestError::Shutdown`]; later sends resolve the same way.
    pub async fn terminate(&self) {
        let _ = self.inner.events.send(Event::Shutdown);
        let engine = self
            .inner
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(engine) = engine {
            if let Err(err) = engine.await {
                log::warn!("engine task failed: {err}");
            }
            log::info!(
                "transport for device {} terminated",
                self.inner.config.device_instance
            );
        }
        self.inner.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::Transport;
    use crate::frame;
    use crate::{RequestError, ServiceAck, TransportConfig};
    use crate::registry::RemoteDevice;
    use bacwire_core::apdu::{
        AbortReason, ApduType, ComplexAckHeader, ConfirmedRequestHeader, RejectPdu, RejectReason,
        SegmentAck,
    };
    use bacwire_core::encoding::reader::Reader;
    use bacwire_core::npdu::split_frame;
    use bacwire_core::services::{
        ComplexAck, ConfirmedRequest, PropertyValue, ReadPropertyAck, ReadPropertyRequest,
        UnconfirmedRequest, WhoIsRequest, WriteAccessSpecification, WritePropertyMultipleRequest, WritePropertyRequest,
        SERVICE_READ_PROPERTY, SERVICE_WRITE_PROPERTY, SERVICE_WRITE_PROPERTY_MULTIPLE,
    };
    use bacwire_core::types::{
        DataValue, ErrorClass, ErrorCode, MaxApdu, MaxSegments, ObjectId, ObjectType, PropertyId,
        Segmentation, ServicesSupported,
    };
    use bacwire_datalink::{DataLink, DataLinkAddress, DataLinkError, MacAddress};
    use std::time::Duration;
    use tokio::sync::{mpsc, Mutex};

    const PEER: DataLinkAddress = DataLinkAddress::station(2);

    struct MockDataLink {
        sent: mpsc::UnboundedSender<(DataLinkAddress, Vec<u8>)>,
        inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    }

    impl DataLink for MockDataLink {
        async fn send(
            &self,
            address: DataLinkAddress,
            payload: &[u8],
        ) -> Result<(), DataLinkError> {
            self.sent
                .send((address, payload.to_vec()))
                .map_err(|_| DataLinkError::Closed)
        }

        async fn recv(&self, buf: &mut [u8]) -> Result<(usize, DataLinkAddress), DataLinkError> {
            let payload = self
                .inbound
                .lock()
                .await
                .recv()
                .await
                .ok_or(DataLinkError::Closed)?;
            buf[..payload.len()].copy_from_slice(&payload);
            Ok((payload.len(), PEER))
        }

        fn broadcast_address(&self) -> DataLinkAddress {
            DataLinkAddress::Mac {
                network: None,
                mac: MacAddress::BROADCAST,
            }
        }
    }

    /// The far end of a [`MockDataLink`].
    struct Peer {
        sent: mpsc::UnboundedReceiver<(DataLinkAddress, Vec<u8>)>,
        inbound: mpsc::UnboundedSender<Vec<u8>>,
    }

    impl Peer {
        async fn next_apdu(&mut self) -> (DataLinkAddress, Vec<u8>) {
            let (address, frame) = self.sent.recv().await.unwrap();
            let (_, apdu) = split_frame(&frame).unwrap().unwrap();
            (address, apdu.to_vec())
        }

        async fn next_request(&mut self) -> (ConfirmedRequestHeader, Vec<u8>) {
            let (address, apdu) = self.next_apdu().await;
            assert_eq!(address, PEER);
            let mut r = Reader::new(&apdu);
            let header = ConfirmedRequestHeader::decode(&mut r).unwrap();
            (header, r.rest().to_vec())
        }

        async fn next_segment_ack(&mut self) -> SegmentAck {
            let (address, apdu) = self.next_apdu().await;
            assert_eq!(address, PEER);
            SegmentAck::decode(&mut Reader::new(&apdu)).unwrap()
        }

        fn reply(&self, frame: Vec<u8>) {
            self.inbound.send(frame).unwrap();
        }

        fn nothing_sent(&mut self) -> bool {
            self.sent.try_recv().is_err()
        }
    }

    fn start(config: TransportConfig) -> (Transport, Peer) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let link = MockDataLink {
            sent: sent_tx,
            inbound: Mutex::new(inbound_rx),
        };
        let transport = Transport::start(link, config).unwrap();
        (
            transport,
            Peer {
                sent: sent_rx,
                inbound: inbound_tx,
            },
        )
    }

    fn peer(max_apdu: u32, segmentation: Segmentation) -> RemoteDevice {
        RemoteDevice::new(2, PEER).with_capabilities(max_apdu, segmentation)
    }

    fn av(instance: u32) -> ObjectId {
        ObjectId::new(ObjectType::AnalogValue, instance)
    }

    fn big_write(objects: u32) -> WritePropertyMultipleRequest {
        WritePropertyMultipleRequest {
            specs: (0..objects)
                .map(|i| WriteAccessSpecification {
                    object_id: av(i),
                    properties: vec![PropertyValue::new(
                        PropertyId::PresentValue,
                        DataValue::Real(i as f32),
                    )],
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn read_property_completes_with_complex_ack() {
        let (transport, mut peer_link) = start(TransportConfig::new(1));
        let device = peer(1476, Segmentation::SegmentedBoth);
        let handle = transport.send(
            &device,
            ReadPropertyRequest::new(av(5), PropertyId::PresentValue),
        );

        let (header, _) = peer_link.next_request().await;
        assert_eq!(header.invoke_id, 0);
        assert!(!header.segmented);
        assert!(header.segmented_response_accepted);
        assert_eq!(header.service_choice, SERVICE_READ_PROPERTY);

        let ack = ComplexAck::ReadProperty(ReadPropertyAck {
            object_id: av(5),
            property_id: PropertyId::PresentValue,
            array_index: None,
            value: DataValue::Real(21.5),
        });
        let reply = frame::complex_ack(
            &ComplexAckHeader {
                segmented: false,
                more_follows: false,
                invoke_id: 0,
                sequence_number: None,
                proposed_window_size: None,
                service_choice: SERVICE_READ_PROPERTY,
            },
            &ack.to_vec().unwrap(),
        )
        .unwrap();
        peer_link.reply(reply);

        let value = handle
            .wait()
            .await
            .unwrap()
            .into_read_property()
            .unwrap()
            .value;
        assert_eq!(value, DataValue::Real(21.5));
        transport.terminate().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_retransmits_then_gives_up() {
        let config = TransportConfig::new(1)
            .with_retries(1)
            .with_apdu_timeout(Duration::from_secs(1));
        let (transport, mut peer_link) = start(config);
        let device = peer(1476, Segmentation::SegmentedBoth);
        let write = WritePropertyRequest::new(av(1), PropertyId::PresentValue, DataValue::Real(1.0));
        let handle = transport.send(&device, write);

        let (first, first_payload) = peer_link.next_request().await;
        let (second, second_payload) = peer_link.next_request().await;
        assert_eq!(first, second);
        assert_eq!(first_payload, second_payload);
        assert_eq!(handle.wait().await, Err(RequestError::TimedOut));

        // A reply arriving after the timeout changes nothing.
        peer_link.reply(frame::simple_ack(0, SERVICE_WRITE_PROPERTY).unwrap());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.try_outcome(), Some(Err(RequestError::TimedOut)));
        transport.terminate().await;
    }

    #[tokio::test]
    async fn peer_error_reject_and_abort_are_reported() {
        let (transport, mut peer_link) = start(TransportConfig::new(1));
        let device = peer(1476, Segmentation::SegmentedBoth);
        let read = || ReadPropertyRequest::new(av(9), PropertyId::PresentValue);

        let handle = transport.send(&device, read());
        let (header, _) = peer_link.next_request().await;
        peer_link.reply(frame::error(header.invoke_id, SERVICE_READ_PROPERTY, 1, 31).unwrap());
        assert_eq!(
            handle.wait().await,
            Err(RequestError::Remote {
                service_choice: SERVICE_READ_PROPERTY,
                error_class: Some(ErrorClass::Object),
                error_code: Some(ErrorCode::UnknownObject),
            })
        );

        let handle = transport.send(&device, read());
        let (header, _) = peer_link.next_request().await;
        peer_link.reply(frame::reject(header.invoke_id, RejectReason::UnrecognizedService).unwrap());
        assert_eq!(
            handle.wait().await,
            Err(RequestError::Rejected(RejectReason::UnrecognizedService))
        );

        let handle = transport.send(&device, read());
        let (header, _) = peer_link.next_request().await;
        peer_link.reply(
            frame::abort(true, header.invoke_id, AbortReason::OutOfResources).unwrap(),
        );
        assert_eq!(
            handle.wait().await,
            Err(RequestError::Aborted {
                reason: AbortReason::OutOfResources,
                by_peer: true
            })
        );
        transport.terminate().await;
    }

    #[tokio::test]
    async fn segmented_request_follows_segment_acks() {
        let (transport, mut peer_link) = start(TransportConfig::new(1).with_window_size(4));
        let device = peer(128, Segmentation::SegmentedBoth);
        let request = big_write(40);
        let payload_len = ConfirmedRequest::from(request.clone()).to_vec().unwrap().len();
        let handle = transport.send(&device, request);

        let mut received = 0;
        let mut sequence = 0u8;
        let invoke_id = loop {
            let (header, segment) = peer_link.next_request().await;
            assert!(header.segmented);
            assert_eq!(header.sequence_number, Some(sequence));
            assert_eq!(header.proposed_window_size, Some(4));
            assert!(segment.len() <= 128 - 6);
            received += segment.len();
            let last = !header.more_follows;
            if last || (sequence + 1) % 4 == 0 {
                peer_link.reply(
                    frame::segment_ack(&SegmentAck {
                        negative_ack: false,
                        sent_by_server: true,
                        invoke_id: header.invoke_id,
                        sequence_number: sequence,
                        actual_window_size: 4,
                    })
                    .unwrap(),
                );
            }
            if last {
                break header.invoke_id;
            }
            sequence += 1;
        };
        assert!(sequence >= 4);
        assert_eq!(received, payload_len);
        peer_link.reply(frame::simple_ack(invoke_id, SERVICE_WRITE_PROPERTY_MULTIPLE).unwrap());
        assert_eq!(handle.wait().await, Ok(ServiceAck::Simple));
        transport.terminate().await;
    }

    fn write_segment(invoke_id: u8, sequence_number: u8, more_follows: bool, data: &[u8]) -> Vec<u8> {
        frame::confirmed_request(
            &ConfirmedRequestHeader {
                segmented: true,
                more_follows,
                segmented_response_accepted: true,
                max_segments: MaxSegments::MoreThanSixtyFour.to_u8(),
                max_apdu: MaxApdu::UpTo1476.to_u8(),
                invoke_id,
                sequence_number: Some(sequence_number),
                proposed_window_size: Some(2),
                service_choice: SERVICE_WRITE_PROPERTY,
            },
            data,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_request_segments_are_acked_not_served_again() {
        let (transport, mut peer_link) = start(TransportConfig::new(1));
        let write = |instance| {
            ConfirmedRequest::from(WritePropertyRequest::new(
                av(instance),
                PropertyId::PresentValue,
                DataValue::Real(1.0),
            ))
            .to_vec()
            .unwrap()
        };
        let final_ack = SegmentAck {
            negative_ack: false,
            sent_by_server: true,
            invoke_id: 7,
            sequence_number: 1,
            actual_window_size: 2,
        };
        let expect_reject = |apdu: &[u8]| {
            assert_eq!(ApduType::of(apdu), Some(ApduType::Reject));
            let reject = RejectPdu::decode(&mut Reader::new(apdu)).unwrap();
            assert_eq!(reject.invoke_id, 7);
            assert_eq!(reject.reason, RejectReason::UnrecognizedService);
        };

        let payload = write(1);
        let (first, second) = payload.split_at(payload.len() / 2);
        peer_link.reply(write_segment(7, 0, true, first));
        peer_link.reply(write_segment(7, 1, false, second));
        assert_eq!(peer_link.next_segment_ack().await, final_ack);
        expect_reject(&peer_link.next_apdu().await.1);

        // The final ack went missing: the client repeats its last segment,
        // then its whole window.
        peer_link.reply(write_segment(7, 1, false, second));
        assert_eq!(peer_link.next_segment_ack().await, final_ack);
        peer_link.reply(write_segment(7, 0, true, first));
        peer_link.reply(write_segment(7, 1, false, second));
        assert_eq!(peer_link.next_segment_ack().await, final_ack);
        assert_eq!(peer_link.next_segment_ack().await, final_ack);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(peer_link.nothing_sent());

        // A different request under the same invoke id is served.
        let payload = write(2);
        let (first, second) = payload.split_at(payload.len() / 2);
        peer_link.reply(write_segment(7, 0, true, first));
        peer_link.reply(write_segment(7, 1, false, second));
        assert_eq!(peer_link.next_segment_ack().await, final_ack);
        expect_reject(&peer_link.next_apdu().await.1);
        transport.terminate().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_response_segments_are_acked_and_hold_the_invoke_id() {
        let (transport, mut peer_link) = start(TransportConfig::new(1));
        let device = peer(1476, Segmentation::SegmentedBoth);
        let read = |instance| ReadPropertyRequest::new(av(instance), PropertyId::ObjectName);

        let handle = transport.send(&device, read(3));
        let (header, _) = peer_link.next_request().await;
        let id = header.invoke_id;
        let ack = ComplexAck::ReadProperty(ReadPropertyAck {
            object_id: av(3),
            property_id: PropertyId::ObjectName,
            array_index: None,
            value: DataValue::from("supply fan"),
        })
        .to_vec()
        .unwrap();
        let (first, second) = ack.split_at(ack.len() / 2);
        let segment = |sequence_number, more_follows, data: &[u8]| {
            frame::complex_ack(
                &ComplexAckHeader {
                    segmented: true,
                    more_follows,
                    invoke_id: id,
                    sequence_number: Some(sequence_number),
                    proposed_window_size: Some(2),
                    service_choice: SERVICE_READ_PROPERTY,
                },
                data,
            )
            .unwrap()
        };
        let final_ack = SegmentAck {
            negative_ack: false,
            sent_by_server: false,
            invoke_id: id,
            sequence_number: 1,
            actual_window_size: 2,
        };

        peer_link.reply(segment(0, true, first));
        peer_link.reply(segment(1, false, second));
        assert_eq!(peer_link.next_segment_ack().await, final_ack);
        let value = handle.wait().await.unwrap().into_read_property().unwrap().value;
        assert_eq!(value, DataValue::from("supply fan"));

        // The server missed the ack and resends its window.
        peer_link.reply(segment(0, true, first));
        peer_link.reply(segment(1, false, second));
        assert_eq!(peer_link.next_segment_ack().await, final_ack);
        assert_eq!(peer_link.next_segment_ack().await, final_ack);

        // The next request gets another id, and stragglers do not touch it.
        let handle = transport.send(&device, read(4));
        let (header, _) = peer_link.next_request().await;
        assert_ne!(header.invoke_id, id);
        peer_link.reply(segment(0, true, first));
        assert_eq!(peer_link.next_segment_ack().await, final_ack);
        assert!(!handle.is_resolved());
        let reply = ComplexAck::ReadProperty(ReadPropertyAck {
            object_id: av(4),
            property_id: PropertyId::ObjectName,
            array_index: None,
            value: DataValue::from("return fan"),
        });
        peer_link.reply(
            frame::complex_ack(
                &ComplexAckHeader {
                    segmented: false,
                    more_follows: false,
                    invoke_id: header.invoke_id,
                    sequence_number: None,
                    proposed_window_size: None,
                    service_choice: SERVICE_READ_PROPERTY,
                },
                &reply.to_vec().unwrap(),
            )
            .unwrap(),
        );
        let value = handle.wait().await.unwrap().into_read_property().unwrap().value;
        assert_eq!(value, DataValue::from("return fan"));

        // Once the exchange has settled the id is free again.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let _handle = transport.send(&device, read(5));
        let (header, _) = peer_link.next_request().await;
        assert_eq!(header.invoke_id, id);
        transport.terminate().await;
    }

    #[tokio::test]
    async fn local_checks_fail_without_transmitting() {
        let (transport, mut peer_link) = start(TransportConfig::new(1));

        let no_segments = peer(128, Segmentation::NoSegmentation);
        assert_eq!(
            transport.send(&no_segments, big_write(40)).wait().await,
            Err(RequestError::local_abort(AbortReason::SegmentationNotSupported))
        );

        let read_only = peer(1476, Segmentation::SegmentedBoth).with_property(
            PropertyId::ProtocolServicesSupported,
            DataValue::BitString(
                ServicesSupported::none()
                    .with_confirmed(SERVICE_READ_PROPERTY)
                    .as_bit_string()
                    .clone(),
            ),
        );
        let write = WritePropertyRequest::new(av(1), PropertyId::PresentValue, DataValue::Real(1.0));
        assert_eq!(
            transport.send(&read_only, write).wait().await,
            Err(RequestError::ServiceNotSupported(SERVICE_WRITE_PROPERTY))
        );
        assert!(peer_link.nothing_sent());
        transport.terminate().await;
    }

    #[tokio::test]
    async fn unknown_capabilities_are_probed_first() {
        let (transport, mut peer_link) = start(TransportConfig::new(1));
        transport
            .devices()
            .insert(RemoteDevice::new(2, PEER))
            .await;
        let device = transport.get_remote_device(2).await.unwrap();
        let handle = transport.send(&device, big_write(10));

        let mut answered = 0;
        while answered < 2 {
            let (header, payload) = peer_link.next_request().await;
            assert_eq!(header.service_choice, SERVICE_READ_PROPERTY);
            let request = ReadPropertyRequest::decode(&mut Reader::new(&payload)).unwrap();
            let value = match request.property_id {
                PropertyId::SegmentationSupported => {
                    DataValue::Enumerated(Segmentation::SegmentedBoth.to_u32())
                }
                PropertyId::MaxApduLengthAccepted => DataValue::Unsigned(1476),
                other => panic!("unexpected probe of {other:?}"),
            };
            let ack = ComplexAck::ReadProperty(ReadPropertyAck {
                object_id: request.object_id,
                property_id: request.property_id,
                array_index: None,
                value,
            });
            peer_link.reply(
                frame::complex_ack(
                    &ComplexAckHeader {
                        segmented: false,
                        more_follows: false,
                        invoke_id: header.invoke_id,
                        sequence_number: None,
                        proposed_window_size: None,
                        service_choice: SERVICE_READ_PROPERTY,
                    },
                    &ack.to_vec().unwrap(),
                )
                .unwrap(),
            );
            answered += 1;
        }

        let (header, _) = peer_link.next_request().await;
        assert_eq!(header.service_choice, SERVICE_WRITE_PROPERTY_MULTIPLE);
        assert!(!header.segmented);
        peer_link.reply(
            frame::simple_ack(header.invoke_id, SERVICE_WRITE_PROPERTY_MULTIPLE).unwrap(),
        );
        assert_eq!(handle.wait().await, Ok(ServiceAck::Simple));

        let learned = transport.get_remote_device(2).await.unwrap();
        assert_eq!(learned.max_apdu_length_accepted(), Some(1476));
        assert_eq!(
            learned.segmentation_supported(),
            Some(Segmentation::SegmentedBoth)
        );
        transport.terminate().await;
    }

    #[tokio::test]
    async fn terminate_fails_outstanding_and_later_requests() {
        let (transport, mut peer_link) = start(TransportConfig::new(1));
        let device = peer(1476, Segmentation::SegmentedBoth);
        let read = || ReadPropertyRequest::new(av(1), PropertyId::PresentValue);
        let handle = transport.send(&device, read());
        let _ = peer_link.next_apdu().await;

        transport.terminate().await;
        assert_eq!(handle.wait().await, Err(RequestError::Shutdown));
        assert_eq!(
            transport.send(&device, read()).wait().await,
            Err(RequestError::Shutdown)
        );
        assert!(transport.i_am().await.is_err());
    }

    #[tokio::test]
    async fn who_is_is_answered_with_i_am() {
        let (transport, mut peer_link) = start(TransportConfig::new(77).with_vendor_id(9));
        peer_link.reply(
            frame::unconfirmed(&UnconfirmedRequest::WhoIs(WhoIsRequest::range(70, 80))).unwrap(),
        );
        let (address, apdu) = peer_link.next_apdu().await;
        assert_eq!(address, PEER);
        assert_eq!(ApduType::of(&apdu), Some(ApduType::UnconfirmedRequest));
        let i_am = UnconfirmedRequest::decode(apdu[1], &apdu[2..]).unwrap();
        assert_eq!(i_am, UnconfirmedRequest::IAm(transport.config().i_am()));
        transport.terminate().await;
    }
}
