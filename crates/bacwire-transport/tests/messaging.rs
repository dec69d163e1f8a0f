use bacwire_core::apdu::{AbortReason, ConfirmedRequestHeader};
use bacwire_core::encoding::reader::Reader;
use bacwire_core::npdu::split_frame;
use bacwire_core::services::{
    PropertyValue, ReadPropertyRequest, WhoIsRequest, WriteAccessSpecification,
    WritePropertyMultipleRequest, WritePropertyRequest,
};
use bacwire_core::types::{DataValue, EngineeringUnits, ObjectId, ObjectType, PropertyId};
use bacwire_datalink::{DataLink, DataLinkAddress, MacAddress, MemoryNetwork};
use bacwire_transport::store::analog_value_properties;
use bacwire_transport::{
    DeviceEvent, ObjectStore, RemoteDevice, RequestError, ServiceAck, Transport, TransportConfig,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

struct Node {
    transport: Transport,
    store: Arc<ObjectStore>,
    address: DataLinkAddress,
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn node(network: &MemoryNetwork, config: TransportConfig) -> Node {
    let link = network.link().unwrap();
    let address = link.address();
    let store = Arc::new(ObjectStore::new(&config));
    let transport = Transport::start_with_handler(link, config, store.clone()).unwrap();
    Node {
        transport,
        store,
        address,
    }
}

fn av(instance: u32) -> ObjectId {
    ObjectId::new(ObjectType::AnalogValue, instance)
}

fn with_analog_values(node: &Node, count: u32) {
    for i in 0..count {
        node.store.add_object(av(i), analog_value_properties(i as f32));
    }
}

async fn discover(transport: &Transport, instance: u32) -> RemoteDevice {
    let mut events = transport.subscribe_devices();
    transport
        .send_broadcast(WhoIsRequest::range(instance, instance))
        .await
        .unwrap();
    timeout(WAIT, async {
        loop {
            if let DeviceEvent::Discovered(device) = events.recv().await.unwrap() {
                if device.instance() == instance {
                    return device;
                }
            }
        }
    })
    .await
    .unwrap()
}

async fn read(
    transport: &Transport,
    device: &RemoteDevice,
    object: ObjectId,
    property: PropertyId,
) -> DataValue {
    transport
        .send(device, ReadPropertyRequest::new(object, property))
        .wait()
        .await
        .unwrap()
        .into_read_property()
        .unwrap()
        .value
}

/// Offset of the APDU in frames built by the transport (version + control).
const APDU: usize = 2;

fn is_segmented_complex_ack(frame: &[u8], sequence_number: u8) -> bool {
    frame.len() > APDU + 2
        && frame[APDU] >> 4 == 3
        && frame[APDU] & 0x08 != 0
        && frame[APDU + 2] == sequence_number
}

fn is_segment_ack(frame: &[u8]) -> bool {
    frame.len() > APDU && frame[APDU] >> 4 == 4
}

#[tokio::test]
async fn discovery_then_segmented_object_list() {
    init_logging();
    let network = MemoryNetwork::new();
    let a = node(&network, TransportConfig::new(1));
    let b = node(&network, TransportConfig::new(2));
    with_analog_values(&b, 1000);

    let device = discover(&a.transport, 2).await;
    assert_eq!(device.address(), b.address);
    assert!(device.capabilities_known());

    let list = read(&a.transport, &device, ObjectId::device(2), PropertyId::ObjectList).await;
    let ids = list.object_ids();
    assert_eq!(ids.len(), 1001);
    assert_eq!(ids, b.store.object_ids());
    assert_eq!(ids[0], ObjectId::device(2));
    assert!(ids[1..].iter().zip(0..).all(|(id, i)| *id == av(i)));

    a.transport.terminate().await;
    b.transport.terminate().await;
}

#[tokio::test]
async fn address_change_keeps_cached_properties() {
    init_logging();
    let network = MemoryNetwork::new();
    let a = node(&network, TransportConfig::new(1));
    let b = node(&network, TransportConfig::new(2));

    let first = discover(&a.transport, 2).await;
    assert_eq!(first.address(), b.address);
    let override_name = DataValue::from("boiler room");
    assert!(
        a.transport
            .devices()
            .set_cached_property(2, PropertyId::ObjectName, override_name.clone())
            .await
    );

    // Same instance, new station.
    b.transport.terminate().await;
    let moved = node(&network, TransportConfig::new(2));
    let mut events = a.transport.subscribe_devices();
    moved.transport.i_am().await.unwrap();
    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        DeviceEvent::AddressChanged {
            instance: 2,
            old: b.address,
            new: moved.address,
        }
    );

    let devices = a.transport.devices().all().await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address(), moved.address);
    assert_eq!(
        devices[0].cached_property(PropertyId::ObjectName),
        Some(&override_name)
    );

    a.transport.terminate().await;
    moved.transport.terminate().await;
}

#[tokio::test]
async fn write_then_read_back() {
    init_logging();
    let network = MemoryNetwork::new();
    let a = node(&network, TransportConfig::new(1));
    let b = node(&network, TransportConfig::new(2));
    with_analog_values(&b, 10);
    let device = discover(&a.transport, 2).await;

    let write = WritePropertyRequest::new(av(7), PropertyId::PresentValue, DataValue::Real(72.5));
    assert_eq!(a.transport.send(&device, write).wait().await, Ok(ServiceAck::Simple));
    assert_eq!(
        read(&a.transport, &device, av(7), PropertyId::PresentValue).await,
        DataValue::Real(72.5)
    );

    let unknown = WritePropertyRequest::new(av(99), PropertyId::PresentValue, DataValue::Real(1.0));
    assert!(matches!(
        a.transport.send(&device, unknown).wait().await,
        Err(RequestError::Remote { .. })
    ));

    a.transport.terminate().await;
    b.transport.terminate().await;
}

#[tokio::test]
async fn segmented_write_property_multiple() {
    init_logging();
    let network = MemoryNetwork::new();
    let a = node(&network, TransportConfig::new(1));
    let b = node(&network, TransportConfig::new(2));
    with_analog_values(&b, 1000);
    let device = discover(&a.transport, 2).await;

    let btus = DataValue::Enumerated(EngineeringUnits::Btus.to_u32());
    let request = WritePropertyMultipleRequest {
        specs: (0..1000)
            .map(|i| WriteAccessSpecification {
                object_id: av(i),
                properties: vec![PropertyValue::new(PropertyId::Units, btus.clone())],
            })
            .collect(),
    };
    assert_eq!(a.transport.send(&device, request).wait().await, Ok(ServiceAck::Simple));
    assert_eq!(read(&a.transport, &device, av(567), PropertyId::Units).await, btus);
    assert_eq!(b.store.read(av(999), PropertyId::Units, None), Ok(btus));

    a.transport.terminate().await;
    b.transport.terminate().await;
}

#[tokio::test]
async fn gap_in_response_segments_aborts() {
    init_logging();
    let network = MemoryNetwork::new();
    let a = node(
        &network,
        TransportConfig::new(1).with_max_apdu(bacwire_core::types::MaxApdu::UpTo480),
    );
    let b = node(&network, TransportConfig::new(2));
    with_analog_values(&b, 1000);
    let device = discover(&a.transport, 2).await;

    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();
    network.set_drop_filter(move |_, _, frame| {
        is_segmented_complex_ack(frame, 1) && !flag.swap(true, Ordering::SeqCst)
    });

    let outcome = a
        .transport
        .send(&device, ReadPropertyRequest::new(ObjectId::device(2), PropertyId::ObjectList))
        .wait()
        .await;
    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(
        outcome,
        Err(RequestError::local_abort(AbortReason::InvalidApduInThisState))
    );

    a.transport.terminate().await;
    b.transport.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn resent_segments_are_acked_again() {
    init_logging();
    let network = MemoryNetwork::new();
    let a = node(
        &network,
        TransportConfig::new(1)
            .with_max_apdu(bacwire_core::types::MaxApdu::UpTo480)
            .with_segment_timeout(Duration::from_secs(2)),
    );
    let b = node(
        &network,
        TransportConfig::new(2).with_segment_timeout(Duration::from_millis(500)),
    );
    with_analog_values(&b, 1000);
    let device = discover(&a.transport, 2).await;

    // Lose the first segment-ack so the server resends its first window.
    let acks_dropped = Arc::new(AtomicUsize::new(0));
    let counter = acks_dropped.clone();
    network.set_drop_filter(move |_, _, frame| {
        is_segment_ack(frame)
            && counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n == 0).then_some(1))
                .is_ok()
    });

    let list = read(&a.transport, &device, ObjectId::device(2), PropertyId::ObjectList).await;
    assert_eq!(acks_dropped.load(Ordering::SeqCst), 1);
    assert_eq!(list.object_ids(), b.store.object_ids());

    a.transport.terminate().await;
    b.transport.terminate().await;
}

#[tokio::test(start_paused = true)]
async fn late_reply_after_timeout_resolves_once() {
    init_logging();
    let network = MemoryNetwork::new();
    let a = node(
        &network,
        TransportConfig::new(1)
            .with_retries(1)
            .with_apdu_timeout(Duration::from_millis(200)),
    );
    let b = node(&network, TransportConfig::new(2));
    let device = discover(&a.transport, 2).await;
    network.set_latency(Duration::from_millis(300));

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let handle = a.transport.send_with(
        &device,
        ReadPropertyRequest::new(ObjectId::device(2), PropertyId::ObjectName),
        move |outcome| {
            assert_eq!(outcome, Err(RequestError::TimedOut));
            seen.fetch_add(1, Ordering::SeqCst);
        },
    );
    assert_eq!(handle.wait().await, Err(RequestError::TimedOut));

    // Both replies to the original and the retransmission arrive late.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.try_outcome(), Some(Err(RequestError::TimedOut)));

    a.transport.terminate().await;
    b.transport.terminate().await;
}

#[tokio::test]
async fn invoke_ids_run_out_after_256_outstanding() {
    init_logging();
    let network = MemoryNetwork::new();
    let a = node(&network, TransportConfig::new(1));
    let silent = network.link_at(MacAddress::station(200)).unwrap();
    let device = RemoteDevice::new(9, silent.address())
        .with_capabilities(1476, bacwire_core::types::Segmentation::SegmentedBoth);
    let request = || ReadPropertyRequest::new(ObjectId::device(9), PropertyId::ObjectName);

    let handles: Vec<_> = (0..256).map(|_| a.transport.send(&device, request())).collect();
    let mut buf = [0u8; 1600];
    let mut ids = HashSet::new();
    for _ in 0..256 {
        let (len, _) = timeout(WAIT, silent.recv(&mut buf)).await.unwrap().unwrap();
        let (_, apdu) = split_frame(&buf[..len]).unwrap().unwrap();
        let header = ConfirmedRequestHeader::decode(&mut Reader::new(apdu)).unwrap();
        assert!(ids.insert(header.invoke_id), "duplicate invoke id {}", header.invoke_id);
    }
    assert_eq!(ids.len(), 256);

    assert_eq!(
        a.transport.send(&device, request()).wait().await,
        Err(RequestError::InvokeIdsExhausted)
    );
    assert!(handles.iter().all(|handle| !handle.is_resolved()));

    a.transport.terminate().await;
    for handle in handles {
        assert_eq!(handle.wait().await, Err(RequestError::Shutdown));
    }
}
