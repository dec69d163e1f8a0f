//! The task that owns every transaction.
//!
//! All state lives here and is touched only by [`Engine::run`]. Callers,
//! the reader task and timers talk to it through [`Event`]s on one queue, so
//! no transaction state is ever shared between tasks.

use crate::config::TransportConfig;
use crate::frame::{self, COMPLEX_ACK_HEADER_LEN, CONFIRMED_HEADER_LEN};
use crate::handle::{Outcome, Resolver, ServiceAck};
use crate::invoke::InvokeRegistry;
use crate::registry::DeviceRegistry;
use crate::request::{PendingRequest, RequestState};
use crate::segmentation::{
    self, segment_data_len, AckOutcome, ReassemblyBuffer, SegmentOutcome, SegmentWindow,
    MAX_SEGMENTS,
};
use crate::server::{
    reject_reason, ClientLimits, ServerPhase, ServerTransaction, ServiceFailure, ServiceHandler,
};
use crate::{RequestError, TransportError};
use bacwire_core::apdu::{
    AbortPdu, AbortReason, ApduType, BacnetError, ComplexAckHeader, ConfirmedRequestHeader,
    RejectPdu, SegmentAck, SimpleAck, UnconfirmedRequestHeader, COMPLEX_ACK_SEGMENTED_HEADER_LEN,
    CONFIRMED_SEGMENTED_HEADER_LEN,
};
use bacwire_core::encoding::reader::Reader;
use bacwire_core::npdu::split_frame;
use bacwire_core::services::{ComplexAck, ConfirmedRequest, UnconfirmedRequest};
use bacwire_core::types::{ErrorClass, ErrorCode, Segmentation};
use bacwire_core::{DecodeError, EncodeError};
use bacwire_datalink::{DataLink, DataLinkAddress, DataLinkError, MAX_FRAME_LEN};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A confirmed request handed to the engine by the transport.
pub(crate) struct Submission {
    pub destination: DataLinkAddress,
    pub service_choice: u8,
    pub payload: Vec<u8>,
    /// Octets the peer accepts.
    pub peer_max_apdu: usize,
    pub peer_segmentation: Segmentation,
    pub resolver: Resolver,
}

pub(crate) enum Event {
    Frame {
        source: DataLinkAddress,
        frame: Vec<u8>,
    },
    Submit(Submission),
    Unconfirmed {
        /// `None` broadcasts on the local network.
        destination: Option<DataLinkAddress>,
        request: UnconfirmedRequest,
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    Timeout {
        key: TimerKey,
        generation: u64,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKey {
    Client(u8),
    Server(DataLinkAddress, u8),
}

/// An armed timeout. Dropping it cancels the timeout; a timeout that fires
/// anyway is recognized as stale by its generation.
pub(crate) struct Timer {
    generation: u64,
    task: JoinHandle<()>,
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("generation", &self.generation)
            .finish()
    }
}

fn is_current(timer: &Option<Timer>, generation: u64) -> bool {
    timer.as_ref().is_some_and(|t| t.generation == generation)
}

struct Timers {
    events: mpsc::UnboundedSender<Event>,
    next_generation: u64,
}

impl Timers {
    fn arm(&mut self, key: TimerKey, after: Duration) -> Timer {
        self.next_generation += 1;
        let generation = self.next_generation;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(Event::Timeout { key, generation });
        });
        Timer { generation, task }
    }
}

type TransactionKey = (DataLinkAddress, u8);

/// A segmented message received in full. Retransmissions of its segments are
/// acknowledged again until `until` and never delivered a second time.
struct Settled {
    service_choice: u8,
    buffer: ReassemblyBuffer,
    until: Instant,
}

impl Settled {
    /// The sequence number to acknowledge again if this segment repeats one
    /// already received.
    fn repeat_ack(
        &self,
        service_choice: u8,
        sequence_number: u8,
        data: &[u8],
        now: Instant,
    ) -> Option<u8> {
        let repeated = now < self.until
            && service_choice == self.service_choice
            && self.buffer.holds(sequence_number, data);
        repeated.then(|| self.buffer.last_received().unwrap_or(sequence_number))
    }
}

fn settle(
    settled: &mut HashMap<TransactionKey, Settled>,
    key: TransactionKey,
    entry: Settled,
    now: Instant,
) {
    settled.retain(|_, entry| entry.until > now);
    settled.insert(key, entry);
}

pub(crate) struct Engine<D> {
    link: Arc<D>,
    config: TransportConfig,
    registry: DeviceRegistry,
    handler: Arc<dyn ServiceHandler>,
    timers: Timers,
    invokes: InvokeRegistry<PendingRequest>,
    transactions: HashMap<TransactionKey, ServerTransaction>,
    /// Requests from peers that were reassembled and served.
    settled_requests: HashMap<TransactionKey, Settled>,
    /// Segmented responses to our own requests.
    settled_responses: HashMap<TransactionKey, Settled>,
}

/// Pending request for a reply from `source`, if the reply belongs to it.
fn correlate(
    invokes: &mut InvokeRegistry<PendingRequest>,
    source: DataLinkAddress,
    invoke_id: u8,
    service_choice: Option<u8>,
) -> Option<&mut PendingRequest> {
    let pending = invokes.lookup_mut(invoke_id)?;
    if pending.destination != source {
        return None;
    }
    if service_choice.is_some_and(|choice| choice != pending.service_choice) {
        return None;
    }
    Some(pending)
}

fn request_header(
    config: &TransportConfig,
    invoke_id: u8,
    service_choice: u8,
    segment: Option<(u8, bool)>,
) -> ConfirmedRequestHeader {
    ConfirmedRequestHeader {
        segmented: segment.is_some(),
        more_follows: segment.is_some_and(|(_, more)| more),
        segmented_response_accepted: config.segmentation.can_receive(),
        max_segments: config.max_segments.to_u8(),
        max_apdu: config.max_apdu.to_u8(),
        invoke_id,
        sequence_number: segment.map(|(seq, _)| seq),
        proposed_window_size: segment.map(|_| config.window_size),
        service_choice,
    }
}

/// Sends a frame whose loss the protocol recovers from by itself.
async fn send_logged<D: DataLink>(
    link: &D,
    destination: DataLinkAddress,
    frame: Result<Vec<u8>, EncodeError>,
) {
    let result = match frame {
        Ok(bytes) => link.send(destination, &bytes).await.map_err(TransportError::from),
        Err(err) => Err(err.into()),
    };
    if let Err(err) = result {
        log::warn!("send to {destination} failed: {err}");
    }
}

fn decode_complex_ack(service_choice: u8, payload: &[u8]) -> Outcome {
    ComplexAck::decode(service_choice, payload)
        .map(ServiceAck::Complex)
        .map_err(RequestError::from)
}

impl<D: DataLink> Engine<D> {
    pub(crate) fn new(
        link: Arc<D>,
        config: TransportConfig,
        registry: DeviceRegistry,
        handler: Arc<dyn ServiceHandler>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            link,
            invokes: InvokeRegistry::new(config.invoke_id_grace),
            config,
            registry,
            handler,
            timers: Timers {
                events,
                next_generation: 0,
            },
            transactions: HashMap::new(),
            settled_requests: HashMap::new(),
            settled_responses: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        log::debug!("engine for device {} started", self.config.device_instance);
        while let Some(event) = events.recv().await {
            match event {
                Event::Frame { source, frame } => self.on_frame(source, &frame).await,
                Event::Submit(submission) => self.submit(submission).await,
                Event::Unconfirmed {
                    destination,
                    request,
                    done,
                } => {
                    let result = self.send_unconfirmed(destination, &request).await;
                    let _ = done.send(result);
                }
                Event::Timeout { key, generation } => self.on_timeout(key, generation).await,
                Event::Shutdown => break,
            }
        }
        self.shut_down();
    }

    fn shut_down(&mut self) {
        let pending = self.invokes.drain();
        log::debug!(
            "engine for device {} stopping with {} requests outstanding",
            self.config.device_instance,
            pending.len()
        );
        for request in pending {
            request.finish(Err(RequestError::Shutdown));
        }
        self.transactions.clear();
        self.settled_requests.clear();
        self.settled_responses.clear();
    }

    /// How long a peer may keep retransmitting the segments of a finished
    /// exchange.
    fn settle_period(&self) -> Duration {
        self.config.segment_timeout * (u32::from(self.config.retries) + 1)
    }

    /// Settles the request. The id of a segmented exchange stays unused for
    /// the settle period so late segments cannot match a newer request.
    fn finish(&mut self, invoke_id: u8, outcome: Outcome) {
        let hold = match self.invokes.lookup(invoke_id) {
            Some(pending) if pending.outgoing.is_some() || pending.incoming.is_some() => {
                self.settle_period()
            }
            _ => Duration::ZERO,
        };
        if let Some(pending) = self.invokes.release_held(invoke_id, Instant::now(), hold) {
            pending.finish(outcome);
        }
    }

    async fn send_to(&self, destination: DataLinkAddress, frame: Vec<u8>) -> Result<(), TransportError> {
        self.link.send(destination, &frame).await?;
        Ok(())
    }

    async fn send_unconfirmed(
        &self,
        destination: Option<DataLinkAddress>,
        request: &UnconfirmedRequest,
    ) -> Result<(), TransportError> {
        let destination = destination.unwrap_or_else(|| self.link.broadcast_address());
        self.send_to(destination, frame::unconfirmed(request)?).await
    }

    // Client side.

    async fn submit(&mut self, submission: Submission) {
        let now = Instant::now();
        if !self.invokes.available(now) {
            log::warn!(
                "no invoke id free for request to {}",
                submission.destination
            );
            submission
                .resolver
                .resolve(Err(RequestError::InvokeIdsExhausted));
            return;
        }

        let Submission {
            destination,
            service_choice,
            payload,
            peer_max_apdu,
            peer_segmentation,
            resolver,
        } = submission;
        let max_apdu = peer_max_apdu.min(self.config.max_apdu.octets());
        let unsegmented = CONFIRMED_HEADER_LEN + payload.len() <= max_apdu;
        let retries = self.config.retries;
        let Some(invoke_id) = self.invokes.allocate(now, |id| {
            PendingRequest::new(
                id,
                destination,
                service_choice,
                payload,
                max_apdu,
                retries,
                resolver,
            )
        }) else {
            return;
        };
        log::debug!("invoke {invoke_id}: service {service_choice} to {destination}");

        if unsegmented {
            self.transmit_request(invoke_id).await;
        } else {
            self.start_segmented_request(invoke_id, peer_segmentation)
                .await;
        }
    }

    async fn transmit_request(&mut self, invoke_id: u8) {
        let Some(pending) = self.invokes.lookup_mut(invoke_id) else {
            return;
        };
        pending.transition(RequestState::Sending);
        let header = request_header(&self.config, invoke_id, pending.service_choice, None);
        let sent = match frame::confirmed_request(&header, &pending.payload) {
            Ok(bytes) => self
                .link
                .send(pending.destination, &bytes)
                .await
                .map_err(RequestError::from),
            Err(err) => Err(err.into()),
        };
        match sent {
            Ok(()) => {
                pending.transition(RequestState::AwaitingFinalResponse);
                pending.timer = Some(
                    self.timers
                        .arm(TimerKey::Client(invoke_id), self.config.apdu_timeout),
                );
            }
            Err(err) => self.finish(invoke_id, Err(err)),
        }
    }

    async fn start_segmented_request(&mut self, invoke_id: u8, peer_segmentation: Segmentation) {
        if !self.config.segmentation.can_transmit() || !peer_segmentation.can_receive() {
            self.finish(
                invoke_id,
                Err(RequestError::local_abort(
                    AbortReason::SegmentationNotSupported,
                )),
            );
            return;
        }
        let window_size = self.config.window_size;
        let Some(pending) = self.invokes.lookup_mut(invoke_id) else {
            return;
        };
        let chunk_len = segment_data_len(pending.max_apdu, CONFIRMED_SEGMENTED_HEADER_LEN);
        let segments = segmentation::split(&pending.payload, chunk_len);
        if segments.len() > MAX_SEGMENTS {
            let count = segments.len();
            self.finish(
                invoke_id,
                Err(RequestError::TooManySegments { segments: count }),
            );
            return;
        }
        log::debug!(
            "invoke {invoke_id}: sending {} segments of up to {chunk_len} bytes",
            segments.len()
        );
        pending.outgoing = Some(SegmentWindow::new(segments, window_size));
        self.send_request_batch(invoke_id).await;
    }

    async fn send_request_batch(&mut self, invoke_id: u8) {
        let Some(pending) = self.invokes.lookup_mut(invoke_id) else {
            return;
        };
        let Some(window) = pending.outgoing.as_mut() else {
            return;
        };
        let mut frames = Vec::new();
        for index in window.next_batch() {
            let header = request_header(
                &self.config,
                invoke_id,
                pending.service_choice,
                Some((index as u8, window.more_follows(index))),
            );
            frames.push(frame::confirmed_request(&header, window.segment(index)));
        }
        pending.transition(RequestState::Sending);

        let mut sent = Ok(());
        for frame in frames {
            sent = match frame {
                Ok(bytes) => self
                    .link
                    .send(pending.destination, &bytes)
                    .await
                    .map_err(RequestError::from),
                Err(err) => Err(err.into()),
            };
            if sent.is_err() {
                break;
            }
        }
        match sent {
            Ok(()) => {
                pending.transition(RequestState::AwaitingSegmentAck);
                pending.timer = Some(
                    self.timers
                        .arm(TimerKey::Client(invoke_id), self.config.segment_timeout),
                );
            }
            Err(err) => self.finish(invoke_id, Err(err)),
        }
    }

    async fn on_request_segment_ack(&mut self, source: DataLinkAddress, ack: SegmentAck) {
        let invoke_id = ack.invoke_id;
        let Some(pending) = correlate(&mut self.invokes, source, invoke_id, None) else {
            return;
        };
        if pending.state() != RequestState::AwaitingSegmentAck {
            return;
        }
        let Some(window) = pending.outgoing.as_mut() else {
            return;
        };
        if ack.negative_ack {
            log::debug!(
                "invoke {invoke_id}: negative ack after segment {}",
                ack.sequence_number
            );
            window.negative_ack(ack.sequence_number, ack.actual_window_size);
            self.send_request_batch(invoke_id).await;
            return;
        }
        match window.acknowledge(ack.sequence_number, ack.actual_window_size) {
            AckOutcome::Ignored => {}
            AckOutcome::Advanced => {
                pending.retries_remaining = self.config.retries;
                self.send_request_batch(invoke_id).await;
            }
            AckOutcome::Complete => {
                pending.retries_remaining = self.config.retries;
                pending.transition(RequestState::AwaitingFinalResponse);
                pending.timer = Some(
                    self.timers
                        .arm(TimerKey::Client(invoke_id), self.config.apdu_timeout),
                );
            }
        }
    }

    async fn on_client_timeout(&mut self, invoke_id: u8, generation: u64) {
        let Some(pending) = self.invokes.lookup_mut(invoke_id) else {
            return;
        };
        if !is_current(&pending.timer, generation) {
            return;
        }
        pending.timer = None;
        if pending.retries_remaining == 0 {
            log::debug!("invoke {invoke_id}: no retries left in {}", pending.state());
            self.finish(invoke_id, Err(RequestError::TimedOut));
            return;
        }
        pending.retries_remaining -= 1;
        log::debug!(
            "invoke {invoke_id}: timeout in {}, {} retries left",
            pending.state(),
            pending.retries_remaining
        );

        match pending.state() {
            RequestState::AwaitingSegmentAck => {
                if let Some(window) = pending.outgoing.as_mut() {
                    window.rewind();
                }
                self.send_request_batch(invoke_id).await;
            }
            RequestState::AwaitingFinalResponse if pending.outgoing.is_none() => {
                self.transmit_request(invoke_id).await;
            }
            RequestState::AwaitingFinalResponse => {
                // Every segment was acknowledged; the server holds the request.
                pending.timer = Some(
                    self.timers
                        .arm(TimerKey::Client(invoke_id), self.config.apdu_timeout),
                );
            }
            RequestState::AwaitingResponseSegment => {
                let Some(buffer) = pending.incoming.as_ref() else {
                    return;
                };
                let nak = SegmentAck {
                    negative_ack: true,
                    sent_by_server: false,
                    invoke_id,
                    sequence_number: buffer.last_received().unwrap_or(0),
                    actual_window_size: buffer.window_size(),
                };
                send_logged(self.link.as_ref(), pending.destination, frame::segment_ack(&nak))
                    .await;
                pending.timer = Some(
                    self.timers
                        .arm(TimerKey::Client(invoke_id), self.config.segment_timeout),
                );
            }
            _ => {}
        }
    }

    fn on_simple_ack(&mut self, source: DataLinkAddress, ack: SimpleAck) {
        if correlate(
            &mut self.invokes,
            source,
            ack.invoke_id,
            Some(ack.service_choice),
        )
        .is_some()
        {
            self.finish(ack.invoke_id, Ok(ServiceAck::Simple));
        }
    }

    async fn on_complex_ack(
        &mut self,
        source: DataLinkAddress,
        header: ComplexAckHeader,
        payload: &[u8],
    ) {
        let invoke_id = header.invoke_id;
        let settle_period = self.settle_period();
        let Some(pending) = correlate(
            &mut self.invokes,
            source,
            invoke_id,
            Some(header.service_choice),
        ) else {
            if !self.repeat_response_ack(source, &header, payload).await {
                log::debug!("unmatched complex ack {invoke_id} from {source}");
            }
            return;
        };

        if !header.segmented {
            let outcome = decode_complex_ack(header.service_choice, payload);
            self.finish(invoke_id, outcome);
            return;
        }
        if !self.config.segmentation.can_receive() {
            send_logged(
                self.link.as_ref(),
                source,
                frame::abort(false, invoke_id, AbortReason::SegmentationNotSupported),
            )
            .await;
            self.finish(
                invoke_id,
                Err(RequestError::local_abort(
                    AbortReason::SegmentationNotSupported,
                )),
            );
            return;
        }

        if pending.incoming.is_none() {
            let window = header.proposed_window_size.unwrap_or(1);
            pending.incoming = Some(ReassemblyBuffer::new(window, self.config.reassembly_limit));
            pending.transition(RequestState::AwaitingResponseSegment);
        }
        let Some(buffer) = pending.incoming.as_mut() else {
            return;
        };
        let window = buffer.window_size();
        let sequence_number = header.sequence_number.unwrap_or(0);
        let segment_ack = |sequence_number| SegmentAck {
            negative_ack: false,
            sent_by_server: false,
            invoke_id,
            sequence_number,
            actual_window_size: window,
        };

        match buffer.accept(sequence_number, header.more_follows, payload) {
            SegmentOutcome::Accepted { ack } => {
                if let Some(seq) = ack {
                    send_logged(self.link.as_ref(), source, frame::segment_ack(&segment_ack(seq)))
                        .await;
                }
                pending.retries_remaining = self.config.retries;
                pending.timer = Some(
                    self.timers
                        .arm(TimerKey::Client(invoke_id), self.config.segment_timeout),
                );
            }
            SegmentOutcome::Duplicate { ack } => {
                log::debug!("invoke {invoke_id}: duplicate segment {sequence_number}");
                send_logged(self.link.as_ref(), source, frame::segment_ack(&segment_ack(ack)))
                    .await;
            }
            SegmentOutcome::Complete { ack, payload } => {
                send_logged(self.link.as_ref(), source, frame::segment_ack(&segment_ack(ack)))
                    .await;
                let now = Instant::now();
                if let Some(buffer) = pending.incoming.clone() {
                    settle(
                        &mut self.settled_responses,
                        (source, invoke_id),
                        Settled {
                            service_choice: header.service_choice,
                            buffer,
                            until: now + settle_period,
                        },
                        now,
                    );
                }
                let outcome = decode_complex_ack(header.service_choice, &payload);
                self.finish(invoke_id, outcome);
            }
            SegmentOutcome::OutOfOrder { expected, received } => {
                log::debug!(
                    "invoke {invoke_id}: expected segment {expected}, got {received}; aborting"
                );
                send_logged(
                    self.link.as_ref(),
                    source,
                    frame::abort(false, invoke_id, AbortReason::InvalidApduInThisState),
                )
                .await;
                self.finish(
                    invoke_id,
                    Err(RequestError::local_abort(
                        AbortReason::InvalidApduInThisState,
                    )),
                );
            }
            SegmentOutcome::TooLarge => {
                let limit = self.config.reassembly_limit;
                send_logged(
                    self.link.as_ref(),
                    source,
                    frame::abort(false, invoke_id, AbortReason::BufferOverflow),
                )
                .await;
                self.finish(invoke_id, Err(RequestError::ResponseTooLarge { limit }));
            }
        }
    }

    /// Acknowledges again a retransmitted segment of a response that was
    /// already delivered. Returns whether the segment was one.
    async fn repeat_response_ack(
        &self,
        source: DataLinkAddress,
        header: &ComplexAckHeader,
        payload: &[u8],
    ) -> bool {
        if !header.segmented {
            return false;
        }
        let key = (source, header.invoke_id);
        let sequence_number = header.sequence_number.unwrap_or(0);
        let Some(settled) = self.settled_responses.get(&key) else {
            return false;
        };
        let Some(ack) =
            settled.repeat_ack(header.service_choice, sequence_number, payload, Instant::now())
        else {
            return false;
        };
        log::debug!(
            "invoke {}: segment {sequence_number} repeated after completion",
            header.invoke_id
        );
        let ack = SegmentAck {
            negative_ack: false,
            sent_by_server: false,
            invoke_id: header.invoke_id,
            sequence_number: ack,
            actual_window_size: settled.buffer.window_size(),
        };
        send_logged(self.link.as_ref(), source, frame::segment_ack(&ack)).await;
        true
    }

    fn on_error_pdu(&mut self, source: DataLinkAddress, pdu: BacnetError) {
        if correlate(
            &mut self.invokes,
            source,
            pdu.invoke_id,
            Some(pdu.service_choice),
        )
        .is_none()
        {
            return;
        }
        self.finish(
            pdu.invoke_id,
            Err(RequestError::Remote {
                service_choice: pdu.service_choice,
                error_class: pdu.error_class.map(ErrorClass::from_u32),
                error_code: pdu.error_code.map(ErrorCode::from_u32),
            }),
        );
    }

    fn on_reject(&mut self, source: DataLinkAddress, pdu: RejectPdu) {
        if correlate(&mut self.invokes, source, pdu.invoke_id, None).is_some() {
            self.finish(pdu.invoke_id, Err(RequestError::Rejected(pdu.reason)));
        }
    }

    fn on_abort(&mut self, source: DataLinkAddress, pdu: AbortPdu) {
        if !pdu.server {
            if self.transactions.remove(&(source, pdu.invoke_id)).is_some() {
                log::debug!(
                    "client {source} aborted invoke {}: {}",
                    pdu.invoke_id,
                    pdu.reason
                );
            }
            return;
        }
        if correlate(&mut self.invokes, source, pdu.invoke_id, None).is_some() {
            self.finish(
                pdu.invoke_id,
                Err(RequestError::Aborted {
                    reason: pdu.reason,
                    by_peer: true,
                }),
            );
        }
    }

    // Server side.

    async fn on_confirmed_request(
        &mut self,
        source: DataLinkAddress,
        header: ConfirmedRequestHeader,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let invoke_id = header.invoke_id;
        let key = (source, invoke_id);
        let limits = ClientLimits::from_header(&header);
        if !header.segmented {
            self.transactions.remove(&key);
            self.settled_requests.remove(&key);
            return self
                .serve(source, invoke_id, header.service_choice, limits, payload)
                .await;
        }
        if !self.config.segmentation.can_receive() {
            let abort = frame::abort(true, invoke_id, AbortReason::SegmentationNotSupported)?;
            return self.send_to(source, abort).await;
        }

        let sequence_number = header.sequence_number.unwrap_or(0);
        let reassembling = matches!(
            self.transactions.get(&key),
            Some(ServerTransaction {
                phase: ServerPhase::Reassembling(_),
                ..
            })
        );
        if !reassembling {
            if let Some(settled) = self.settled_requests.get(&key) {
                let now = Instant::now();
                if let Some(ack) =
                    settled.repeat_ack(header.service_choice, sequence_number, payload, now)
                {
                    log::debug!(
                        "request {invoke_id} from {source}: segment {sequence_number} \
                         repeated after it was served"
                    );
                    let ack = SegmentAck {
                        negative_ack: false,
                        sent_by_server: true,
                        invoke_id,
                        sequence_number: ack,
                        actual_window_size: settled.buffer.window_size(),
                    };
                    return self.send_to(source, frame::segment_ack(&ack)?).await;
                }
                self.settled_requests.remove(&key);
            }
        }
        if sequence_number == 0 && !reassembling {
            let window = header.proposed_window_size.unwrap_or(1);
            self.transactions.insert(
                key,
                ServerTransaction {
                    service_choice: header.service_choice,
                    limits,
                    phase: ServerPhase::Reassembling(ReassemblyBuffer::new(
                        window,
                        self.config.reassembly_limit,
                    )),
                    retries_remaining: self.config.retries,
                    timer: None,
                },
            );
        }
        let Some(ServerTransaction {
            phase: ServerPhase::Reassembling(buffer),
            retries_remaining,
            timer,
            ..
        }) = self.transactions.get_mut(&key)
        else {
            let abort = frame::abort(true, invoke_id, AbortReason::InvalidApduInThisState)?;
            return self.send_to(source, abort).await;
        };

        let window = buffer.window_size();
        let segment_ack = |sequence_number| SegmentAck {
            negative_ack: false,
            sent_by_server: true,
            invoke_id,
            sequence_number,
            actual_window_size: window,
        };
        match buffer.accept(sequence_number, header.more_follows, payload) {
            SegmentOutcome::Accepted { ack } => {
                *retries_remaining = self.config.retries;
                *timer = Some(self.timers.arm(
                    TimerKey::Server(source, invoke_id),
                    self.config.segment_timeout,
                ));
                if let Some(seq) = ack {
                    self.send_to(source, frame::segment_ack(&segment_ack(seq))?)
                        .await?;
                }
                Ok(())
            }
            SegmentOutcome::Duplicate { ack } => {
                self.send_to(source, frame::segment_ack(&segment_ack(ack))?)
                    .await
            }
            SegmentOutcome::Complete { ack, payload } => {
                let ack = segment_ack(ack);
                let Some(ServerTransaction {
                    service_choice,
                    limits,
                    phase: ServerPhase::Reassembling(buffer),
                    ..
                }) = self.transactions.remove(&key)
                else {
                    return Ok(());
                };
                let now = Instant::now();
                let until = now + self.settle_period();
                settle(
                    &mut self.settled_requests,
                    key,
                    Settled {
                        service_choice,
                        buffer,
                        until,
                    },
                    now,
                );
                self.send_to(source, frame::segment_ack(&ack)?).await?;
                self.serve(source, invoke_id, service_choice, limits, &payload)
                    .await
            }
            SegmentOutcome::OutOfOrder { expected, received } => {
                log::debug!(
                    "request {invoke_id} from {source}: expected segment {expected}, got {received}"
                );
                self.transactions.remove(&key);
                let abort = frame::abort(true, invoke_id, AbortReason::InvalidApduInThisState)?;
                self.send_to(source, abort).await
            }
            SegmentOutcome::TooLarge => {
                self.transactions.remove(&key);
                let abort = frame::abort(true, invoke_id, AbortReason::BufferOverflow)?;
                self.send_to(source, abort).await
            }
        }
    }

    async fn serve(
        &mut self,
        source: DataLinkAddress,
        invoke_id: u8,
        service_choice: u8,
        limits: ClientLimits,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let request = match ConfirmedRequest::decode(service_choice, payload) {
            Ok(request) => request,
            Err(err) => {
                log::debug!("rejecting request {invoke_id} from {source}: {err}");
                let reject = frame::reject(invoke_id, reject_reason(&err))?;
                return self.send_to(source, reject).await;
            }
        };
        let reply = match self.handler.confirmed(&source, request) {
            Ok(ServiceAck::Simple) => frame::simple_ack(invoke_id, service_choice)?,
            Ok(ServiceAck::Complex(ack)) => {
                return self
                    .respond_complex(source, invoke_id, service_choice, limits, &ack)
                    .await;
            }
            Err(ServiceFailure::Error {
                error_class,
                error_code,
            }) => frame::error(
                invoke_id,
                service_choice,
                error_class.to_u32(),
                error_code.to_u32(),
            )?,
            Err(ServiceFailure::Reject(reason)) => frame::reject(invoke_id, reason)?,
            Err(ServiceFailure::Abort(reason)) => frame::abort(true, invoke_id, reason)?,
        };
        self.send_to(source, reply).await
    }

    async fn respond_complex(
        &mut self,
        source: DataLinkAddress,
        invoke_id: u8,
        service_choice: u8,
        limits: ClientLimits,
        ack: &ComplexAck,
    ) -> Result<(), TransportError> {
        let payload = ack.to_vec()?;
        let max_apdu = limits.max_apdu.min(self.config.max_apdu.octets());
        if COMPLEX_ACK_HEADER_LEN + payload.len() <= max_apdu {
            let header = ComplexAckHeader {
                segmented: false,
                more_follows: false,
                invoke_id,
                sequence_number: None,
                proposed_window_size: None,
                service_choice,
            };
            return self
                .send_to(source, frame::complex_ack(&header, &payload)?)
                .await;
        }

        let segments = segmentation::split(
            &payload,
            segment_data_len(max_apdu, COMPLEX_ACK_SEGMENTED_HEADER_LEN),
        );
        let reason = if !limits.segmented_response_accepted || !self.config.segmentation.can_transmit() {
            Some(AbortReason::SegmentationNotSupported)
        } else if !limits.accepts_segments(segments.len()) {
            Some(AbortReason::ApduTooLong)
        } else {
            None
        };
        if let Some(reason) = reason {
            log::debug!(
                "cannot answer request {invoke_id} from {source} in {} segments: {reason}",
                segments.len()
            );
            return self
                .send_to(source, frame::abort(true, invoke_id, reason)?)
                .await;
        }

        log::debug!(
            "answering request {invoke_id} from {source} in {} segments",
            segments.len()
        );
        let key = (source, invoke_id);
        self.transactions.insert(
            key,
            ServerTransaction {
                service_choice,
                limits,
                phase: ServerPhase::Responding(SegmentWindow::new(
                    segments,
                    self.config.window_size,
                )),
                retries_remaining: self.config.retries,
                timer: None,
            },
        );
        self.send_response_batch(key).await
    }

    async fn send_response_batch(&mut self, key: TransactionKey) -> Result<(), TransportError> {
        let (source, invoke_id) = key;
        let Some(transaction) = self.transactions.get_mut(&key) else {
            return Ok(());
        };
        let ServerPhase::Responding(window) = &mut transaction.phase else {
            return Ok(());
        };
        let mut frames = Vec::new();
        for index in window.next_batch() {
            let header = ComplexAckHeader {
                segmented: true,
                more_follows: window.more_follows(index),
                invoke_id,
                sequence_number: Some(index as u8),
                proposed_window_size: Some(self.config.window_size),
                service_choice: transaction.service_choice,
            };
            frames.push(frame::complex_ack(&header, window.segment(index))?);
        }
        transaction.timer = Some(self.timers.arm(
            TimerKey::Server(source, invoke_id),
            self.config.segment_timeout,
        ));
        for frame in frames {
            self.link.send(source, &frame).await?;
        }
        Ok(())
    }

    async fn on_response_segment_ack(
        &mut self,
        source: DataLinkAddress,
        ack: SegmentAck,
    ) -> Result<(), TransportError> {
        let key = (source, ack.invoke_id);
        let Some(transaction) = self.transactions.get_mut(&key) else {
            return Ok(());
        };
        let ServerPhase::Responding(window) = &mut transaction.phase else {
            return Ok(());
        };
        if ack.negative_ack {
            window.negative_ack(ack.sequence_number, ack.actual_window_size);
            return self.send_response_batch(key).await;
        }
        match window.acknowledge(ack.sequence_number, ack.actual_window_size) {
            AckOutcome::Ignored => Ok(()),
            AckOutcome::Advanced => {
                transaction.retries_remaining = self.config.retries;
                self.send_response_batch(key).await
            }
            AckOutcome::Complete => {
                log::debug!("segmented response {} to {source} delivered", ack.invoke_id);
                self.transactions.remove(&key);
                Ok(())
            }
        }
    }

    async fn on_server_timeout(
        &mut self,
        key: TransactionKey,
        generation: u64,
    ) -> Result<(), TransportError> {
        let (source, invoke_id) = key;
        let Some(transaction) = self.transactions.get_mut(&key) else {
            return Ok(());
        };
        if !is_current(&transaction.timer, generation) {
            return Ok(());
        }
        transaction.timer = None;
        if transaction.retries_remaining == 0 {
            log::debug!("dropping stalled transaction {invoke_id} with {source}");
            self.transactions.remove(&key);
            return Ok(());
        }
        transaction.retries_remaining -= 1;
        match &mut transaction.phase {
            ServerPhase::Responding(window) => {
                window.rewind();
                self.send_response_batch(key).await
            }
            ServerPhase::Reassembling(buffer) => {
                let nak = SegmentAck {
                    negative_ack: true,
                    sent_by_server: true,
                    invoke_id,
                    sequence_number: buffer.last_received().unwrap_or(0),
                    actual_window_size: buffer.window_size(),
                };
                transaction.timer = Some(self.timers.arm(
                    TimerKey::Server(source, invoke_id),
                    self.config.segment_timeout,
                ));
                self.send_to(source, frame::segment_ack(&nak)?).await
            }
        }
    }

    async fn on_unconfirmed(
        &mut self,
        source: DataLinkAddress,
        request: UnconfirmedRequest,
    ) -> Result<(), TransportError> {
        match &request {
            UnconfirmedRequest::WhoIs(who_is) => {
                if who_is.matches(self.config.device_instance) {
                    let i_am = UnconfirmedRequest::from(self.config.i_am());
                    self.send_to(source, frame::unconfirmed(&i_am)?).await?;
                }
            }
            UnconfirmedRequest::IAm(i_am) => {
                if i_am.device_id.instance() != self.config.device_instance {
                    self.registry.upsert_i_am(source, i_am).await;
                }
            }
        }
        self.handler.unconfirmed(&source, &request);
        Ok(())
    }

    // Dispatch.

    async fn on_timeout(&mut self, key: TimerKey, generation: u64) {
        match key {
            TimerKey::Client(invoke_id) => self.on_client_timeout(invoke_id, generation).await,
            TimerKey::Server(source, invoke_id) => {
                if let Err(err) = self.on_server_timeout((source, invoke_id), generation).await {
                    log::warn!("retransmission to {source} failed: {err}");
                }
            }
        }
    }

    async fn on_frame(&mut self, source: DataLinkAddress, frame: &[u8]) {
        let apdu = match split_frame(frame) {
            Ok(Some((_, apdu))) => apdu,
            Ok(None) => {
                log::trace!("ignoring network message from {source}");
                return;
            }
            Err(err) => {
                log::warn!("dropping undecodable frame from {source}: {err}");
                return;
            }
        };
        match self.dispatch(source, apdu).await {
            Ok(()) => {}
            Err(TransportError::Decode(DecodeError::UnknownService(choice))) => {
                log::trace!("ignoring unconfirmed service {choice} from {source}");
            }
            Err(err) => log::warn!("dropping frame from {source}: {err}"),
        }
    }

    async fn dispatch(&mut self, source: DataLinkAddress, apdu: &[u8]) -> Result<(), TransportError> {
        let mut r = Reader::new(apdu);
        match ApduType::of(apdu) {
            Some(ApduType::ConfirmedRequest) => {
                let header = ConfirmedRequestHeader::decode(&mut r)?;
                self.on_confirmed_request(source, header, r.rest()).await
            }
            Some(ApduType::UnconfirmedRequest) => {
                let header = UnconfirmedRequestHeader::decode(&mut r)?;
                let request = UnconfirmedRequest::decode(header.service_choice, r.rest())?;
                self.on_unconfirmed(source, request).await
            }
            Some(ApduType::SimpleAck) => {
                self.on_simple_ack(source, SimpleAck::decode(&mut r)?);
                Ok(())
            }
            Some(ApduType::ComplexAck) => {
                let header = ComplexAckHeader::decode(&mut r)?;
                self.on_complex_ack(source, header, r.rest()).await;
                Ok(())
            }
            Some(ApduType::SegmentAck) => {
                let ack = SegmentAck::decode(&mut r)?;
                if ack.sent_by_server {
                    self.on_request_segment_ack(source, ack).await;
                    Ok(())
                } else {
                    self.on_response_segment_ack(source, ack).await
                }
            }
            Some(ApduType::Error) => {
                self.on_error_pdu(source, BacnetError::decode(&mut r)?);
                Ok(())
            }
            Some(ApduType::Reject) => {
                self.on_reject(source, RejectPdu::decode(&mut r)?);
                Ok(())
            }
            Some(ApduType::Abort) => {
                self.on_abort(source, AbortPdu::decode(&mut r)?);
                Ok(())
            }
            None => Err(DecodeError::InvalidValue.into()),
        }
    }
}

/// Forwards received frames to the engine until the link or the engine goes
/// away.
pub(crate) async fn read_frames<D: DataLink>(link: Arc<D>, events: mpsc::UnboundedSender<Event>) {
    let mut buf = vec![0u8; MAX_FRAME_LEN];
    loop {
        match link.recv(&mut buf).await {
            Ok((len, source)) => {
                let frame = buf[..len].to_vec();
                if events.send(Event::Frame { source, frame }).is_err() {
                    break;
                }
            }
            Err(DataLinkError::Closed) => {
                log::debug!("link closed, reader stopping");
                break;
            }
            Err(err) => log::warn!("receive failed: {err}"),
        }
    }
}
