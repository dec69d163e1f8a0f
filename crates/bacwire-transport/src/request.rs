//! Per-invocation state of an outgoing confirmed request.

use crate::engine::Timer;
use crate::handle::{Outcome, Resolver};
use crate::segmentation::{ReassemblyBuffer, SegmentWindow};
use crate::RequestError;
use bacwire_datalink::DataLinkAddress;
use std::fmt;

/// Lifecycle of a confirmed request.
///
/// `Idle -> Sending -> (AwaitingSegmentAck -> Sending)* -> AwaitingFinalResponse
/// -> [AwaitingResponseSegment ->] Complete | Rejected | Aborted | TimedOut`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Idle,
    Sending,
    AwaitingSegmentAck,
    AwaitingFinalResponse,
    AwaitingResponseSegment,
    Complete,
    Rejected,
    Aborted,
    TimedOut,
}

impl RequestState {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Rejected | Self::Aborted | Self::TimedOut
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition(self, next: RequestState) -> bool {
        use RequestState::*;
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return self != Idle || next == Aborted;
        }
        matches!(
            (self, next),
            (Idle, Sending)
                | (Sending, AwaitingSegmentAck)
                | (Sending, AwaitingFinalResponse)
                | (AwaitingSegmentAck, Sending)
                | (AwaitingSegmentAck, AwaitingFinalResponse)
                | (AwaitingSegmentAck, AwaitingResponseSegment)
                | (AwaitingFinalResponse, Sending)
                | (AwaitingFinalResponse, AwaitingResponseSegment)
                | (AwaitingResponseSegment, AwaitingResponseSegment)
        )
    }

    /// Terminal state reached by settling with `outcome`.
    pub fn for_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Ok(_) | Err(RequestError::Remote { .. }) => Self::Complete,
            Err(RequestError::Rejected(_)) => Self::Rejected,
            Err(RequestError::TimedOut) => Self::TimedOut,
            Err(_) => Self::Aborted,
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One outstanding confirmed request, keyed by its invoke id.
pub struct PendingRequest {
    pub invoke_id: u8,
    pub destination: DataLinkAddress,
    pub service_choice: u8,
    /// Encoded service request, without APDU header.
    pub payload: Vec<u8>,
    /// Largest APDU this exchange may put on the wire.
    pub max_apdu: usize,
    pub retries_remaining: u8,
    pub outgoing: Option<SegmentWindow>,
    pub incoming: Option<ReassemblyBuffer>,
    pub(crate) timer: Option<Timer>,
    state: RequestState,
    resolver: Resolver,
}

impl PendingRequest {
    pub(crate) fn new(
        invoke_id: u8,
        destination: DataLinkAddress,
        service_choice: u8,
        payload: Vec<u8>,
        max_apdu: usize,
        retries: u8,
        resolver: Resolver,
    ) -> Self {
        Self {
            invoke_id,
            destination,
            service_choice,
            payload,
            max_apdu,
            retries_remaining: retries,
            outgoing: None,
            incoming: None,
            timer: None,
            state: RequestState::Idle,
            resolver,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: RequestState) {
        debug_assert!(
            self.state.can_transition(next),
            "invoke {}: {} -> {}",
            self.invoke_id,
            self.state,
            next
        );
        log::trace!("invoke {}: {} -> {}", self.invoke_id, self.state, next);
        self.state = next;
    }

    /// Moves to the terminal state matching `outcome` and settles the handle.
    pub(crate) fn finish(mut self, outcome: Outcome) -> RequestState {
        let terminal = RequestState::for_outcome(&outcome);
        self.timer = None;
        self.transition(terminal);
        match &outcome {
            Ok(_) => log::debug!("invoke {} to {} complete", self.invoke_id, self.destination),
            Err(err) => log::debug!(
                "invoke {} to {} failed: {err}",
                self.invoke_id,
                self.destination
            ),
        }
        self.resolver.resolve(outcome);
        terminal
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("invoke_id", &self.invoke_id)
            .field("destination", &self.destination)
            .field("service_choice", &self.service_choice)
            .field("state", &self.state)
            .field("retries_remaining", &self.retries_remaining)
            .finish_non_exhaustive()
    }
}
