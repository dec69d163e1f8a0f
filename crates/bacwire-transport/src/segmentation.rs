//! Splitting outgoing APDU payloads into windowed segments and putting
//! incoming segments back together.
//!
//! Sequence numbers are the segment index; a message is limited to
//! [`MAX_SEGMENTS`] segments so they never wrap.

use std::ops::Range;

pub const MAX_SEGMENTS: usize = 256;
/// Floor for the data carried per segment, whatever the negotiated size.
pub const MIN_SEGMENT_DATA_LEN: usize = 32;

/// Splits `payload` into chunks of at most `chunk_len` bytes.
///
/// An empty payload still yields one (empty) segment.
pub fn split(payload: &[u8], chunk_len: usize) -> Vec<Vec<u8>> {
    let chunk_len = chunk_len.max(1);
    if payload.is_empty() {
        return vec![Vec::new()];
    }
    payload.chunks(chunk_len).map(<[u8]>::to_vec).collect()
}

/// Data bytes per segment for an APDU limit and header size.
pub fn segment_data_len(max_apdu: usize, header_len: usize) -> usize {
    max_apdu.saturating_sub(header_len).max(MIN_SEGMENT_DATA_LEN)
}

/// What an acknowledgement did to a [`SegmentWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The window moved; more segments remain.
    Advanced,
    /// Every segment is acknowledged.
    Complete,
    /// Stale or out of range; nothing changed.
    Ignored,
}

/// Sender side of a segmented message.
///
/// Invariant: `acked <= next_to_send <= segments.len()` and
/// `next_to_send - acked <= window_size`.
#[derive(Debug, Clone)]
pub struct SegmentWindow {
    segments: Vec<Vec<u8>>,
    window_size: u8,
    next_to_send: usize,
    acked: usize,
}

impl SegmentWindow {
    pub fn new(segments: Vec<Vec<u8>>, window_size: u8) -> Self {
        Self {
            segments,
            window_size: window_size.max(1),
            next_to_send: 0,
            acked: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn window_size(&self) -> u8 {
        self.window_size
    }

    /// Number of segments acknowledged so far.
    pub fn acked(&self) -> usize {
        self.acked
    }

    pub fn in_flight(&self) -> usize {
        self.next_to_send - self.acked
    }

    pub fn is_complete(&self) -> bool {
        self.acked == self.segments.len()
    }

    pub fn segment(&self, index: usize) -> &[u8] {
        &self.segments[index]
    }

    pub fn more_follows(&self, index: usize) -> bool {
        index + 1 < self.segments.len()
    }

    /// Segments that may go out now without exceeding the window.
    /// Marks them as sent.
    pub fn next_batch(&mut self) -> Range<usize> {
        let limit = (self.acked + usize::from(self.window_size)).min(self.segments.len());
        let start = self.next_to_send;
        if limit > start {
            self.next_to_send = limit;
            start..limit
        } else {
            start..start
        }
    }

    /// Forgets what was sent past the last ack so the next batch repeats it.
    pub fn rewind(&mut self) {
        self.next_to_send = self.acked;
    }

    /// Applies a segment-ack naming `sequence_number` as the highest segment
    /// the peer holds. The peer's `actual_window_size` becomes the window.
    pub fn acknowledge(&mut self, sequence_number: u8, actual_window_size: u8) -> AckOutcome {
        let seq = usize::from(sequence_number);
        if seq < self.acked || seq >= self.next_to_send {
            return AckOutcome::Ignored;
        }
        self.acked = seq + 1;
        self.window_size = actual_window_size.max(1);
        if self.is_complete() {
            AckOutcome::Complete
        } else {
            AckOutcome::Advanced
        }
    }

    /// Applies a negative ack: everything after `sequence_number` is resent.
    pub fn negative_ack(&mut self, sequence_number: u8, actual_window_size: u8) {
        let _ = self.acknowledge(sequence_number, actual_window_size);
        self.window_size = actual_window_size.max(1);
        self.rewind();
    }
}

/// What happened to one incoming segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Stored. `ack` is set when a window is full and must be acknowledged.
    Accepted { ack: Option<u8> },
    /// The final segment arrived; `payload` is the whole message.
    Complete { ack: u8, payload: Vec<u8> },
    /// Already held; acknowledge `ack` again and change nothing.
    Duplicate { ack: u8 },
    /// A gap in the sequence; the exchange must be aborted.
    OutOfOrder { expected: u8, received: u8 },
    /// Accepting it would exceed the byte limit or the segment count.
    TooLarge,
}

/// Receiver side of a segmented message. Only strictly in-order segments
/// are accepted.
#[derive(Debug, Clone)]
pub struct ReassemblyBuffer {
    segments: Vec<Vec<u8>>,
    window_size: u8,
    since_ack: u8,
    received_len: usize,
    limit: usize,
    complete: bool,
}

impl ReassemblyBuffer {
    /// `window_size` is the sender's proposed window.
    pub fn new(window_size: u8, limit: usize) -> Self {
        Self {
            segments: Vec::new(),
            window_size: window_size.max(1),
            since_ack: 0,
            received_len: 0,
            limit,
            complete: false,
        }
    }

    pub fn window_size(&self) -> u8 {
        self.window_size
    }

    /// Sequence number the next segment must carry.
    pub fn expected_next(&self) -> usize {
        self.segments.len()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Highest contiguous sequence number held, if any.
    pub fn last_received(&self) -> Option<u8> {
        self.segments.len().checked_sub(1).map(|seq| seq as u8)
    }

    /// Whether segment `sequence_number` was received with exactly `data`.
    pub fn holds(&self, sequence_number: u8, data: &[u8]) -> bool {
        self.segments
            .get(usize::from(sequence_number))
            .is_some_and(|segment| segment == data)
    }

    pub fn accept(&mut self, sequence_number: u8, more_follows: bool, data: &[u8]) -> SegmentOutcome {
        let seq = usize::from(sequence_number);
        let expected = self.expected_next();
        if seq < expected || self.complete {
            return SegmentOutcome::Duplicate {
                ack: self.last_received().unwrap_or(sequence_number),
            };
        }
        if seq > expected || expected >= MAX_SEGMENTS {
            if expected >= MAX_SEGMENTS {
                return SegmentOutcome::TooLarge;
            }
            return SegmentOutcome::OutOfOrder {
                expected: expected as u8,
                received: sequence_number,
            };
        }
        if self.received_len.saturating_add(data.len()) > self.limit
            || (more_follows && seq + 1 >= MAX_SEGMENTS)
        {
            return SegmentOutcome::TooLarge;
        }

        self.segments.push(data.to_vec());
        self.received_len += data.len();

        if !more_follows {
            self.complete = true;
            self.since_ack = 0;
            return SegmentOutcome::Complete {
                ack: sequence_number,
                payload: self.segments.concat(),
            };
        }

        self.since_ack += 1;
        if self.since_ack >= self.window_size {
            self.since_ack = 0;
            SegmentOutcome::Accepted {
                ack: Some(sequence_number),
            }
        } else {
            SegmentOutcome::Accepted { ack: None }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        segment_data_len, split, AckOutcome, ReassemblyBuffer, SegmentOutcome, SegmentWindow,
        MAX_SEGMENTS,
    };
    use proptest::prelude::*;

    #[test]
    fn split_respects_chunk_len() {
        let payload: Vec<u8> = (0..=255).collect();
        let segments = split(&payload, 100);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].len(), 56);
        assert_eq!(split(&[], 10), vec![Vec::<u8>::new()]);
        assert_eq!(segment_data_len(1476, 6), 1470);
        assert_eq!(segment_data_len(20, 6), 32);
    }

    #[test]
    fn window_slides_on_ack() {
        let mut window = SegmentWindow::new(split(&[0u8; 50], 10), 2);
        assert_eq!(window.next_batch(), 0..2);
        assert_eq!(window.next_batch(), 2..2);
        assert_eq!(window.acknowledge(1, 3), AckOutcome::Advanced);
        assert_eq!(window.window_size(), 3);
        assert_eq!(window.next_batch(), 2..5);
        assert_eq!(window.acknowledge(1, 3), AckOutcome::Ignored);
        assert_eq!(window.acknowledge(3, 3), AckOutcome::Advanced);
        assert_eq!(window.in_flight(), 1);
        assert_eq!(window.acknowledge(4, 3), AckOutcome::Complete);
        assert!(window.is_complete());
        assert!(!window.more_follows(4));
        assert!(window.more_follows(3));
    }

    #[test]
    fn ack_beyond_sent_is_ignored() {
        let mut window = SegmentWindow::new(split(&[0u8; 50], 10), 2);
        window.next_batch();
        assert_eq!(window.acknowledge(3, 2), AckOutcome::Ignored);
        assert_eq!(window.acked(), 0);
    }

    #[test]
    fn negative_ack_resends_from_gap() {
        let mut window = SegmentWindow::new(split(&[0u8; 50], 10), 4);
        assert_eq!(window.next_batch(), 0..4);
        window.negative_ack(0, 2);
        assert_eq!(window.acked(), 1);
        assert_eq!(window.next_batch(), 1..3);
    }

    #[test]
    fn timeout_rewind_repeats_window() {
        let mut window = SegmentWindow::new(split(&[0u8; 30], 10), 2);
        assert_eq!(window.next_batch(), 0..2);
        window.rewind();
        assert_eq!(window.next_batch(), 0..2);
    }

    #[test]
    fn reassembly_acks_per_window() {
        let mut buf = ReassemblyBuffer::new(2, 1024);
        assert_eq!(buf.accept(0, true, b"ab"), SegmentOutcome::Accepted { ack: None });
        assert_eq!(
            buf.accept(1, true, b"cd"),
            SegmentOutcome::Accepted { ack: Some(1) }
        );
        assert_eq!(
            buf.accept(2, false, b"e"),
            SegmentOutcome::Complete {
                ack: 2,
                payload: b"abcde".to_vec()
            }
        );
        assert!(buf.is_complete());
        assert!(buf.holds(1, b"cd"));
        assert!(!buf.holds(1, b"cx"));
        assert!(!buf.holds(3, b""));
        assert_eq!(buf.accept(2, false, b"e"), SegmentOutcome::Duplicate { ack: 2 });
    }

    #[test]
    fn duplicate_is_reacked_without_change() {
        let mut buf = ReassemblyBuffer::new(4, 1024);
        buf.accept(0, true, b"ab");
        buf.accept(1, true, b"cd");
        assert_eq!(buf.accept(0, true, b"ab"), SegmentOutcome::Duplicate { ack: 1 });
        assert_eq!(buf.expected_next(), 2);
        match buf.accept(2, false, b"ef") {
            SegmentOutcome::Complete { payload, .. } => assert_eq!(payload, b"abcdef"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn gap_is_out_of_order() {
        let mut buf = ReassemblyBuffer::new(4, 1024);
        buf.accept(0, true, b"ab");
        assert_eq!(
            buf.accept(2, true, b"ef"),
            SegmentOutcome::OutOfOrder {
                expected: 1,
                received: 2
            }
        );
        let mut fresh = ReassemblyBuffer::new(4, 1024);
        assert!(matches!(
            fresh.accept(3, true, b"x"),
            SegmentOutcome::OutOfOrder { expected: 0, .. }
        ));
    }

    #[test]
    fn limits_are_enforced() {
        let mut buf = ReassemblyBuffer::new(4, 3);
        assert_eq!(buf.accept(0, true, b"ab"), SegmentOutcome::Accepted { ack: None });
        assert_eq!(buf.accept(1, false, b"cd"), SegmentOutcome::TooLarge);

        let mut buf = ReassemblyBuffer::new(127, usize::MAX);
        for seq in 0..(MAX_SEGMENTS - 1) {
            assert!(matches!(
                buf.accept(seq as u8, true, b"x"),
                SegmentOutcome::Accepted { .. }
            ));
        }
        assert_eq!(buf.accept(255, true, b"x"), SegmentOutcome::TooLarge);
    }

    fn transfer(payload: &[u8], chunk_len: usize, window: u8) -> Vec<u8> {
        let mut tx = SegmentWindow::new(split(payload, chunk_len), window);
        let mut rx = ReassemblyBuffer::new(window, usize::MAX);
        loop {
            let batch = tx.next_batch();
            assert!(!batch.is_empty());
            let mut last_ack = None;
            for i in batch {
                match rx.accept(i as u8, tx.more_follows(i), tx.segment(i)) {
                    SegmentOutcome::Accepted { ack } => last_ack = ack.or(last_ack),
                    SegmentOutcome::Complete { ack, payload } => {
                        assert_eq!(tx.acknowledge(ack, window), AckOutcome::Complete);
                        return payload;
                    }
                    other => panic!("unexpected {other:?}"),
                }
            }
            let ack = last_ack.expect("window ends with an ack");
            assert_eq!(tx.acknowledge(ack, window), AckOutcome::Advanced);
        }
    }

    proptest! {
        #[test]
        fn split_then_reassemble_is_identity(
            payload in proptest::collection::vec(any::<u8>(), 1..20_000),
            max_apdu in prop::sample::select(vec![50usize, 128, 206, 480, 1024, 1476]),
            window in 1u8..=8,
        ) {
            let chunk = segment_data_len(max_apdu, 6);
            prop_assume!(payload.len().div_ceil(chunk) <= MAX_SEGMENTS);
            prop_assert_eq!(transfer(&payload, chunk, window), payload);
        }
    }
}
