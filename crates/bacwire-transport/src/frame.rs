//! Builders for the NPDU + APDU frames the engine puts on the wire.

use bacwire_core::apdu::{
    AbortPdu, AbortReason, BacnetError, ComplexAckHeader, ConfirmedRequestHeader, RejectPdu,
    RejectReason, SegmentAck, SimpleAck, UnconfirmedRequestHeader,
};
use bacwire_core::encoding::writer::{encode_to_vec, Writer};
use bacwire_core::npdu::Npdu;
use bacwire_core::services::UnconfirmedRequest;
use bacwire_core::EncodeError;

/// Octets ahead of the payload in an unsegmented confirmed request.
pub(crate) const CONFIRMED_HEADER_LEN: usize = 4;
/// Octets ahead of the payload in an unsegmented complex ack.
pub(crate) const COMPLEX_ACK_HEADER_LEN: usize = 3;

fn frame(
    expecting_reply: bool,
    apdu: impl Fn(&mut Writer<'_>) -> Result<(), EncodeError>,
) -> Result<Vec<u8>, EncodeError> {
    encode_to_vec(|w| {
        Npdu::application(expecting_reply).encode(w)?;
        apdu(w)
    })
}

pub(crate) fn confirmed_request(
    header: &ConfirmedRequestHeader,
    payload: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    frame(true, |w| {
        header.encode(w)?;
        w.write_all(payload)
    })
}

pub(crate) fn complex_ack(
    header: &ComplexAckHeader,
    payload: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    frame(false, |w| {
        header.encode(w)?;
        w.write_all(payload)
    })
}

pub(crate) fn simple_ack(invoke_id: u8, service_choice: u8) -> Result<Vec<u8>, EncodeError> {
    let ack = SimpleAck {
        invoke_id,
        service_choice,
    };
    frame(false, |w| ack.encode(w))
}

pub(crate) fn segment_ack(ack: &SegmentAck) -> Result<Vec<u8>, EncodeError> {
    frame(false, |w| ack.encode(w))
}

pub(crate) fn error(
    invoke_id: u8,
    service_choice: u8,
    error_class: u32,
    error_code: u32,
) -> Result<Vec<u8>, EncodeError> {
    let pdu = BacnetError {
        invoke_id,
        service_choice,
        error_class: Some(error_class),
        error_code: Some(error_code),
    };
    frame(false, |w| pdu.encode(w))
}

pub(crate) fn reject(invoke_id: u8, reason: RejectReason) -> Result<Vec<u8>, EncodeError> {
    let pdu = RejectPdu { invoke_id, reason };
    frame(false, |w| pdu.encode(w))
}

pub(crate) fn abort(server: bool, invoke_id: u8, reason: AbortReason) -> Result<Vec<u8>, EncodeError> {
    let pdu = AbortPdu {
        server,
        invoke_id,
        reason,
    };
    frame(false, |w| pdu.encode(w))
}

pub(crate) fn unconfirmed(request: &UnconfirmedRequest) -> Result<Vec<u8>, EncodeError> {
    let header = UnconfirmedRequestHeader {
        service_choice: request.service_choice(),
    };
    frame(false, |w| {
        header.encode(w)?;
        request.encode(w)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bacwire_core::apdu::ApduType;
    use bacwire_core::npdu::split_frame;
    use bacwire_core::services::WhoIsRequest;

    #[test]
    fn confirmed_request_expects_reply() {
        let header = ConfirmedRequestHeader {
            segmented: false,
            more_follows: false,
            segmented_response_accepted: true,
            max_segments: 7,
            max_apdu: 5,
            invoke_id: 9,
            sequence_number: None,
            proposed_window_size: None,
            service_choice: 0x0C,
        };
        let bytes = confirmed_request(&header, &[0xAA, 0xBB]).unwrap();
        assert_eq!(bytes, vec![0x01, 0x04, 0x02, 0x75, 0x09, 0x0C, 0xAA, 0xBB]);
        let (npdu, apdu) = split_frame(&bytes).unwrap().unwrap();
        assert!(npdu.control & bacwire_core::npdu::CONTROL_EXPECTING_REPLY != 0);
        assert_eq!(apdu.len(), CONFIRMED_HEADER_LEN + 2);
    }

    #[test]
    fn replies_carry_their_pdu_type() {
        let cases = [
            (simple_ack(1, 0x0F).unwrap(), ApduType::SimpleAck),
            (
                segment_ack(&SegmentAck {
                    negative_ack: false,
                    sent_by_server: true,
                    invoke_id: 1,
                    sequence_number: 3,
                    actual_window_size: 4,
                })
                .unwrap(),
                ApduType::SegmentAck,
            ),
            (error(1, 0x0C, 1, 31).unwrap(), ApduType::Error),
            (reject(1, RejectReason::UnrecognizedService).unwrap(), ApduType::Reject),
            (abort(true, 1, AbortReason::BufferOverflow).unwrap(), ApduType::Abort),
            (
                unconfirmed(&WhoIsRequest::global().into()).unwrap(),
                ApduType::UnconfirmedRequest,
            ),
        ];
        for (bytes, expected) in cases {
            let (_, apdu) = split_frame(&bytes).unwrap().unwrap();
            assert_eq!(ApduType::of(apdu), Some(expected));
        }
    }

    #[test]
    fn complex_ack_header_lengths() {
        let header = ComplexAckHeader {
            segmented: true,
            more_follows: true,
            invoke_id: 2,
            sequence_number: Some(0),
            proposed_window_size: Some(4),
            service_choice: 0x0C,
        };
        let bytes = complex_ack(&header, &[1, 2, 3]).unwrap();
        let (_, apdu) = split_frame(&bytes).unwrap().unwrap();
        assert_eq!(
            apdu.len(),
            bacwire_core::apdu::COMPLEX_ACK_SEGMENTED_HEADER_LEN + 3
        );
    }
}
