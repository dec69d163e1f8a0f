#![no_main]

use bacwire_core::apdu::{
    AbortPdu, ApduType, BacnetError, ComplexAckHeader, ConfirmedRequestHeader, RejectPdu,
    SegmentAck, SimpleAck, UnconfirmedRequestHeader,
};
use bacwire_core::encoding::reader::Reader;
use bacwire_core::npdu::split_frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(Some((_, apdu))) = split_frame(data) else {
        return;
    };
    let mut r = Reader::new(apdu);
    let _ = match ApduType::of(apdu) {
        Some(ApduType::ConfirmedRequest) => ConfirmedRequestHeader::decode(&mut r).map(drop),
        Some(ApduType::UnconfirmedRequest) => UnconfirmedRequestHeader::decode(&mut r).map(drop),
        Some(ApduType::SimpleAck) => SimpleAck::decode(&mut r).map(drop),
        Some(ApduType::ComplexAck) => ComplexAckHeader::decode(&mut r).map(drop),
        Some(ApduType::SegmentAck) => SegmentAck::decode(&mut r).map(drop),
        Some(ApduType::Error) => BacnetError::decode(&mut r).map(drop),
        Some(ApduType::Reject) => RejectPdu::decode(&mut r).map(drop),
        Some(ApduType::Abort) => AbortPdu::decode(&mut r).map(drop),
        None => return,
    };
});
