#![no_main]

use bacwire_core::services::{ComplexAck, ConfirmedRequest, UnconfirmedRequest};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&service_choice, payload)) = data.split_first() else {
        return;
    };
    let _ = ConfirmedRequest::decode(service_choice, payload);
    let _ = ComplexAck::decode(service_choice, payload);
    let _ = UnconfirmedRequest::decode(service_choice, payload);
});
