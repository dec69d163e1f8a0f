#![no_main]

use bacwire_core::encoding::reader::Reader;
use bacwire_datalink::bip::bvlc::BvlcHeader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut r = Reader::new(data);
    if let Ok(header) = BvlcHeader::decode(&mut r) {
        let _ = header.body_len();
    }
});
