#![no_main]

use libfuzzer_sys::fuzz_target;
use milli_fault::frame;

fuzz_target!(|data: &[u8]| {
    // Every reported CRYPTO site must lie inside the payload.
    for site in frame::scan_crypto_frames(data) {
        assert!(site.frame_start < site.data_start);
        assert!(site.data_start + site.data_len <= data.len());
        assert_eq!(site.offset_field.read(data).unwrap(), site.stream_offset);
        assert_eq!(site.length_field.read(data).unwrap(), site.data_len as u64);
    }

    let mut pos = 0;
    while pos < data.len() {
        match frame::decode(&data[pos..]) {
            Ok((_, consumed)) => pos += consumed,
            Err(_) => break,
        }
    }
});
