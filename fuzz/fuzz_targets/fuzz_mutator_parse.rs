#![no_main]

use libfuzzer_sys::fuzz_target;
use milli_fault::HandshakeMessageView;

fuzz_target!(|data: &[u8]| {
    // Anything that parses must re-encode to the same bytes, and editing it
    // must never panic.
    if let Ok(mut view) = HandshakeMessageView::parse(data) {
        assert_eq!(view.reencode().unwrap(), data);

        let types = view.extension_types();
        if let Some(&first) = types.first() {
            view.delete_extension(first);
            let _ = view.insert_extension(first, data, types.len());
            let _ = view.reencode();
        }
    }
});
