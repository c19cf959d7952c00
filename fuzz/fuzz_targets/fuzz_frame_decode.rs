#![no_main]

use libfuzzer_sys::fuzz_target;
use rs485_modbus::{Frame, FrameKind, ModbusCrc};

fuzz_target!(|data: &[u8]| {
    let mut crc = ModbusCrc::new();
    let _ = Frame::check_raw_crc(data, &mut crc);

    for kind in [FrameKind::Request, FrameKind::Response] {
        if let Ok(mut frame) = Frame::decode(data, kind) {
            // encoded_len must agree with the actual encoding
            if let Ok(bytes) = frame.to_bytes() {
                assert_eq!(bytes.len(), frame.encoded_len());
            }
            let _ = frame.seal(&mut crc);
            let _ = frame.payload.validate();
        }
    }
});
