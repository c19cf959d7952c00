#![no_main]

use libfuzzer_sys::fuzz_target;
use rs485_modbus::{Frame, Payload, RegisterStore, StoreLayout};

fuzz_target!(|data: &[u8]| {
    let Ok(payload) = Payload::decode_pdu(data, false) else {
        return;
    };
    let mut store = RegisterStore::new(StoreLayout::uniform(64).with_holding_registers(8, 56));
    let request = Frame::new(1, payload);
    let reply = store.process(&request);
    assert_eq!(reply.station, 1);
    let _ = store.process_response(&reply, &request);
});
