#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rs485_modbus::receiver::FrameReceiver;
use rs485_modbus::MemoryPort;

#[derive(Debug, Arbitrary)]
struct Chunk {
    bytes: Vec<u8>,
    gap_us: u16,
}

fuzz_target!(|chunks: Vec<Chunk>| {
    let mut port = MemoryPort::new();
    let mut receiver = FrameReceiver::new(384, 1_000);
    let mut now = 0u64;
    for chunk in chunks {
        now += u64::from(chunk.gap_us);
        port.push_incoming(&chunk.bytes);
        let _ = receiver.poll(&mut port, now);
        assert!(receiver.received().len() < 384);
    }
    let _ = receiver.poll(&mut port, now + 1_001);
    assert!(!receiver.is_busy());
});
