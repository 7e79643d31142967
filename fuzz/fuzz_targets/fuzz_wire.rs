#![no_main]
use grip_core::codec::{COEFFICIENT_LEN, SAMPLE_LEN, decode_coefficient, decode_sample};
use grip_core::framer::FrameAssembler;
use grip_core::gateway::InboundCommand;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((split, rest)) = data.split_first() else {
        return;
    };
    let cut = usize::from(*split).min(rest.len());

    let mut framer = FrameAssembler::new(COEFFICIENT_LEN);
    for frame in framer.push(&rest[..cut]) {
        assert_eq!(frame.len(), COEFFICIENT_LEN);
        let _ = decode_coefficient(&frame);
    }
    framer.set_frame_len(SAMPLE_LEN);
    for frame in framer.push(&rest[cut..]) {
        assert_eq!(frame.len(), SAMPLE_LEN);
        assert!(decode_sample(&frame).is_ok());
    }
    assert!(framer.pending() < SAMPLE_LEN);

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = InboundCommand::parse(text);
    }
});
