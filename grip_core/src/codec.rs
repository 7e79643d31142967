//! Instrument wire format.
//!
//! Commands are single unframed bytes. The instrument answers `GetCoefficient`
//! with six ASCII digits and, once sampling is on, streams 11-byte packets
//! whose magnitude sits big-endian in bytes 3 and 4.

use crate::error::CodecError;
use crate::fixed_point::Coefficient;

/// Length of the `GetCoefficient` response.
pub const COEFFICIENT_LEN: usize = 6;
/// Length of one sample packet.
pub const SAMPLE_LEN: usize = 11;

const MAGNITUDE_HI: usize = 3;
const MAGNITUDE_LO: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    SetCoefficient,
    GetCoefficient,
    SamplingOff,
    SamplingOn,
    DeviceOff,
}

impl Command {
    pub const ALL: [Command; 5] = [
        Command::SetCoefficient,
        Command::GetCoefficient,
        Command::SamplingOff,
        Command::SamplingOn,
        Command::DeviceOff,
    ];
}

#[inline]
pub fn encode(command: Command) -> u8 {
    match command {
        Command::SetCoefficient => 0x20,
        Command::GetCoefficient => 0x21,
        Command::SamplingOff => 0x10,
        Command::SamplingOn => 0x11,
        Command::DeviceOff => 0x7A,
    }
}

pub fn decode_command(byte: u8) -> Result<Command, CodecError> {
    Command::ALL
        .into_iter()
        .find(|c| encode(*c) == byte)
        .ok_or(CodecError::UnknownCommand(byte))
}

/// Parse the six ASCII digits of a coefficient response (value / 1_000_000).
pub fn decode_coefficient(bytes: &[u8]) -> Result<Coefficient, CodecError> {
    if bytes.len() != COEFFICIENT_LEN {
        return Err(CodecError::MalformedCoefficient(format!(
            "expected {COEFFICIENT_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let mut micros: u32 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return Err(CodecError::MalformedCoefficient(format!(
                "non-digit byte 0x{b:02x}"
            )));
        }
        micros = micros * 10 + u32::from(b - b'0');
    }
    Ok(Coefficient::from_micros(micros))
}

/// Extract the 16-bit magnitude of a sample packet. Extra bytes are ignored.
pub fn decode_sample(bytes: &[u8]) -> Result<u16, CodecError> {
    if bytes.len() < SAMPLE_LEN {
        return Err(CodecError::MalformedPacket(bytes.len()));
    }
    Ok(u16::from_be_bytes([bytes[MAGNITUDE_HI], bytes[MAGNITUDE_LO]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn command_bytes_match_the_instrument_manual() {
        assert_eq!(encode(Command::SetCoefficient), 0x20);
        assert_eq!(encode(Command::GetCoefficient), 0x21);
        assert_eq!(encode(Command::SamplingOff), 0x10);
        assert_eq!(encode(Command::SamplingOn), 0x11);
        assert_eq!(encode(Command::DeviceOff), 0x7A);
    }

    #[test]
    fn every_command_round_trips() {
        for c in Command::ALL {
            assert_eq!(decode_command(encode(c)), Ok(c));
        }
        assert_eq!(decode_command(0x00), Err(CodecError::UnknownCommand(0)));
    }

    #[test]
    fn sample_magnitude_is_big_endian_bytes_3_and_4() {
        let frame = [0xFF, 0xFF, 0xFE, 0x0D, 0xAC, 0, 0, 0, 0, 0, 0x40];
        assert_eq!(decode_sample(&frame), Ok(3500));
    }

    #[test]
    fn short_sample_is_rejected() {
        assert_eq!(
            decode_sample(&[0u8; 10]),
            Err(CodecError::MalformedPacket(10))
        );
        assert_eq!(decode_sample(&[]), Err(CodecError::MalformedPacket(0)));
    }

    #[test]
    fn coefficient_digits_are_micro_units() {
        let c = decode_coefficient(b"000123").expect("valid digits");
        assert_eq!(c.micros(), 123);
        assert_eq!(c.to_string(), "0.000123");
    }

    #[test]
    fn coefficient_rejects_non_digits_and_bad_length() {
        assert!(matches!(
            decode_coefficient(b"00a123"),
            Err(CodecError::MalformedCoefficient(_))
        ));
        assert!(matches!(
            decode_coefficient(b"12345"),
            Err(CodecError::MalformedCoefficient(_))
        ));
    }

    proptest! {
        #[test]
        fn decode_sample_equals_hi_times_256_plus_lo(frame in proptest::collection::vec(any::<u8>(), 11..32)) {
            let v = decode_sample(&frame).unwrap();
            prop_assert_eq!(u32::from(v), u32::from(frame[3]) * 256 + u32::from(frame[4]));
            prop_assert_eq!(decode_sample(&frame).unwrap(), v);
        }

        #[test]
        fn short_frames_always_fail(frame in proptest::collection::vec(any::<u8>(), 0..11)) {
            prop_assert_eq!(decode_sample(&frame), Err(CodecError::MalformedPacket(frame.len())));
        }
    }
}
