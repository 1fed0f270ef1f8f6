use crate::device::constants::{ACCEL_PAYLOAD_LEN, ACCEL_SCALE};
use crate::device::types::Reading;
use crate::error::CodecError;

/// Decodes an accelerometer data notification.
///
/// The payload holds x, y and z as little-endian `i16` milli-g values. Bytes past the sixth
/// are ignored.
pub fn decode(raw: &[u8]) -> Result<Reading, CodecError> {
    if raw.len() < ACCEL_PAYLOAD_LEN {
        return Err(CodecError::TooShort { len: raw.len() });
    }

    let axis = |offset: usize| {
        let value = i16::from_le_bytes([raw[offset], raw[offset + 1]]);
        f32::from(value) / ACCEL_SCALE
    };

    Ok(Reading {
        x: axis(0),
        y: axis(2),
        z: axis(4),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(x: i16, y: i16, z: i16) -> Vec<u8> {
        [x, y, z].iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn assert_close(actual: f32, expected: f32) {
        assert!((actual - expected).abs() < f32::EPSILON, "{} != {}", actual, expected);
    }

    #[test]
    fn decodes_documented_sample() {
        let reading = decode(&[0xE8, 0x03, 0x00, 0x00, 0x18, 0xFC]).unwrap();
        assert_close(reading.x, 1.0);
        assert_close(reading.y, 0.0);
        assert_close(reading.z, -1.0);
    }

    #[test]
    fn rejects_short_payloads() {
        for len in 0..ACCEL_PAYLOAD_LEN {
            let raw = vec![0u8; len];
            assert_eq!(decode(&raw), Err(CodecError::TooShort { len }));
        }
    }

    #[test]
    fn six_bytes_is_enough() {
        assert!(decode(&[0u8; 6]).is_ok());
    }

    #[test]
    fn ignores_trailing_bytes() {
        let mut raw = encode(-250, 500, 1024);
        raw.extend_from_slice(&[0xFF, 0xFF]);
        let reading = decode(&raw).unwrap();
        assert_close(reading.x, -0.25);
        assert_close(reading.y, 0.5);
        assert_close(reading.z, 1.024);
    }

    #[test]
    fn decode_inverts_encode_at_extremes() {
        for (x, y, z) in [(i16::MIN, 0, i16::MAX), (-1, 1, 0), (2000, -2000, 123)] {
            let reading = decode(&encode(x, y, z)).unwrap();
            assert_close(reading.x, f32::from(x) / ACCEL_SCALE);
            assert_close(reading.y, f32::from(y) / ACCEL_SCALE);
            assert_close(reading.z, f32::from(z) / ACCEL_SCALE);
        }
    }
}
