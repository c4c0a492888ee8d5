//! Calibrated sensor sample data structure.

/// Number of code points in a 20-bit transfer value.
const CODE_RANGE: f32 = 1_048_576.0; // 2^20

/// One calibrated temperature/humidity sample.
///
/// Values are derived from the sensor's raw 20-bit codes:
/// - Temperature in Celsius: `code / 2^20 * 200 - 50` (range -50 to 150)
/// - Relative humidity in percent: `code / 2^20 * 100` (range 0 to 100)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    /// Temperature in Celsius
    pub temperature_c: f32,
    /// Relative humidity in percent (0-100)
    pub humidity_pct: f32,
    /// Raw 20-bit temperature code as read from the transfer
    pub raw_temp_code: u32,
    /// Raw 20-bit humidity code as read from the transfer
    pub raw_hum_code: u32,
}

impl SensorReading {
    /// Build a reading from the raw 20-bit codes.
    pub fn from_raw(raw_temp_code: u32, raw_hum_code: u32) -> Self {
        SensorReading {
            temperature_c: (raw_temp_code as f32 / CODE_RANGE) * 200.0 - 50.0,
            humidity_pct: (raw_hum_code as f32 / CODE_RANGE) * 100.0,
            raw_temp_code,
            raw_hum_code,
        }
    }

    /// The placeholder sample broadcast before the first measurement.
    pub fn zeroed() -> Self {
        SensorReading {
            temperature_c: 0.0,
            humidity_pct: 0.0,
            raw_temp_code: 0,
            raw_hum_code: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_lower_endpoint() {
        let reading = SensorReading::from_raw(0, 0);
        assert_eq!(reading.temperature_c, -50.0);
        assert_eq!(reading.humidity_pct, 0.0);
    }

    #[test]
    fn test_decode_upper_endpoint() {
        let max = (1 << 20) - 1;
        let reading = SensorReading::from_raw(max, max);
        assert!((reading.temperature_c - 150.0).abs() < 0.001);
        assert!((reading.humidity_pct - 100.0).abs() < 0.001);
    }

    #[test]
    fn test_decode_midpoint() {
        // Half of the code range lands on 50 C / 50 %.
        let reading = SensorReading::from_raw(0x8_0000, 0x8_0000);
        assert!((reading.temperature_c - 50.0).abs() < 0.001);
        assert!((reading.humidity_pct - 50.0).abs() < 0.001);
    }

    #[test]
    fn test_decode_values_are_finite() {
        for code in [0u32, 1, 0x7_FFFF, 0x8_0000, (1 << 20) - 1] {
            let reading = SensorReading::from_raw(code, code);
            assert!(reading.temperature_c.is_finite());
            assert!(reading.humidity_pct.is_finite());
        }
    }

    #[test]
    fn test_zeroed_is_all_zero() {
        let reading = SensorReading::zeroed();
        assert_eq!(reading.temperature_c, 0.0);
        assert_eq!(reading.humidity_pct, 0.0);
        assert_eq!(reading.raw_temp_code, 0);
        assert_eq!(reading.raw_hum_code, 0);
    }
}
