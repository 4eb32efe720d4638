//! Illuminance calibration
//!
//! The Tuya TS0601 presence sensor reports a raw, unitless intensity. This module
//! maps it to lux by piecewise-linear interpolation over measured breakpoints.

/// Piecewise-linear calibration table, sorted ascending by raw value
#[derive(Clone, Copy, Debug)]
pub struct CalibrationTable {
    points: &'static [(f64, f64)],
}

impl CalibrationTable {
    /// Night-time measurements for the Tuya TS0601 human sensor
    pub const TUYA_TS0601: Self = Self {
        points: &[
            (1.0, 0.0),
            (23156.0, 87.0),
            (25827.0, 145.0),
            (29165.0, 210.0),
            (31301.0, 600.0),
            (33650.0, 1170.0),
            (33941.0, 1750.0),
            (34089.0, 2280.0),
            (34715.0, 3000.0),
        ],
    };

    /// Create a table from `(raw, lux)` breakpoints
    ///
    /// Breakpoints must be sorted by raw value with at least two entries.
    pub const fn new(points: &'static [(f64, f64)]) -> Self {
        Self { points }
    }

    /// Convert a raw reading to lux, rounded to one decimal place
    ///
    /// Readings at or below 1 and readings below the first breakpoint are 0.
    /// Readings past the last breakpoint follow the slope of the last segment.
    pub fn interpolate(&self, raw: f64) -> f64 {
        if raw <= 1.0 {
            return 0.0;
        }

        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if lo.0 <= raw && raw <= hi.0 {
                return round_tenth(segment(lo, hi, raw));
            }
        }

        match (self.points.first(), self.points.len()) {
            (Some(first), _) if raw < first.0 => 0.0,
            (_, n) if n >= 2 => {
                round_tenth(segment(self.points[n - 2], self.points[n - 1], raw))
            }
            _ => 0.0,
        }
    }
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self::TUYA_TS0601
    }
}

fn segment((raw1, lux1): (f64, f64), (raw2, lux2): (f64, f64), raw: f64) -> f64 {
    let ratio = (raw - raw1) / (raw2 - raw1);
    lux1 + ratio * (lux2 - lux1)
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: CalibrationTable = CalibrationTable::TUYA_TS0601;

    #[test]
    fn test_breakpoints_are_exact() {
        assert_eq!(TABLE.interpolate(1.0), 0.0);
        assert_eq!(TABLE.interpolate(23156.0), 87.0);
        assert_eq!(TABLE.interpolate(34715.0), 3000.0);
    }

    #[test]
    fn test_low_readings_are_dark() {
        assert_eq!(TABLE.interpolate(0.0), 0.0);
        assert_eq!(TABLE.interpolate(-5.0), 0.0);
        assert_eq!(TABLE.interpolate(0.5), 0.0);
    }

    #[test]
    fn test_midpoint_interpolation() {
        let lux = TABLE.interpolate(0.5 * 23156.0 + 0.5 * 25827.0);
        assert!((lux - (0.5 * 87.0 + 0.5 * 145.0)).abs() <= 0.05);
    }

    #[test]
    fn test_segment_between_210_and_600() {
        // 210 + 835 / 2136 * 390
        assert_eq!(TABLE.interpolate(30000.0), 362.5);
    }

    #[test]
    fn test_extrapolates_with_last_slope() {
        let slope = (3000.0 - 2280.0) / (34715.0 - 34089.0);
        let lux = TABLE.interpolate(35000.0);
        assert!(lux > 3000.0);
        assert!((lux - (3000.0 + 285.0 * slope)).abs() <= 0.05);
    }

    #[test]
    fn test_below_first_breakpoint_is_zero() {
        static POINTS: [(f64, f64); 2] = [(100.0, 10.0), (200.0, 20.0)];
        let table = CalibrationTable::new(&POINTS);
        assert_eq!(table.interpolate(50.0), 0.0);
        assert_eq!(table.interpolate(150.0), 15.0);
    }

    #[test]
    fn test_monotonic_over_table() {
        let mut last = 0.0;
        let mut raw = 1.0;
        while raw < 36000.0 {
            let lux = TABLE.interpolate(raw);
            assert!(lux >= last, "lux dropped at raw {}", raw);
            last = lux;
            raw += 97.0;
        }
    }
}
