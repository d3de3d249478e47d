//! Status derivation against alarm limits

use serde::{Deserialize, Serialize};

use crate::config::Limit;
use crate::types::{CombinedStatus, QuantityStatus};

/// Which side of the acceptable band a value sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Normal,
    High,
    Low,
}

/// A value outside its limit and by how much
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Excursion {
    pub band: Band,
    /// Distance past the violated bound, always positive
    pub excess: f64,
}

impl Limit {
    /// Locate `value` relative to this limit; `None` while inside `[min, max]`
    pub fn excursion(&self, value: f64) -> Option<Excursion> {
        if value > self.max {
            Some(Excursion {
                band: Band::High,
                excess: value - self.max,
            })
        } else if value < self.min {
            Some(Excursion {
                band: Band::Low,
                excess: self.min - value,
            })
        } else {
            None
        }
    }

    pub fn band(&self, value: f64) -> Band {
        self.excursion(value).map_or(Band::Normal, |e| e.band)
    }
}

/// Status of `value` against `limit`
///
/// Beyond `alarm_delta` past either bound is an alarm; anywhere else outside the
/// bounds is a warning.
pub fn status_for(value: f64, limit: &Limit) -> QuantityStatus {
    match limit.excursion(value) {
        Some(e) if e.excess > limit.alarm_delta => QuantityStatus::Alarm,
        Some(_) => QuantityStatus::Warning,
        None => QuantityStatus::Normal,
    }
}

/// Worst of the two quantity statuses
pub fn combine(temperature: QuantityStatus, humidity: QuantityStatus) -> CombinedStatus {
    match temperature.max(humidity) {
        QuantityStatus::Normal => CombinedStatus::Ok,
        QuantityStatus::Warning => CombinedStatus::Warning,
        QuantityStatus::Alarm => CombinedStatus::Alarm,
        QuantityStatus::Offline => CombinedStatus::Offline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bands() {
        let limit = Limit::temperature(); // -10..40, warn 3, alarm 5
        assert_eq!(status_for(22.0, &limit), QuantityStatus::Normal);
        assert_eq!(status_for(40.0, &limit), QuantityStatus::Normal);
        assert_eq!(status_for(41.0, &limit), QuantityStatus::Warning);
        assert_eq!(status_for(44.5, &limit), QuantityStatus::Warning);
        assert_eq!(status_for(45.1, &limit), QuantityStatus::Alarm);
        assert_eq!(status_for(-12.0, &limit), QuantityStatus::Warning);
        assert_eq!(status_for(-16.0, &limit), QuantityStatus::Alarm);
    }

    #[test]
    fn test_excursion_distance() {
        let limit = Limit::humidity();
        let high = limit.excursion(85.0).map(|e| (e.band, e.excess));
        assert_eq!(high, Some((Band::High, 5.0)));
        assert_eq!(limit.band(50.0), Band::Normal);
        assert_eq!(limit.band(10.0), Band::Low);
    }

    #[test]
    fn test_combine_takes_worst() {
        assert_eq!(
            combine(QuantityStatus::Normal, QuantityStatus::Normal),
            CombinedStatus::Ok
        );
        assert_eq!(
            combine(QuantityStatus::Warning, QuantityStatus::Alarm),
            CombinedStatus::Alarm
        );
        assert_eq!(
            combine(QuantityStatus::Warning, QuantityStatus::Normal),
            CombinedStatus::Warning
        );
    }
}
