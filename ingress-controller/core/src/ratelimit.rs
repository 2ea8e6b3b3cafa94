use anyhow::{anyhow, Result};
use events_ingress_controller_k8s_api::sensor::{RateLimit, RateLimitUnit};

/// Clamps tenant-requested trigger rates to a namespace or platform cap.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitCalculator {
    default: RateLimit,
}

impl RateLimitCalculator {
    pub fn new(default: RateLimit) -> Self {
        Self { default }
    }

    /// `min(sensor, cap)` where the cap is the namespace quota when set and
    /// the platform default otherwise. Comparison is by normalised
    /// requests-per-second; the selected value keeps its original unit, and
    /// ties go to the cap.
    pub fn calculate(
        &self,
        namespace: Option<RateLimit>,
        sensor: Option<RateLimit>,
    ) -> RateLimit {
        let cap = namespace.unwrap_or(self.default);
        match sensor {
            Some(sensor) if requests_per_second(&sensor) < requests_per_second(&cap) => sensor,
            _ => cap,
        }
    }
}

/// The rate normalised to requests per second.
pub fn requests_per_second(limit: &RateLimit) -> f64 {
    f64::from(limit.requests_per_unit) / limit.unit.seconds()
}

/// The rate converted to requests per hour, rejecting values that cannot be
/// represented in 32 bits.
pub fn checked_requests_per_hour(limit: &RateLimit) -> Result<i32> {
    let per_hour = match limit.unit {
        RateLimitUnit::Second => 3600,
        RateLimitUnit::Minute => 60,
        RateLimitUnit::Hour => 1,
    };
    limit.requests_per_unit.checked_mul(per_hour).ok_or_else(|| {
        anyhow!(
            "rate limit ({} per {}) overflows when normalised to requests per hour",
            limit.requests_per_unit,
            limit.unit
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(unit: RateLimitUnit, requests_per_unit: i32) -> RateLimit {
        RateLimit {
            unit,
            requests_per_unit,
        }
    }

    #[test]
    fn returns_default_when_nothing_is_set() {
        let calc = RateLimitCalculator::new(limit(RateLimitUnit::Second, 1));
        assert_eq!(calc.calculate(None, None), limit(RateLimitUnit::Second, 1));
    }

    #[test]
    fn namespace_quota_overrides_the_default() {
        let calc = RateLimitCalculator::new(limit(RateLimitUnit::Second, 1));
        let namespace = limit(RateLimitUnit::Second, 2);
        assert_eq!(calc.calculate(Some(namespace), None), namespace);
    }

    #[test]
    fn sensor_value_is_clamped_to_the_namespace_quota() {
        let calc = RateLimitCalculator::new(limit(RateLimitUnit::Second, 1));
        let namespace = limit(RateLimitUnit::Second, 2);
        let sensor = limit(RateLimitUnit::Second, 100);
        assert_eq!(calc.calculate(Some(namespace), Some(sensor)), namespace);
    }

    #[test]
    fn slower_sensor_value_wins() {
        let calc = RateLimitCalculator::new(limit(RateLimitUnit::Second, 10));
        let sensor = limit(RateLimitUnit::Second, 3);
        assert_eq!(calc.calculate(None, Some(sensor)), sensor);
    }

    #[test]
    fn comparison_normalises_across_units() {
        let calc = RateLimitCalculator::new(limit(RateLimitUnit::Hour, 3600));
        // 30 per minute (0.5 rps) is below the 1 rps default cap.
        let sensor = limit(RateLimitUnit::Minute, 30);
        assert_eq!(calc.calculate(None, Some(sensor)), sensor);

        // 7200 per hour (2 rps) exceeds a 1-per-second namespace quota.
        let namespace = limit(RateLimitUnit::Second, 1);
        let sensor = limit(RateLimitUnit::Hour, 7200);
        assert_eq!(calc.calculate(Some(namespace), Some(sensor)), namespace);
    }

    #[test]
    fn equal_rates_return_the_cap_with_its_unit() {
        let calc = RateLimitCalculator::new(limit(RateLimitUnit::Second, 1));
        let namespace = limit(RateLimitUnit::Minute, 60);
        let sensor = limit(RateLimitUnit::Second, 1);
        // Both normalise to 1 rps; the cap's unit is preserved.
        assert_eq!(calc.calculate(Some(namespace), Some(sensor)), namespace);
    }

    #[test]
    fn result_never_exceeds_the_cap_rate() {
        let calc = RateLimitCalculator::new(limit(RateLimitUnit::Second, 5));
        for sensor in [
            limit(RateLimitUnit::Second, 0),
            limit(RateLimitUnit::Minute, 1),
            limit(RateLimitUnit::Hour, 1_000_000),
        ] {
            let result = calc.calculate(None, Some(sensor));
            assert!(
                requests_per_second(&result) <= requests_per_second(&limit(RateLimitUnit::Second, 5))
            );
        }
    }

    #[test]
    fn per_hour_conversion_rejects_overflow() {
        assert_eq!(
            checked_requests_per_hour(&limit(RateLimitUnit::Second, 1)).unwrap(),
            3600
        );
        assert_eq!(
            checked_requests_per_hour(&limit(RateLimitUnit::Hour, i32::MAX)).unwrap(),
            i32::MAX
        );
        assert!(checked_requests_per_hour(&limit(RateLimitUnit::Second, 10_000_000)).is_err());
        assert!(checked_requests_per_hour(&limit(RateLimitUnit::Minute, i32::MAX / 2)).is_err());
    }
}
