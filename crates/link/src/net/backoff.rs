use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        max: Duration,
        factor: f64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Exponential {
            initial: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max: Duration::from_millis(DEFAULT_MAX_RECONNECT_DELAY_MS),
            factor: 2.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            ReconnectPolicy::Fixed(delay) if delay.is_zero() => Err(ConfigError::ReconnectDelay),
            ReconnectPolicy::Exponential { initial, .. } if initial.is_zero() => {
                Err(ConfigError::ReconnectDelay)
            }
            ReconnectPolicy::Exponential { factor, .. } if !(factor >= 1.0) => {
                Err(ConfigError::BackoffFactor(factor))
            }
            _ => Ok(()),
        }
    }

    /// Delay before reconnect attempt number `attempt` (1-based) of a cycle.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Exponential {
                initial,
                max,
                factor,
            } => {
                let exponent = attempt.saturating_sub(1).min(32) as i32;
                let scaled = initial.as_secs_f64() * factor.powi(exponent);
                if scaled >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_is_constant() {
        let policy = ReconnectPolicy::Fixed(Duration::from_millis(250));
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(40), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_delay_doubles_and_caps() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(5), Duration::from_secs(10));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_validation() {
        assert!(ReconnectPolicy::default().validate().is_ok());
        assert_eq!(
            ReconnectPolicy::Fixed(Duration::ZERO).validate(),
            Err(ConfigError::ReconnectDelay)
        );
        assert_eq!(
            ReconnectPolicy::Exponential {
                initial: Duration::from_millis(10),
                max: Duration::from_secs(1),
                factor: 0.5,
            }
            .validate(),
            Err(ConfigError::BackoffFactor(0.5))
        );
    }
}
