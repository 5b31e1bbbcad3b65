use std::time::Duration;

use super::backoff::{DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 2;
pub const DEFAULT_HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool sizing and liveness policy for one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub health_check_period: Duration,
    /// Deadline for the probe that completes `connect`.
    pub connect_probe_timeout: Duration,
    /// Deadline for each periodic health probe.
    pub health_probe_timeout: Duration,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            health_check_period: DEFAULT_HEALTH_CHECK_PERIOD,
            connect_probe_timeout: DEFAULT_CONNECT_PROBE_TIMEOUT,
            health_probe_timeout: DEFAULT_HEALTH_PROBE_TIMEOUT,
            reconnect_initial_delay: DEFAULT_INITIAL_DELAY,
            reconnect_max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl PoolSettings {
    /// Replaces unset (zero) values with the defaults and keeps
    /// `min_connections <= max_connections`.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.max_connections == 0 {
            self.max_connections = defaults.max_connections;
        }
        if self.min_connections == 0 {
            self.min_connections = defaults.min_connections;
        }
        self.min_connections = self.min_connections.min(self.max_connections);
        if self.health_check_period.is_zero() {
            self.health_check_period = defaults.health_check_period;
        }
        if self.connect_probe_timeout.is_zero() {
            self.connect_probe_timeout = defaults.connect_probe_timeout;
        }
        if self.health_probe_timeout.is_zero() {
            self.health_probe_timeout = defaults.health_probe_timeout;
        }
        if self.reconnect_initial_delay.is_zero() {
            self.reconnect_initial_delay = defaults.reconnect_initial_delay;
        }
        if self.reconnect_max_delay.is_zero() {
            self.reconnect_max_delay = defaults.reconnect_max_delay;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_fills_unset_values() {
        let settings = PoolSettings {
            max_connections: 0,
            min_connections: 0,
            health_check_period: Duration::ZERO,
            ..Default::default()
        }
        .normalized();

        assert_eq!(settings.max_connections, 10);
        assert_eq!(settings.min_connections, 2);
        assert_eq!(settings.health_check_period, Duration::from_secs(30));
    }

    #[test]
    fn test_normalized_clamps_min_to_max() {
        let settings = PoolSettings {
            max_connections: 1,
            min_connections: 5,
            ..Default::default()
        }
        .normalized();
        assert_eq!(settings.min_connections, 1);
    }
}
