//! Configuration for the watchdog layer and for instrumented channels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

/// Environment variable that switches lock and wait-group watchdogs on or off.
pub const ENV_DEBUG_SWITCH: &str = "DBGSYNCON";

/// Default threshold after which a held lock is reported.
pub const DEFAULT_LOCK_HOLD_THRESHOLD: Duration = Duration::from_secs(30 * 60);

/// Default threshold after which a blocked wait-group wait is reported.
pub const DEFAULT_WAIT_THRESHOLD: Duration = Duration::from_secs(30 * 60);

/// Default bound on captured stack text.
pub const DEFAULT_MAX_STACK_BYTES: usize = 16 * 1024;

/// Default channel timeout.
pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(1);

/// What a channel operation does once its deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Policy {
    /// Keep waiting, report "blocked", and report "unblocked" on completion.
    /// Never fails.
    #[default]
    WaitAndReport,
    /// Report, then give up and return [`SyncError::Expired`].
    FailOnDeadline,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::WaitAndReport => write!(f, "wait-and-report"),
            Policy::FailOnDeadline => write!(f, "fail-on-deadline"),
        }
    }
}

/// Watchdog layer configuration shared by every instrumented primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugsyncConfig {
    /// Arm lock and wait-group watchdogs. Channels are not affected.
    pub enabled: bool,
    /// How long a lock may be held before it is reported.
    pub lock_hold_threshold: Duration,
    /// How long a wait-group wait may block before it is reported.
    pub wait_threshold: Duration,
    /// Capture a stack snapshot when a watch is armed.
    pub capture_stacks: bool,
    /// Upper bound on captured stack text.
    pub max_stack_bytes: usize,
}

impl Default for DebugsyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_hold_threshold: DEFAULT_LOCK_HOLD_THRESHOLD,
            wait_threshold: DEFAULT_WAIT_THRESHOLD,
            capture_stacks: true,
            max_stack_bytes: DEFAULT_MAX_STACK_BYTES,
        }
    }
}

impl DebugsyncConfig {
    /// Defaults, with `enabled` taken from [`ENV_DEBUG_SWITCH`].
    ///
    /// Lock and wait-group watchdogs stay off unless the variable is `true`
    /// (any case).
    #[must_use]
    pub fn from_env() -> Self {
        let switch = std::env::var(ENV_DEBUG_SWITCH).ok();
        Self {
            enabled: switch.as_deref().and_then(parse_switch).unwrap_or(false),
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any threshold is zero, or if stacks are captured
    /// with a zero byte bound.
    pub fn validate(&self) -> SyncResult<()> {
        if self.lock_hold_threshold.is_zero() {
            return Err(SyncError::invalid_configuration(
                "lock_hold_threshold must be greater than 0",
            ));
        }
        if self.wait_threshold.is_zero() {
            return Err(SyncError::invalid_configuration(
                "wait_threshold must be greater than 0",
            ));
        }
        if self.capture_stacks && self.max_stack_bytes == 0 {
            return Err(SyncError::invalid_configuration(
                "max_stack_bytes must be greater than 0 when capturing stacks",
            ));
        }
        Ok(())
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> DebugsyncConfigBuilder {
        DebugsyncConfigBuilder::default()
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Builder for [`DebugsyncConfig`].
#[derive(Debug, Default)]
pub struct DebugsyncConfigBuilder {
    config: DebugsyncConfig,
}

impl DebugsyncConfigBuilder {
    /// Turn lock and wait-group watchdogs on or off.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Set the held-too-long threshold for locks.
    #[must_use]
    pub fn lock_hold_threshold(mut self, threshold: Duration) -> Self {
        self.config.lock_hold_threshold = threshold;
        self
    }

    /// Set the wait-exceeded threshold for wait groups.
    #[must_use]
    pub fn wait_threshold(mut self, threshold: Duration) -> Self {
        self.config.wait_threshold = threshold;
        self
    }

    /// Turn stack capture on or off.
    #[must_use]
    pub fn capture_stacks(mut self, capture: bool) -> Self {
        self.config.capture_stacks = capture;
        self
    }

    /// Bound captured stack text.
    #[must_use]
    pub fn max_stack_bytes(mut self, bytes: usize) -> Self {
        self.config.max_stack_bytes = bytes;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> SyncResult<DebugsyncConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Construction parameters of an instrumented channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Buffer capacity. Zero gives a rendezvous channel.
    pub capacity: usize,
    /// Reporting threshold for [`Policy::WaitAndReport`], deadline for
    /// [`Policy::FailOnDeadline`].
    pub timeout: Duration,
    /// Behaviour once `timeout` passes.
    pub policy: Policy,
    /// Label attached to diagnostics.
    pub name: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 1,
            timeout: DEFAULT_CHANNEL_TIMEOUT,
            policy: Policy::WaitAndReport,
            name: None,
        }
    }
}

impl ChannelConfig {
    /// Shorthand for a wait-and-report channel.
    #[must_use]
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            capacity,
            timeout,
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a wait-and-report channel has a zero timeout, which
    /// would report every contended operation.
    pub fn validate(&self) -> SyncResult<()> {
        if self.policy == Policy::WaitAndReport && self.timeout.is_zero() {
            return Err(SyncError::invalid_configuration(
                "timeout must be greater than 0 for a wait-and-report channel",
            ));
        }
        if self.name.as_deref().is_some_and(str::is_empty) {
            return Err(SyncError::invalid_configuration(
                "name must not be empty when set",
            ));
        }
        Ok(())
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::default()
    }
}

/// Builder for [`ChannelConfig`].
#[derive(Debug, Default)]
pub struct ChannelConfigBuilder {
    config: ChannelConfig,
}

impl ChannelConfigBuilder {
    /// Set the buffer capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the deadline policy.
    #[must_use]
    pub fn policy(mut self, policy: Policy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Label the channel in diagnostics.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> SyncResult<ChannelConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DebugsyncConfig::default().validate().is_ok());
        assert!(ChannelConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_zero_thresholds() {
        let result = DebugsyncConfig::builder()
            .lock_hold_threshold(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(SyncError::InvalidConfiguration(_))));

        let result = DebugsyncConfig::builder()
            .wait_threshold(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(SyncError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_stack_bound_only_checked_when_capturing() {
        let result = DebugsyncConfig::builder().max_stack_bytes(0).build();
        assert!(result.is_err());

        let result = DebugsyncConfig::builder()
            .capture_stacks(false)
            .max_stack_bytes(0)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_channel_builder() -> SyncResult<()> {
        let config = ChannelConfig::builder()
            .capacity(8)
            .timeout(Duration::from_millis(250))
            .policy(Policy::FailOnDeadline)
            .name("ingress")
            .build()?;

        assert_eq!(config.capacity, 8);
        assert_eq!(config.policy, Policy::FailOnDeadline);
        assert_eq!(config.name.as_deref(), Some("ingress"));
        Ok(())
    }

    #[test]
    fn test_zero_timeout_only_valid_for_fail_on_deadline() {
        let wait = ChannelConfig::builder().timeout(Duration::ZERO).build();
        assert!(wait.is_err());

        let fail = ChannelConfig::builder()
            .timeout(Duration::ZERO)
            .policy(Policy::FailOnDeadline)
            .build();
        assert!(fail.is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(ChannelConfig::builder().name("").build().is_err());
    }

    #[test]
    fn test_parse_switch() {
        assert_eq!(parse_switch("TRUE"), Some(true));
        assert_eq!(parse_switch(" false "), Some(false));
        assert_eq!(parse_switch("yes"), None);
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(Policy::WaitAndReport.to_string(), "wait-and-report");
        assert_eq!(Policy::FailOnDeadline.to_string(), "fail-on-deadline");
        assert_eq!(Policy::default(), Policy::WaitAndReport);
    }

    #[test]
    fn test_channel_config_from_json() -> Result<(), Box<dyn std::error::Error>> {
        let json = r#"{
            "capacity": 3,
            "timeout": { "secs": 0, "nanos": 100000000 },
            "policy": "FailOnDeadline",
            "name": "jobs"
        }"#;
        let config: ChannelConfig = serde_json::from_str(json)?;
        config.validate()?;
        assert_eq!(config.capacity, 3);
        assert_eq!(config.timeout, Duration::from_millis(100));
        assert_eq!(config.policy, Policy::FailOnDeadline);
        assert_eq!(config.name.as_deref(), Some("jobs"));
        Ok(())
    }
}
