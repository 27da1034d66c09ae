//! Election timing and behaviour parameters.

use std::time::Duration;

use crate::error::{ElectionError, ElectionResult};

/// Parameters fixed per deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionConfig {
    /// How long a lease stays valid after its last renewal.
    pub lease_duration: Duration,
    /// How long a leader may go without a successful renewal before it
    /// must step down. Shorter than `lease_duration`.
    pub renew_deadline: Duration,
    /// Interval between acquisition or renewal attempts.
    pub retry_period: Duration,
    /// Clear the lease on cancellation so a successor need not wait for
    /// expiry.
    pub release_on_cancel: bool,
    /// Stop the loop after a demotion instead of returning to standby.
    pub stop_on_demotion: bool,
    /// Upper bound on shutdown work: lease release and waiting for
    /// signalled workers each get at most this long.
    pub worker_grace: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
            release_on_cancel: true,
            stop_on_demotion: false,
            worker_grace: Duration::from_secs(5),
        }
    }
}

impl ElectionConfig {
    /// Check the timing relationships the loop depends on.
    pub fn validate(&self) -> ElectionResult<()> {
        if self.lease_duration.is_zero() {
            return Err(ElectionError::Config(
                "lease_duration must be greater than zero".to_string(),
            ));
        }
        if self.renew_deadline.is_zero() {
            return Err(ElectionError::Config(
                "renew_deadline must be greater than zero".to_string(),
            ));
        }
        if self.retry_period.is_zero() {
            return Err(ElectionError::Config(
                "retry_period must be greater than zero".to_string(),
            ));
        }
        if self.renew_deadline >= self.lease_duration {
            return Err(ElectionError::Config(format!(
                "renew_deadline ({:?}) must be less than lease_duration ({:?})",
                self.renew_deadline, self.lease_duration
            )));
        }
        if self.retry_period >= self.renew_deadline {
            return Err(ElectionError::Config(format!(
                "retry_period ({:?}) must be less than renew_deadline ({:?})",
                self.retry_period, self.renew_deadline
            )));
        }
        Ok(())
    }
}
