use std::time::{Duration, Instant};

use crate::error::ServiceError;

/// Wall-clock budget for one unit of work.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    operation: &'static str,
    budget: Duration,
    expires_at: Instant,
}

impl Deadline {
    pub fn start(operation: &'static str, budget: Duration) -> Self {
        Self {
            operation,
            budget,
            expires_at: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Fails with a retryable timeout once the budget is spent.
    pub fn check(&self) -> Result<(), ServiceError> {
        if Instant::now() >= self.expires_at {
            tracing::warn!(
                operation = self.operation,
                budget_ms = self.budget.as_millis() as u64,
                "deadline exceeded; aborting unit of work"
            );
            return Err(ServiceError::Timeout {
                operation: self.operation,
                budget: self.budget,
            });
        }
        Ok(())
    }
}
