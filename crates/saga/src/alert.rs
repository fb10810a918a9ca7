//! Alerting for inconsistencies that need an operator.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::CorrelationKey;
use tokio::sync::mpsc;

/// A divergence between local and remote state that the saga could not repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inconsistency {
    pub correlation_key: CorrelationKey,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
}

/// Sink for critical inconsistencies.
pub trait InconsistencyReporter: Send + Sync {
    fn report(&self, inconsistency: &Inconsistency);
}

impl<T: InconsistencyReporter + ?Sized> InconsistencyReporter for Arc<T> {
    fn report(&self, inconsistency: &Inconsistency) {
        (**self).report(inconsistency)
    }
}

/// Writes alerts to the `alerts` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingReporter;

impl InconsistencyReporter for LoggingReporter {
    fn report(&self, inconsistency: &Inconsistency) {
        tracing::error!(
            target: "alerts",
            severity = "critical",
            correlation_key = %inconsistency.correlation_key,
            detected_at = %inconsistency.detected_at,
            reason = %inconsistency.reason,
            "saga inconsistency requires manual repair"
        );
    }
}

/// Forwards alerts to a channel, e.g. a dead-letter writer or a test.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<Inconsistency>,
}

impl ChannelReporter {
    /// Creates a reporter and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Inconsistency>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl InconsistencyReporter for ChannelReporter {
    fn report(&self, inconsistency: &Inconsistency) {
        if self.sender.send(inconsistency.clone()).is_err() {
            tracing::error!(
                correlation_key = %inconsistency.correlation_key,
                "alert channel closed, inconsistency dropped"
            );
        }
    }
}
