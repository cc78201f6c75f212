use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusOutcome {
    Success,
    Failure,
}

impl fmt::Display for StatusOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failure => "failure",
        })
    }
}

/// One operator-facing notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub operation: String,
    pub outcome: StatusOutcome,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn is_failure(&self) -> bool {
        self.outcome == StatusOutcome::Failure
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.outcome, self.operation, self.message)
    }
}

/// A broadcast receiver for status events.
pub type StatusStream = broadcast::Receiver<StatusEvent>;

/// Fire-and-forget publisher of [`StatusEvent`]s.
///
/// Publishing never fails and never blocks; with no subscribers the event is
/// only logged. Clones publish into the same channel.
#[derive(Clone, Debug)]
pub struct StatusChannel {
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> StatusStream {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, operation: &str, outcome: StatusOutcome, message: impl Into<String>) {
        let event = StatusEvent {
            operation: operation.to_string(),
            outcome,
            message: message.into(),
            at: Utc::now(),
        };
        match outcome {
            StatusOutcome::Success => info!(operation, message = %event.message, "status"),
            StatusOutcome::Failure => warn!(operation, message = %event.message, "status"),
        }
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn success(&self, operation: &str, message: impl Into<String>) {
        self.publish(operation, StatusOutcome::Success, message);
    }

    pub fn failure(&self, operation: &str, message: impl Into<String>) {
        self.publish(operation, StatusOutcome::Failure, message);
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new(256)
    }
}
