use std::time::Duration;

use serde::Deserialize;

/// Parameters for [`start`](crate::start).
///
/// Deserializable from any serde format; missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// How often every registered source branch is polled.
    pub poll_interval: Duration,
    /// Submissions the queue buffers before producers start waiting.
    pub queue_capacity: usize,
    /// How long a producer waits for room in the queue.
    pub enqueue_timeout: Duration,
    /// How long a producer waits for the worker's report once queued.
    pub ack_timeout: Duration,
    /// Field manager owning the fields the worker applies.
    pub field_manager: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(90),
            queue_capacity: 16,
            enqueue_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(2),
            field_manager: "kube-subsync".to_owned(),
        }
    }
}

impl Config {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets both queue timeouts.
    pub fn with_timeouts(mut self, enqueue: Duration, ack: Duration) -> Self {
        self.enqueue_timeout = enqueue;
        self.ack_timeout = ack;
        self
    }

    pub fn with_field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }
}
