use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Call summary for one subscriber over one call log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    pub subscriber: String,
    pub no_of_calls: u64,
    pub total_duration: Duration,
    pub sent: bool,
}

impl Bill {
    pub fn new(subscriber: impl Into<String>, no_of_calls: u64, total_duration: Duration) -> Self {
        Self {
            subscriber: subscriber.into(),
            no_of_calls,
            total_duration,
            sent: false,
        }
    }

    /// Hand the bill over for delivery. Delivery itself happens elsewhere;
    /// here the bill only records that it went out.
    pub fn send(&mut self) {
        debug!(subscriber = %self.subscriber, calls = self.no_of_calls, "bill sent");
        self.sent = true;
    }
}
