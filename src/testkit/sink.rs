//! Recording push-channel sink.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::port::{ClientSink, PushMessage};

/// Collects every message sent to it; can be told to fail or stall.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<PushMessage>>,
    fail_with: Option<String>,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every send fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::default()
        }
    }

    /// A sink that sleeps `delay` before accepting each message.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<PushMessage> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ClientSink for RecordingSink {
    async fn send(&self, message: &PushMessage) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.fail_with {
            return Err(Error::Send(reason.clone()));
        }
        self.messages.lock().push(message.clone());
        Ok(())
    }
}
