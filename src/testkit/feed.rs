//! Recording symbol feed.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::Symbol;
use crate::error::{Error, Result};
use crate::infrastructure::subscription::SymbolFeed;

/// Records every upstream call; can be switched down or offline.
pub struct RecordingFeed {
    subscribed: Mutex<Vec<Symbol>>,
    unsubscribed: Mutex<Vec<Symbol>>,
    upstream: Mutex<BTreeSet<Symbol>>,
    subscribe_delay: Mutex<Duration>,
    down: AtomicBool,
    live: AtomicBool,
}

impl Default for RecordingFeed {
    fn default() -> Self {
        Self {
            subscribed: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
            upstream: Mutex::new(BTreeSet::new()),
            subscribe_delay: Mutex::new(Duration::ZERO),
            down: AtomicBool::new(false),
            live: AtomicBool::new(true),
        }
    }
}

impl RecordingFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until cleared.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    /// Hold every subscribe call for `delay` before it completes.
    pub fn set_subscribe_delay(&self, delay: Duration) {
        *self.subscribe_delay.lock() = delay;
    }

    /// Symbols currently subscribed upstream.
    pub fn upstream(&self) -> Vec<Symbol> {
        self.upstream.lock().iter().cloned().collect()
    }

    pub fn subscribed(&self) -> Vec<Symbol> {
        self.subscribed.lock().clone()
    }

    pub fn unsubscribed(&self) -> Vec<Symbol> {
        self.unsubscribed.lock().clone()
    }

    pub fn subscribe_count(&self, symbol: &str) -> usize {
        self.subscribed
            .lock()
            .iter()
            .filter(|s| s.as_str() == symbol)
            .count()
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::provider_unavailable("recording", "feed down"));
        }
        Ok(())
    }
}

#[async_trait]
impl SymbolFeed for RecordingFeed {
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<()> {
        let delay = *self.subscribe_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        self.subscribed.lock().extend(symbols.iter().cloned());
        self.upstream.lock().extend(symbols.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<()> {
        self.check()?;
        self.unsubscribed.lock().extend(symbols.iter().cloned());
        let mut upstream = self.upstream.lock();
        for symbol in symbols {
            upstream.remove(symbol);
        }
        Ok(())
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}
