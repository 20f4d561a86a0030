//! Simulated market-data provider.
//!
//! Produces random-walk prices so the gateway can run end to end without a
//! vendor SDK. Each connected client owns a ticker task that pushes one
//! update per subscribed code every tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::domain::{CredentialId, ProviderId};
use crate::error::{Error, Result};
use crate::port::{ProviderClient, ProviderFactory, Quote, UpdateCallback};

/// Largest relative move per tick.
const MAX_STEP: f64 = 0.004;

#[derive(Default)]
struct Book {
    prices: Mutex<HashMap<String, f64>>,
    streams: Mutex<HashMap<String, UpdateCallback>>,
    connected: AtomicBool,
}

impl Book {
    fn seed_price(code: &str) -> f64 {
        let sum: u32 = code.bytes().map(u32::from).sum();
        50.0 + f64::from(sum % 450)
    }

    /// Advance the walk for `code` and return the new quote.
    fn next_quote(&self, provider: &ProviderId, code: &str) -> Quote {
        let step = rand::thread_rng().gen_range(-MAX_STEP..=MAX_STEP);
        let (previous, price) = {
            let mut prices = self.prices.lock();
            let price = prices
                .entry(code.to_string())
                .or_insert_with(|| Self::seed_price(code));
            let previous = *price;
            *price = (*price * (1.0 + step)).max(0.01);
            (previous, *price)
        };

        Quote {
            symbol: code.to_string(),
            data: json!({
                "price": (price * 100.0).round() / 100.0,
                "change": ((price - previous) * 100.0).round() / 100.0,
                "provider": provider.as_str(),
            }),
            timestamp: Utc::now(),
        }
    }

    fn ensure_connected(&self, provider: &ProviderId) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::provider_unavailable(provider, "session not connected"))
        }
    }
}

pub struct SimulatedProvider {
    provider: ProviderId,
    tick: Duration,
    book: Arc<Book>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedProvider {
    pub fn new(provider: ProviderId, tick: Duration) -> Self {
        Self {
            provider,
            tick,
            book: Arc::new(Book::default()),
            ticker: Mutex::new(None),
        }
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let book = Arc::clone(&self.book);
        let provider = self.provider.clone();
        let period = self.tick.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let streams: Vec<(String, UpdateCallback)> = book
                    .streams
                    .lock()
                    .iter()
                    .map(|(code, cb)| (code.clone(), Arc::clone(cb)))
                    .collect();
                for (code, callback) in streams {
                    callback(book.next_quote(&provider, &code));
                }
            }
        })
    }
}

#[async_trait]
impl ProviderClient for SimulatedProvider {
    async fn connect(&self) -> Result<()> {
        self.book.connected.store(true, Ordering::SeqCst);
        let mut ticker = self.ticker.lock();
        if ticker.is_none() {
            *ticker = Some(self.spawn_ticker());
        }
        info!(provider = %self.provider, tick_ms = self.tick.as_millis() as u64, "Simulated session connected");
        Ok(())
    }

    async fn quote(&self, symbols: &[String]) -> Result<Vec<Quote>> {
        self.book.ensure_connected(&self.provider)?;
        Ok(symbols
            .iter()
            .map(|code| self.book.next_quote(&self.provider, code))
            .collect())
    }

    async fn subscribe(&self, symbols: &[String], on_update: UpdateCallback) -> Result<()> {
        self.book.ensure_connected(&self.provider)?;
        let mut streams = self.book.streams.lock();
        for code in symbols {
            streams.insert(code.clone(), Arc::clone(&on_update));
        }
        debug!(provider = %self.provider, count = symbols.len(), "Simulated subscribe");
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[String]) -> Result<()> {
        let mut streams = self.book.streams.lock();
        for code in symbols {
            streams.remove(code);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.book.ensure_connected(&self.provider)
    }

    async fn close(&self) -> Result<()> {
        self.book.connected.store(false, Ordering::SeqCst);
        self.book.streams.lock().clear();
        if let Some(ticker) = self.ticker.lock().take() {
            ticker.abort();
        }
        Ok(())
    }
}

impl Drop for SimulatedProvider {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}

/// Factory building a fresh simulated session per pool connection.
pub fn simulated_factory(tick: Duration) -> ProviderFactory {
    Arc::new(move |provider: &ProviderId, _credential: &CredentialId| {
        Arc::new(SimulatedProvider::new(provider.clone(), tick)) as Arc<dyn ProviderClient>
    })
}
