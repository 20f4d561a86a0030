//! In-process key-value store.
//!
//! Implements [`KeyValueStore`] for single-process deployments. A single
//! mutex guards the whole keyspace, so every [`AtomicScript`] runs as one
//! critical section and has the same atomicity guarantee a server-side
//! script would.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::Clock;
use crate::error::{Error, Result};
use crate::port::{AtomicScript, KeyValueStore, ScriptOutcome};

#[derive(Debug)]
enum Value {
    Text(String),
    Counter(u64),
    Timestamps(VecDeque<i64>),
}

#[derive(Debug)]
struct Slot {
    value: Value,
    expires_at_ms: Option<i64>,
}

impl Slot {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }

    fn as_text(&self) -> Option<String> {
        match &self.value {
            Value::Text(s) => Some(s.clone()),
            Value::Counter(n) => Some(n.to_string()),
            Value::Timestamps(_) => None,
        }
    }
}

fn expiry(now_ms: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|t| now_ms.saturating_add(t.as_millis() as i64))
}

pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    data: Mutex<HashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            data: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live (unexpired) keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.data.lock().values().filter(|s| !s.is_expired(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired keys. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|_, slot| !slot.is_expired(now));
        before - data.len()
    }

    /// Purge expired keys every `every` until `shutdown` flips.
    ///
    /// Reads already skip expired keys; this bounds the memory held by keys
    /// nobody reads again, such as rate-limit windows of departed clients.
    pub fn spawn_janitor(
        self: &Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            debug!(purged, "Purged expired store keys");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Store janitor stopped");
        })
    }

    fn live<'a>(data: &'a mut HashMap<String, Slot>, key: &str, now: i64) -> Option<&'a mut Slot> {
        if data.get(key).is_some_and(|s| s.is_expired(now)) {
            data.remove(key);
        }
        data.get_mut(key)
    }

    fn increment(&self, key: String, ttl: Duration) -> Result<ScriptOutcome> {
        let now = self.clock.now_millis();
        let mut data = self.data.lock();

        match Self::live(&mut data, &key, now) {
            Some(slot) => {
                let next = match &slot.value {
                    Value::Counter(n) => n + 1,
                    Value::Text(s) => s
                        .parse::<u64>()
                        .map_err(|_| Error::backend("eval", format!("{key} is not a counter")))?
                        .saturating_add(1),
                    Value::Timestamps(_) => {
                        return Err(Error::backend("eval", format!("{key} is not a counter")))
                    }
                };
                slot.value = Value::Counter(next);
                Ok(ScriptOutcome::Counter(next))
            }
            None => {
                data.insert(
                    key,
                    Slot {
                        value: Value::Counter(1),
                        expires_at_ms: expiry(now, Some(ttl)),
                    },
                );
                Ok(ScriptOutcome::Counter(1))
            }
        }
    }

    fn sliding_admit(
        &self,
        key: String,
        now_ms: i64,
        window_ms: i64,
        limit: u64,
    ) -> Result<ScriptOutcome> {
        let clock_now = self.clock.now_millis();
        let mut data = self.data.lock();

        if Self::live(&mut data, &key, clock_now).is_none() {
            data.insert(
                key.clone(),
                Slot {
                    value: Value::Timestamps(VecDeque::new()),
                    expires_at_ms: None,
                },
            );
        }
        let Some(slot) = data.get_mut(&key) else {
            return Err(Error::backend("eval", format!("{key} vanished")));
        };
        let Value::Timestamps(stamps) = &mut slot.value else {
            return Err(Error::backend("eval", format!("{key} is not a timestamp set")));
        };

        let cutoff = now_ms - window_ms;
        while stamps.front().is_some_and(|&oldest| oldest <= cutoff) {
            stamps.pop_front();
        }

        let admitted = (stamps.len() as u64) < limit;
        if admitted {
            let at = stamps.partition_point(|&t| t <= now_ms);
            stamps.insert(at, now_ms);
        }

        let count = stamps.len() as u64;
        let oldest_ms = stamps.front().copied();
        slot.expires_at_ms = Some(now_ms.saturating_add(window_ms));

        Ok(ScriptOutcome::SlidingWindow {
            admitted,
            count,
            oldest_ms,
        })
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_millis();
        let mut data = self.data.lock();
        Ok(Self::live(&mut data, key, now).and_then(|s| s.as_text()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now_millis();
        self.data.lock().insert(
            key.to_string(),
            Slot {
                value: Value::Text(value),
                expires_at_ms: expiry(now, ttl),
            },
        );
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let now = self.clock.now_millis();
        let mut data = self.data.lock();
        Ok(keys
            .iter()
            .map(|k| Self::live(&mut data, k, now).and_then(|s| s.as_text()))
            .collect())
    }

    async fn mset(&self, entries: Vec<(String, String)>, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now_millis();
        let expires_at_ms = expiry(now, ttl);
        let mut data = self.data.lock();
        for (key, value) in entries {
            data.insert(
                key,
                Slot {
                    value: Value::Text(value),
                    expires_at_ms,
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now_millis();
        let mut data = self.data.lock();
        Ok(data.remove(key).is_some_and(|s| !s.is_expired(now)))
    }

    async fn eval(&self, script: AtomicScript) -> Result<ScriptOutcome> {
        match script {
            AtomicScript::IncrementWithExpiry { key, ttl } => self.increment(key, ttl),
            AtomicScript::SlidingWindowAdmit {
                key,
                now_ms,
                window_ms,
                limit,
            } => self.sliding_admit(key, now_ms, window_ms, limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::clock::ManualClock;

    fn store() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::epoch());
        (MemoryStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn set_get_respects_ttl() {
        let (store, clock) = store();
        store
            .set("k", "v".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn mget_is_positional() {
        let (store, _) = store();
        store
            .mset(vec![("a".into(), "1".into()), ("c".into(), "3".into())], None)
            .await
            .unwrap();
        let got = store
            .mget(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(got, vec![Some("1".into()), None, Some("3".into())]);
    }

    #[tokio::test]
    async fn increment_sets_expiry_only_on_creation() {
        let (store, clock) = store();
        let script = || AtomicScript::IncrementWithExpiry {
            key: "c".into(),
            ttl: Duration::from_secs(60),
        };

        assert_eq!(store.eval(script()).await.unwrap(), ScriptOutcome::Counter(1));
        clock.advance(Duration::from_secs(59));
        assert_eq!(store.eval(script()).await.unwrap(), ScriptOutcome::Counter(2));
        clock.advance(Duration::from_secs(1));
        assert_eq!(store.eval(script()).await.unwrap(), ScriptOutcome::Counter(1));
    }

    #[tokio::test]
    async fn concurrent_increments_do_not_lose_updates() {
        let (store, _) = store();
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for _ in 0..50 {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                s.eval(AtomicScript::IncrementWithExpiry {
                    key: "shared".into(),
                    ttl: Duration::from_secs(60),
                })
                .await
                .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.get("shared").await.unwrap().as_deref(), Some("50"));
    }

    #[tokio::test]
    async fn text_value_is_not_a_timestamp_set() {
        let (store, _) = store();
        store.set("k", "x".into(), None).await.unwrap();
        let result = store
            .eval(AtomicScript::SlidingWindowAdmit {
                key: "k".into(),
                now_ms: 0,
                window_ms: 1_000,
                limit: 1,
            })
            .await;
        assert!(matches!(result, Err(Error::CacheBackendUnavailable { .. })));
    }

    #[test]
    fn purge_drops_expired_keys() {
        let (store, clock) = store();
        tokio_test::block_on(store.set("a", "1".into(), Some(Duration::from_secs(1)))).unwrap();
        tokio_test::block_on(store.set("b", "2".into(), None)).unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn janitor_purges_until_shutdown() {
        let (store, clock) = store();
        let store = Arc::new(store);
        store.set("a", "1".into(), Some(Duration::from_secs(1))).await.unwrap();
        clock.advance(Duration::from_secs(2));

        let (tx, rx) = watch::channel(false);
        let janitor = store.spawn_janitor(Duration::from_millis(10), rx);
        tokio::time::timeout(Duration::from_secs(1), async {
            while !store.data.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("expired key purged");

        tx.send(true).unwrap();
        janitor.await.unwrap();
    }
}
