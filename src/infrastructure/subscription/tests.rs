use std::time::Duration;

use super::*;
use crate::testkit::feed::RecordingFeed;

fn manager() -> (Arc<StreamClientStateManager>, Arc<RecordingFeed>) {
    let feed = Arc::new(RecordingFeed::new());
    let manager = StreamClientStateManager::new(feed.clone());
    (Arc::new(manager), feed)
}

fn syms(list: &[&str]) -> Vec<Symbol> {
    list.iter().map(|s| Symbol::new(*s)).collect()
}

#[tokio::test]
async fn first_subscriber_triggers_upstream_subscribe() {
    let (manager, feed) = manager();
    let alice = ClientId::new("alice");
    let bob = ClientId::new("bob");

    let added = manager.subscribe(&alice, &syms(&["AAPL", "MSFT"])).await;
    assert_eq!(added, syms(&["AAPL", "MSFT"]));

    let added = manager.subscribe(&bob, &syms(&["MSFT", "TSLA"])).await;
    assert_eq!(added, syms(&["TSLA"]));

    assert_eq!(manager.ref_count(&Symbol::new("MSFT")), 2);
    assert_eq!(feed.subscribe_count("MSFT"), 1);
}

#[tokio::test]
async fn repeated_subscribe_is_deduplicated_per_client() {
    let (manager, feed) = manager();
    let alice = ClientId::new("alice");

    manager.subscribe(&alice, &syms(&["AAPL"])).await;
    let added = manager.subscribe(&alice, &syms(&["AAPL", "AAPL"])).await;

    assert!(added.is_empty());
    assert_eq!(manager.ref_count(&Symbol::new("AAPL")), 1);
    assert_eq!(feed.subscribed().len(), 1);
}

#[tokio::test]
async fn last_unsubscribe_releases_upstream() {
    let (manager, feed) = manager();
    let alice = ClientId::new("alice");
    let bob = ClientId::new("bob");
    manager.subscribe(&alice, &syms(&["AAPL"])).await;
    manager.subscribe(&bob, &syms(&["AAPL"])).await;

    assert!(manager.unsubscribe(&alice, &syms(&["AAPL"])).await.is_empty());
    assert!(feed.unsubscribed().is_empty());

    let released = manager.unsubscribe(&bob, &syms(&["AAPL"])).await;
    assert_eq!(released, syms(&["AAPL"]));
    assert_eq!(feed.unsubscribed(), syms(&["AAPL"]));
    assert!(manager.active_symbols().is_empty());
}

#[tokio::test]
async fn unsubscribing_unheld_symbol_is_a_noop() {
    let (manager, feed) = manager();
    let alice = ClientId::new("alice");
    let bob = ClientId::new("bob");
    manager.subscribe(&alice, &syms(&["AAPL"])).await;

    assert!(manager.unsubscribe(&bob, &syms(&["AAPL"])).await.is_empty());
    assert!(manager.unsubscribe(&alice, &syms(&["MSFT"])).await.is_empty());
    assert_eq!(manager.ref_count(&Symbol::new("AAPL")), 1);
    assert!(feed.unsubscribed().is_empty());
}

#[tokio::test]
async fn disconnect_releases_everything_the_client_held() {
    let (manager, feed) = manager();
    let alice = ClientId::new("alice");
    let bob = ClientId::new("bob");
    manager.subscribe(&alice, &syms(&["AAPL", "MSFT"])).await;
    manager.subscribe(&bob, &syms(&["MSFT"])).await;

    let released = manager.on_client_disconnect(&alice).await;
    assert_eq!(released, syms(&["AAPL"]));
    assert_eq!(feed.unsubscribed(), syms(&["AAPL"]));
    assert_eq!(manager.client_count(), 1);
    assert!(manager.client_symbols(&alice).is_empty());
    assert_eq!(manager.subscribers(&Symbol::new("MSFT")), vec![bob]);

    assert!(manager.on_client_disconnect(&alice).await.is_empty());
}

#[tokio::test]
async fn feed_failure_keeps_desired_state_for_replay() {
    let (manager, feed) = manager();
    let alice = ClientId::new("alice");
    feed.set_down(true);

    let added = manager.subscribe(&alice, &syms(&["AAPL"])).await;
    assert_eq!(added, syms(&["AAPL"]));
    assert_eq!(manager.active_symbols(), syms(&["AAPL"]));
    assert!(manager.replay().await.is_err());

    feed.set_down(false);
    assert_eq!(manager.replay().await.unwrap(), 1);
    assert_eq!(feed.subscribed(), syms(&["AAPL"]));
}

#[tokio::test]
async fn replay_sends_full_active_set() {
    let (manager, feed) = manager();
    manager.subscribe(&ClientId::new("a"), &syms(&["MSFT"])).await;
    manager.subscribe(&ClientId::new("b"), &syms(&["AAPL", "MSFT"])).await;

    assert_eq!(manager.replay().await.unwrap(), 2);
    let replayed: Vec<Symbol> = feed.subscribed().into_iter().skip(2).collect();
    assert_eq!(replayed, syms(&["AAPL", "MSFT"]));
}

#[tokio::test]
async fn needs_rearm_only_when_symbols_are_wanted() {
    let (manager, feed) = manager();
    feed.set_live(false);
    assert!(!manager.needs_rearm());

    manager.subscribe(&ClientId::new("a"), &syms(&["AAPL"])).await;
    assert!(manager.needs_rearm());

    feed.set_live(true);
    assert!(!manager.needs_rearm());
}

#[tokio::test]
async fn concurrent_churn_keeps_counts_consistent() {
    let (manager, feed) = manager();
    let symbol = Symbol::new("AAPL");

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let symbol = symbol.clone();
            tokio::spawn(async move {
                let client = ClientId::new(format!("client-{i}"));
                manager.subscribe(&client, &[symbol.clone()]).await;
                if i % 2 == 0 {
                    manager.unsubscribe(&client, &[symbol]).await;
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(manager.ref_count(&symbol), 16);
    assert_eq!(manager.subscribers(&symbol).len(), 16);
    assert_eq!(feed.upstream(), vec![symbol]);
}

#[tokio::test]
async fn last_caller_through_leaves_upstream_matching_counts() {
    let (manager, feed) = manager();
    let alice = ClientId::new("alice");
    feed.set_subscribe_delay(Duration::from_millis(50));

    let subscribing = {
        let manager = Arc::clone(&manager);
        let alice = alice.clone();
        tokio::spawn(async move { manager.subscribe(&alice, &syms(&["AAPL"])).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    manager.unsubscribe(&alice, &syms(&["AAPL"])).await;
    subscribing.await.unwrap();

    assert_eq!(manager.ref_count(&Symbol::new("AAPL")), 0);
    assert!(feed.upstream().is_empty());
}

#[tokio::test]
async fn slow_upstream_call_does_not_block_unrelated_clients() {
    let (manager, feed) = manager();
    let alice = ClientId::new("alice");
    let bob = ClientId::new("bob");
    manager.subscribe(&bob, &syms(&["MSFT"])).await;
    feed.set_subscribe_delay(Duration::from_secs(3600));

    let stuck = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.subscribe(&alice, &syms(&["AAPL"])).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let released = tokio::time::timeout(
        Duration::from_millis(500),
        manager.on_client_disconnect(&bob),
    )
    .await
    .expect("disconnect is not held up by another symbol's subscribe");
    assert_eq!(released, syms(&["MSFT"]));
    assert_eq!(feed.unsubscribed(), syms(&["MSFT"]));
    assert_eq!(manager.ref_count(&Symbol::new("AAPL")), 1);

    stuck.abort();
}
