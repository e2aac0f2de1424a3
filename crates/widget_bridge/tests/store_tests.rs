use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::{Value, json};
use widget_bridge::{
    GlobalKey, GlobalStore, Globals, HostWindow, LocalHost, PollConfig, SET_GLOBALS_EVENT_TYPE,
    SubscriberFn, WidgetStateSync,
};

type Seen = Arc<Mutex<Vec<Option<Value>>>>;

fn watch(store: &GlobalStore, key: GlobalKey) -> (Seen, widget_bridge::Subscription) {
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    let subscription = store.subscribe(key, move |value| {
        sink.lock().unwrap().push(value.cloned());
    });
    (seen, subscription)
}

fn attached() -> (Arc<HostWindow>, Arc<LocalHost>, GlobalStore) {
    let window = Arc::new(HostWindow::new());
    let host = LocalHost::new();
    window.attach(host.clone());
    let store = GlobalStore::new(Arc::clone(&window));
    (window, host, store)
}

/// Test that a host attaching during the poll window produces exactly one notification
#[tokio::test(start_paused = true)]
async fn test_late_host_notifies_once() {
    let window = Arc::new(HostWindow::new());
    let store = GlobalStore::new(Arc::clone(&window));

    let (seen, subscription) = watch(&store, GlobalKey::Theme);
    assert!(store.is_polling(GlobalKey::Theme));
    assert_eq!(subscription.current(), None);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(seen.lock().unwrap().is_empty());

    window.attach(LocalHost::with_globals(
        Globals::new().with(GlobalKey::Theme, json!("dark")),
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*seen.lock().unwrap(), vec![Some(json!("dark"))]);
    assert_eq!(subscription.current(), Some(json!("dark")));

    // the poll is done for good
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(!store.is_polling(GlobalKey::Theme));
}

/// Test that nothing fires once the poll budget is spent
#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_stays_silent() {
    let window = Arc::new(HostWindow::new());
    let store = GlobalStore::with_poll(
        Arc::clone(&window),
        PollConfig {
            interval_ms: 10,
            max_attempts: 5,
        },
    );

    let (seen, subscription) = watch(&store, GlobalKey::Locale);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!store.is_polling(GlobalKey::Locale));

    window.attach(LocalHost::with_globals(
        Globals::new().with(GlobalKey::Locale, json!("fr-FR")),
    ));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(subscription.current(), None);
    // fresh reads still see the host
    assert_eq!(store.read(GlobalKey::Locale), Some(json!("fr-FR")));
}

/// Test that an attached host does not start a poll
#[tokio::test(start_paused = true)]
async fn test_attached_host_skips_poll() {
    let (_window, _host, store) = attached();
    let (seen, _subscription) = watch(&store, GlobalKey::MaxHeight);

    assert!(!store.is_polling(GlobalKey::MaxHeight));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(seen.lock().unwrap().is_empty());
}

/// Test that a broadcast without the key is not a change for that key
#[tokio::test]
async fn test_broadcast_without_key_is_ignored() {
    let (window, host, store) = attached();
    let (theme, _theme_sub) = watch(&store, GlobalKey::Theme);
    let (locale, _locale_sub) = watch(&store, GlobalKey::Locale);

    host.set_globals(&window, Globals::new().with(GlobalKey::Locale, json!("de-DE")));

    assert!(theme.lock().unwrap().is_empty());
    assert_eq!(*locale.lock().unwrap(), vec![Some(json!("de-DE"))]);
}

/// Test that a broadcast setting a key to null notifies with an unset value
#[tokio::test]
async fn test_broadcast_null_notifies_unset() {
    let (window, host, store) = attached();
    host.replace_globals(Globals::new().with(GlobalKey::Theme, json!("dark")));
    let (seen, subscription) = watch(&store, GlobalKey::Theme);
    assert_eq!(subscription.current(), Some(json!("dark")));

    host.set_globals(&window, Globals::new().with(GlobalKey::Theme, Value::Null));
    assert_eq!(*seen.lock().unwrap(), vec![None]);
    assert_eq!(subscription.current(), None);
}

/// Test that set_globals messages posted to the window notify subscribers
#[tokio::test]
async fn test_message_channel_updates() {
    let (window, host, store) = attached();
    let (seen, _subscription) = watch(&store, GlobalKey::DisplayMode);

    host.post_globals(
        &window,
        Globals::new().with(GlobalKey::DisplayMode, json!("fullscreen")),
    )
    .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![Some(json!("fullscreen"))]);

    // unrelated messages and messages without globals are ignored
    window.post_message(json!({ "type": "resize", "globals": { "displayMode": "pip" } }));
    window.post_message(json!({ "type": SET_GLOBALS_EVENT_TYPE }));
    window.post_message(json!("openai:set_globals"));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

/// Test that every subscriber of a key sees every update
#[tokio::test]
async fn test_subscribers_share_channel() {
    let (window, host, store) = attached();
    let (first, _a) = watch(&store, GlobalKey::ToolInput);
    let (second, _b) = watch(&store, GlobalKey::ToolInput);
    assert_eq!(store.subscriber_count(GlobalKey::ToolInput), 2);
    assert_eq!(window.listener_count(), 2);

    host.set_globals(&window, Globals::new().with(GlobalKey::ToolInput, json!({ "q": 1 })));
    assert_eq!(*first.lock().unwrap(), vec![Some(json!({ "q": 1 }))]);
    assert_eq!(*second.lock().unwrap(), vec![Some(json!({ "q": 1 }))]);
}

/// Test that unsubscribing twice is harmless and the last one tears the channel down
#[tokio::test(start_paused = true)]
async fn test_unsubscribe_is_idempotent() {
    let window = Arc::new(HostWindow::new());
    let store = GlobalStore::new(Arc::clone(&window));

    let (_seen, theme) = watch(&store, GlobalKey::Theme);
    let (_seen, locale) = watch(&store, GlobalKey::Locale);
    assert_eq!(window.listener_count(), 4);
    assert!(store.is_polling(GlobalKey::Theme));

    theme.unsubscribe();
    theme.unsubscribe();
    assert!(!theme.is_active());
    assert!(!store.unregister(theme.token()));
    assert_eq!(window.listener_count(), 2);
    assert!(!store.is_polling(GlobalKey::Theme));

    drop(locale);
    assert_eq!(window.listener_count(), 0);
    assert_eq!(store.subscriber_count(GlobalKey::Locale), 0);
}

/// Test that callbacks registered by token can be removed by token
#[tokio::test]
async fn test_register_and_unregister_tokens() {
    let (window, host, store) = attached();
    let seen: Seen = Arc::default();
    let sink = Arc::clone(&seen);
    let callback: SubscriberFn = Arc::new(move |value| sink.lock().unwrap().push(value.cloned()));

    let token = store.register(GlobalKey::UserAgent, callback);
    assert_eq!(token.key(), GlobalKey::UserAgent);
    host.set_globals(&window, Globals::new().with(GlobalKey::UserAgent, json!({ "device": { "type": "mobile" } })));

    assert!(store.unregister(token));
    assert!(!store.unregister(token));
    host.set_globals(&window, Globals::new().with(GlobalKey::UserAgent, json!({})));

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(window.listener_count(), 0);
}

/// Test that a failing host read degrades to unset instead of erroring
#[tokio::test]
async fn test_read_failures_degrade_to_unset() {
    let (window, host, store) = attached();
    host.replace_globals(Globals::new().with(GlobalKey::Theme, json!("dark")));
    let (seen, _subscription) = watch(&store, GlobalKey::Theme);

    host.set_broken(true);
    host.set_globals(&window, Globals::new().with(GlobalKey::Theme, json!("light")));
    assert_eq!(*seen.lock().unwrap(), vec![None]);

    host.set_broken(false);
    host.set_globals(&window, Globals::new().with(GlobalKey::Theme, json!("light")));
    assert_eq!(seen.lock().unwrap().last(), Some(&Some(json!("light"))));
}

/// Test that the host wins over an earlier optimistic local write
#[tokio::test]
async fn test_host_push_overrides_local_write() {
    let (window, host, store) = attached();
    let state = WidgetStateSync::<Value>::init(&store, None);

    state.set(Some(json!({ "count": 1 })));
    assert_eq!(state.get(), Some(json!({ "count": 1 })));
    assert_eq!(host.widget_state_pushes(), vec![json!({ "count": 1 })]);

    host.set_globals(
        &window,
        Globals::new().with(GlobalKey::WidgetState, json!({ "count": 5 })),
    );
    assert_eq!(state.get(), Some(json!({ "count": 5 })));
    // adopting a pushed value never writes back
    assert_eq!(host.widget_state_pushes().len(), 1);
}

/// Test that widget state written without a host stays local
#[tokio::test(start_paused = true)]
async fn test_widget_state_without_host() {
    let window = Arc::new(HostWindow::new());
    let store = GlobalStore::new(Arc::clone(&window));
    let state = WidgetStateSync::init(&store, Some(json!({ "count": 0 })));

    state.update(|prev| {
        let count = prev.and_then(|prev| prev["count"].as_i64()).unwrap_or(0);
        Some(json!({ "count": count + 1 }))
    });
    assert_eq!(state.get(), Some(json!({ "count": 1 })));

    // a late host that already holds a state takes over
    let host = LocalHost::with_globals(
        Globals::new().with(GlobalKey::WidgetState, json!({ "count": 9 })),
    );
    window.attach(host.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(state.get(), Some(json!({ "count": 9 })));
    assert!(host.widget_state_pushes().is_empty());
}
