//! FitWave Smoke Harness
//!
//! Drives the background worker runtime through its scripted happy path:
//! register → activate → online fetch → offline fallback → offline miss →
//! cross-context notification → notification click, plus a pass over the
//! preference store. Prints a JSON summary at the end.

use fitwave_common::{init_logging, LogConfig, OptionExt, Result, ResultExt};
use fitwave_prefs::{kg_to_lbs, lbs_to_kg, PreferenceStore, WeightUnit};
use fitwave_sw::{
    CacheEntry, FetchEvent, FetchRequest, FetchResponse, NetworkFetcher,
    NotificationClickEvent, ServiceWorkerHost, SwError, RESUME_ACTION_ID,
    WORKOUT_NOTIFICATION_TAG,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Network stub with an on/off switch, standing in for real connectivity.
#[derive(Clone)]
struct SwitchedNetwork {
    online: Arc<AtomicBool>,
}

impl SwitchedNetwork {
    fn new() -> Self {
        Self {
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl NetworkFetcher for SwitchedNetwork {
    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<FetchResponse, SwError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(FetchResponse::ok(
                format!("live response for {}", request.url).into_bytes(),
            ))
        } else {
            Err(SwError::Network(format!("offline: {}", request.url)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogConfig::default().with_filter("fitwave=debug"));

    let scope = Url::parse("https://fitwave.app/").context("parsing scope")?;
    let network = SwitchedNetwork::new();
    let (host, runtime) = ServiceWorkerHost::register(scope.clone(), network.clone());
    let worker = tokio::spawn(runtime.run());
    let handle = host.handle();

    // Seed the cache externally; the proxy itself never writes.
    let shell_url = scope.clone();
    let workouts_url = scope.join("api/workouts").context("building seed url")?;
    {
        let cache = host.cache();
        let mut cache = cache.write().await;
        cache.seed_all(vec![
            CacheEntry::new(&shell_url, "GET", 200, b"<app shell>".to_vec()),
            CacheEntry::new(&workouts_url, "GET", 200, b"[]".to_vec()),
        ]);
    }

    // Online: live response, cache untouched.
    let live = handle
        .fetch(FetchEvent::new(FetchRequest::get(shell_url.clone())))
        .await
        .context("online fetch")?;
    info!(from_cache = live.from_cache, "online fetch served");

    // Offline: seeded entries fall back, unseeded ones propagate the failure.
    network.set_online(false);
    let fallback = handle
        .fetch(FetchEvent::new(FetchRequest::get(workouts_url)))
        .await
        .context("offline fallback fetch")?;
    let history_url = scope.join("api/history").context("building miss url")?;
    let miss = handle
        .fetch(FetchEvent::new(FetchRequest::get(history_url)))
        .await;
    info!(from_cache = fallback.from_cache, miss_propagated = miss.is_err(), "offline pass done");

    // Foreground posts the one recognized message type, then a malformed one.
    handle
        .post_message(json!({
            "type": "SHOW_NOTIFICATION",
            "title": "Workout Paused",
            "body": "Resume when ready"
        }))
        .context("posting notification message")?;
    handle
        .post_message(json!({ "type": "SHOW_NOTIFICATION" }))
        .context("posting malformed message")?;

    // No clients are open, so the click opens a window at the root path.
    handle
        .notification_click(NotificationClickEvent {
            tag: WORKOUT_NOTIFICATION_TAG.to_string(),
            action: Some(RESUME_ACTION_ID.to_string()),
        })
        .context("delivering notification click")?;

    handle.shutdown();
    worker.await.context("joining worker runtime")?;

    let opened = {
        let clients = host.clients();
        let clients = clients.read().await;
        clients
            .focused()
            .map(|c| c.url.to_string())
            .ok_or_not_found("focused client after click")?
    };
    let visible_after_click = host.tray().read().await.visible().len();

    // Auxiliary state: unit preference and tip gating.
    let prefs_path = std::env::temp_dir().join("fitwave-smoke").join("preferences.json");
    let mut prefs = PreferenceStore::open(&prefs_path).context("opening preferences")?;
    prefs.set_unit(WeightUnit::Lbs).context("setting unit")?;
    let first_mark = prefs.mark_tip_seen("log-first-set").context("marking tip")?;
    let second_mark = prefs.mark_tip_seen("log-first-set").context("re-marking tip")?;

    let summary = json!({
        "online_fetch_from_cache": live.from_cache,
        "offline_fallback_from_cache": fallback.from_cache,
        "offline_miss_propagated": miss.is_err(),
        "window_opened_at": opened,
        "notifications_visible_after_click": visible_after_click,
        "unit": prefs.unit().label(),
        "kg_100_in_lbs": kg_to_lbs(100.0),
        "lbs_round_trip_kg": lbs_to_kg(kg_to_lbs(100.0)),
        "tip_marked_first": first_mark,
        "tip_marked_second": second_mark,
    });
    println!("{}", serde_json::to_string_pretty(&summary).context("summary")?);

    Ok(())
}
