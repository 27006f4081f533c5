//! # FitWave Service Worker
//!
//! Background worker runtime for the FitWave fitness tracker.
//!
//! ## Features
//!
//! - **Lifecycle**: install, activate, skip-waiting, client claiming
//! - **Fetch interception**: network-first with cache fallback
//! - **Cache store**: request-identity keyed response cache
//! - **Notifications**: workout-resume notifications with tag deduplication
//! - **Cross-context messaging**: foreground → worker commands
//!
//! ## Architecture
//!
//! ```text
//! Foreground app ── WorkerHandle ──→ event queue (serial, arrival order)
//!                                        │
//!                                   WorkerRuntime
//!                                        ├── LifecycleController
//!                                        │       └── WorkerRegistration
//!                                        ├── NetworkFallbackProxy
//!                                        │       └── CacheStore
//!                                        ├── Clients (ordered contexts)
//!                                        └── NotificationTray
//! ```

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

// ==================== Constants ====================

/// Recognized cross-context message type. Field names on the wire are
/// load-bearing: sender and receiver are deployed independently.
pub const MSG_SHOW_NOTIFICATION: &str = "SHOW_NOTIFICATION";

/// Deduplication tag for the workout-resume notification class.
pub const WORKOUT_NOTIFICATION_TAG: &str = "fitwave-workout-resume";

/// Action id surfaced on the workout-resume notification.
pub const RESUME_ACTION_ID: &str = "resume";

/// Label for the resume action button.
pub const RESUME_ACTION_LABEL: &str = "Resume Workout";

/// Notification icon resource path.
pub const NOTIFICATION_ICON: &str = "/icons/icon-192x192.png";

/// Notification badge resource path.
pub const NOTIFICATION_BADGE: &str = "/icons/badge-96x96.png";

/// Path opened when no focusable client exists.
pub const ROOT_PATH: &str = "/";

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum SwError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

// ==================== Types ====================

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Worker lifecycle state. Transitions are driven by the host platform,
/// except for the skip-waiting override on install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerLifecycleState {
    /// Install event is being handled.
    Installing,
    /// Installed, parked behind a previous instance (default staged rollout).
    Waiting,
    /// Activate event is being handled.
    Activating,
    /// Authoritative instance for the origin.
    Activated,
}

// ==================== Worker Instance ====================

/// A single worker instance. At most one instance per origin is Activated.
#[derive(Debug, Clone)]
pub struct WorkerInstance {
    /// Unique ID.
    pub id: WorkerId,

    /// Current state.
    pub state: WorkerLifecycleState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl WorkerInstance {
    fn new() -> Self {
        Self {
            id: WorkerId::new(),
            state: WorkerLifecycleState::Installing,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: WorkerLifecycleState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if this instance is the authoritative one.
    pub fn is_activated(&self) -> bool {
        self.state == WorkerLifecycleState::Activated
    }
}

// ==================== Lifecycle Events ====================

/// Install event payload.
#[derive(Debug, Clone)]
pub struct InstallEvent {
    pub worker_id: WorkerId,
}

/// Activate event payload.
#[derive(Debug, Clone)]
pub struct ActivateEvent {
    pub worker_id: WorkerId,
}

/// Notification interaction payload. `action` is carried but body clicks and
/// action clicks take the same path.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub tag: String,
    pub action: Option<String>,
}

// ==================== Registration ====================

/// Tracks the worker instances for one origin. Install always precedes
/// activate for a given instance.
#[derive(Debug)]
pub struct WorkerRegistration {
    /// Scope URL (the origin this worker controls).
    pub scope: Url,

    /// Instance handling its install event.
    pub installing: Option<WorkerInstance>,

    /// Instance parked behind a previous one.
    pub waiting: Option<WorkerInstance>,

    /// Authoritative (or activating) instance.
    pub active: Option<WorkerInstance>,

    skip_waiting_requested: bool,
}

impl WorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            skip_waiting_requested: false,
        }
    }

    /// Begin installing a new instance.
    pub fn begin_install(&mut self) -> InstallEvent {
        let worker = WorkerInstance::new();
        let event = InstallEvent { worker_id: worker.id };
        self.installing = Some(worker);
        event
    }

    /// Request immediate activation for the installing instance.
    pub fn skip_waiting(&mut self) {
        self.skip_waiting_requested = true;
    }

    /// Installing → Waiting, or straight through to Activating when
    /// skip-waiting was requested.
    pub fn install_complete(&mut self) -> Option<ActivateEvent> {
        let mut worker = self.installing.take()?;
        worker.set_state(WorkerLifecycleState::Waiting);
        self.waiting = Some(worker);

        if self.skip_waiting_requested {
            self.skip_waiting_requested = false;
            self.begin_activate()
        } else {
            None
        }
    }

    /// Waiting → Activating. The previous active instance stops being
    /// authoritative here.
    pub fn begin_activate(&mut self) -> Option<ActivateEvent> {
        let mut worker = self.waiting.take()?;
        worker.set_state(WorkerLifecycleState::Activating);
        let event = ActivateEvent { worker_id: worker.id };
        self.active = Some(worker);
        Some(event)
    }

    /// Activating → Activated, once the activate handler has run.
    pub fn activate_complete(&mut self) {
        if let Some(worker) = self.active.as_mut() {
            worker.set_state(WorkerLifecycleState::Activated);
        }
    }

    /// Get the active (or activating) instance.
    pub fn active_worker(&self) -> Option<&WorkerInstance> {
        self.active.as_ref()
    }
}

// ==================== Lifecycle Controller ====================

/// Drives install/activate transitions and the claim over open clients.
#[derive(Debug)]
pub struct LifecycleController {
    registration: WorkerRegistration,
}

impl LifecycleController {
    /// Create a controller for the given scope.
    pub fn new(scope: Url) -> Self {
        Self {
            registration: WorkerRegistration::new(scope),
        }
    }

    /// Begin installing a new instance.
    pub fn begin_install(&mut self) -> InstallEvent {
        self.registration.begin_install()
    }

    /// Install handler. Requests skip-waiting immediately so the newest
    /// worker takes effect on the very next load instead of the next-next
    /// one. Returns the activate event the platform must dispatch next.
    pub fn handle_install(&mut self, event: &InstallEvent) -> Option<ActivateEvent> {
        debug!(worker = ?event.worker_id, "install: requesting skip-waiting");
        self.registration.skip_waiting();
        self.registration.install_complete()
    }

    /// Activate handler. Claims every open client so requests from
    /// already-open pages are serviced by this instance without a reload.
    /// In-flight requests between activation and claim are a benign race.
    pub fn handle_activate(&mut self, event: &ActivateEvent, clients: &mut Clients) {
        clients.claim(event.worker_id);
        self.registration.activate_complete();
        info!(worker = ?event.worker_id, claimed = clients.len(), "worker activated");
    }

    /// Current state of the authoritative instance, if any.
    pub fn state(&self) -> Option<WorkerLifecycleState> {
        self.registration.active_worker().map(|w| w.state)
    }

    /// Check whether the worker is activated.
    pub fn is_activated(&self) -> bool {
        self.registration
            .active_worker()
            .map(|w| w.is_activated())
            .unwrap_or(false)
    }

    /// Access the underlying registration.
    pub fn registration(&self) -> &WorkerRegistration {
        &self.registration
    }
}

// ==================== Cache ====================

/// Request identity: URL plus method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    /// Build a key from a method and URL.
    pub fn new(method: &str, url: &Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
        }
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Create an entry for a GET-style response.
    pub fn new(url: &Url, method: &str, status: u16, body: Vec<u8>) -> Self {
        Self {
            url: url.to_string(),
            method: method.to_ascii_uppercase(),
            status,
            headers: HashMap::new(),
            body,
            cached_at: now_ms(),
        }
    }

    /// The identity this entry is stored under.
    pub fn key(&self) -> RequestKey {
        RequestKey {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }
}

/// Persistent request-identity → response store. Read-through only: the
/// fallback proxy never writes. Entries accumulate via external seeding and
/// persist until explicitly cleared; no eviction policy exists, capacity is
/// bounded by the underlying storage quota.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheStore {
    entries: HashMap<RequestKey, CacheEntry>,
}

impl CacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a request by its identity.
    pub fn match_request(&self, request: &FetchRequest) -> Option<&CacheEntry> {
        self.entries.get(&request.key())
    }

    /// Seed one entry. The external population surface.
    pub fn seed(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key(), entry);
    }

    /// Seed many entries.
    pub fn seed_all(&mut self, entries: impl IntoIterator<Item = CacheEntry>) {
        for entry in entries {
            self.seed(entry);
        }
    }

    /// Delete one entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Explicit bulk invalidation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// All stored identities.
    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Fetch ====================

/// An intercepted request. Opaque to the core beyond its identity.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: String,

    /// Request headers.
    pub headers: HashMap<String, String>,
}

impl FetchRequest {
    /// Create a request.
    pub fn new(method: &str, url: Url) -> Self {
        Self {
            url,
            method: method.to_ascii_uppercase(),
            headers: HashMap::new(),
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    /// The request's cache identity.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

/// A fetch event.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// The intercepted request.
    pub request: FetchRequest,

    /// Originating client, when known.
    pub client_id: Option<String>,

    /// Is navigation request.
    pub is_navigation: bool,
}

impl FetchEvent {
    /// Wrap a request with no client attribution.
    pub fn new(request: FetchRequest) -> Self {
        Self {
            request,
            client_id: None,
            is_navigation: false,
        }
    }
}

/// Fetch event response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether served from cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a 200 response.
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            body,
            from_cache: false,
        }
    }

    /// Create a response from a cache entry.
    pub fn from_cache(entry: &CacheEntry) -> Self {
        Self {
            status: entry.status,
            status_text: "OK".to_string(),
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }
}

/// Capability for attempting a request against the live network. The host
/// wires in the real transport; tests wire in scripted ones.
pub trait NetworkFetcher {
    /// Attempt the request. Any rejection (connection error, offline,
    /// timeout) is a failure, not just non-2xx statuses.
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<FetchResponse, SwError>> + Send;
}

// ==================== Network Fallback Proxy ====================

/// Network-first fetch interception: freshness over availability. A stale
/// cached page is acceptable only when the network is truly unavailable, not
/// merely slow, so no timeout is imposed on the live attempt.
#[derive(Debug)]
pub struct NetworkFallbackProxy {
    cache: Arc<RwLock<CacheStore>>,
}

impl NetworkFallbackProxy {
    /// Create a proxy over the given store.
    pub fn new(cache: Arc<RwLock<CacheStore>>) -> Self {
        Self { cache }
    }

    /// Service an intercepted request. On network success the live response
    /// is returned verbatim and the cache is not touched. On rejection the
    /// cache is consulted; a miss propagates the original failure unchanged.
    pub async fn handle_fetch<N: NetworkFetcher>(
        &self,
        network: &N,
        event: &FetchEvent,
    ) -> Result<FetchResponse, SwError> {
        match network.fetch(&event.request).await {
            Ok(response) => Ok(response),
            Err(network_err) => {
                let cache = self.cache.read().await;
                match cache.match_request(&event.request) {
                    Some(entry) => {
                        debug!(url = %event.request.url, "network failed, serving cached fallback");
                        Ok(FetchResponse::from_cache(entry))
                    }
                    None => {
                        debug!(url = %event.request.url, "network failed, no cached fallback");
                        Err(network_err)
                    }
                }
            }
        }
    }
}

// ==================== Clients ====================

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    All,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

/// One open instance of the foreground application (a tab/window). Created
/// and destroyed by the host; the core only enumerates and queries.
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Visibility state.
    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,

    /// Worker instance controlling this client, if claimed.
    pub controller: Option<WorkerId>,
}

impl ClientContext {
    /// Create an unfocused window client.
    pub fn window(url: Url) -> Self {
        Self {
            id: format!("client-{}", uuid_simple()),
            url,
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controller: None,
        }
    }

    /// Whether this context supports being focused.
    pub fn supports_focus(&self) -> bool {
        self.client_type == ClientType::Window
    }
}

/// Registry of open clients. Backed by a Vec so enumeration order is
/// explicit: match_all returns insertion order and the interaction handler's
/// first-match tie-break is visible in code.
#[derive(Debug, Default)]
pub struct Clients {
    clients: Vec<ClientContext>,
}

impl Clients {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&ClientContext> {
        self.clients.iter().find(|c| c.id == id)
    }

    /// Enumerate clients of a type, in insertion order.
    pub fn match_all(&self, client_type: ClientType) -> Vec<&ClientContext> {
        self.clients
            .iter()
            .filter(|c| match client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect()
    }

    /// Add a client.
    pub fn add(&mut self, client: ClientContext) {
        self.clients.push(client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<ClientContext> {
        let index = self.clients.iter().position(|c| c.id == id)?;
        Some(self.clients.remove(index))
    }

    /// Claim every client for the given worker instance.
    pub fn claim(&mut self, worker: WorkerId) {
        for client in &mut self.clients {
            client.controller = Some(worker);
        }
    }

    /// Focus one client. Every other client loses focus, so at most one
    /// client is focused at a time.
    pub fn focus(&mut self, id: &str) -> Result<(), SwError> {
        let target = self
            .clients
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| SwError::NotFound(id.to_string()))?;
        if !target.supports_focus() {
            return Err(SwError::InvalidState(
                "Can only focus window clients".to_string(),
            ));
        }
        for client in &mut self.clients {
            client.focused = client.id == id;
        }
        Ok(())
    }

    /// Open a new window client, focused. Returns its ID.
    pub fn open_window(&mut self, url: Url) -> Result<String, SwError> {
        let mut client = ClientContext::window(url);
        client.focused = true;
        let id = client.id.clone();
        for existing in &mut self.clients {
            existing.focused = false;
        }
        self.clients.push(client);
        Ok(id)
    }

    /// The focused client, if any.
    pub fn focused(&self) -> Option<&ClientContext> {
        self.clients.iter().find(|c| c.focused)
    }

    /// Number of open clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// ==================== Notifications ====================

/// A notification action button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub label: String,
}

/// What gets handed to the host notification surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSpec {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,

    /// Deduplication key: a new notification with the same tag replaces a
    /// visible one rather than stacking.
    pub tag: String,

    /// Sticky until the user acts.
    pub require_interaction: bool,

    pub actions: Vec<NotificationAction>,
}

impl NotificationSpec {
    /// The workout-resume notification class. A paused workout timer must
    /// not be silently missed, so the notification stays visible until the
    /// user acts, with exactly one "Resume Workout" action.
    pub fn workout_resume(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            icon: NOTIFICATION_ICON.to_string(),
            badge: NOTIFICATION_BADGE.to_string(),
            tag: WORKOUT_NOTIFICATION_TAG.to_string(),
            require_interaction: true,
            actions: vec![NotificationAction {
                action: RESUME_ACTION_ID.to_string(),
                label: RESUME_ACTION_LABEL.to_string(),
            }],
        }
    }
}

/// Host notification surface. The dispatcher's contract ends at successful
/// submission here, not at user-visible render.
#[derive(Debug, Default)]
pub struct NotificationTray {
    visible: Vec<NotificationSpec>,
}

impl NotificationTray {
    /// Create an empty tray.
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a notification. A visible notification sharing the tag is
    /// replaced, not stacked.
    pub fn show(&mut self, spec: NotificationSpec) {
        self.visible.retain(|n| n.tag != spec.tag);
        info!(tag = %spec.tag, title = %spec.title, "notification shown");
        self.visible.push(spec);
    }

    /// Dismiss by tag.
    pub fn dismiss(&mut self, tag: &str) -> bool {
        let before = self.visible.len();
        self.visible.retain(|n| n.tag != tag);
        self.visible.len() != before
    }

    /// Currently visible notifications.
    pub fn visible(&self) -> &[NotificationSpec] {
        &self.visible
    }

    /// Find a visible notification by tag.
    pub fn find(&self, tag: &str) -> Option<&NotificationSpec> {
        self.visible.iter().find(|n| n.tag == tag)
    }
}

// ==================== Cross-Context Messaging ====================

/// Commands the worker recognizes. The protocol is deliberately narrow: the
/// only cross-context need is "show a notification", typically issued while
/// the application is backgrounded and cannot render in-page UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    ShowNotification { title: String, body: String },
}

/// Parse a cross-context message. Accepted iff `type` equals the recognized
/// constant and `title` is a non-empty string; anything else yields None and
/// is ignored, not errored — no error channel back to the sender exists.
pub fn parse_command(raw: &JsonValue) -> Option<WorkerCommand> {
    if raw.get("type")?.as_str()? != MSG_SHOW_NOTIFICATION {
        return None;
    }
    let title = raw.get("title")?.as_str()?;
    if title.is_empty() {
        return None;
    }
    let body = raw
        .get("body")
        .and_then(|b| b.as_str())
        .unwrap_or_default()
        .to_string();
    Some(WorkerCommand::ShowNotification {
        title: title.to_string(),
        body,
    })
}

// ==================== Extendable Events ====================

/// Async work registered against an event. The hosting process will not tear
/// the worker down before every registered task for the current event
/// settles.
#[derive(Debug)]
pub struct ExtendableEvent {
    name: &'static str,
    pending: Vec<JoinHandle<()>>,
}

impl ExtendableEvent {
    /// Create an event with no registered work.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: Vec::new(),
        }
    }

    /// Register async work performed after the triggering event.
    pub fn wait_until(&mut self, task: JoinHandle<()>) {
        self.pending.push(task);
    }

    /// Number of registered tasks.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Await every registered task.
    pub async fn settled(self) {
        for task in self.pending {
            if task.await.is_err() {
                warn!(event = self.name, "extended task panicked");
            }
        }
    }
}

// ==================== Worker Events ====================

/// Events delivered to the worker, processed one at a time in arrival order.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Install the pending instance.
    Install,
    /// Activate the installed instance.
    Activate,
    /// An intercepted request; the result goes back over `reply`.
    Fetch {
        event: FetchEvent,
        reply: oneshot::Sender<Result<FetchResponse, SwError>>,
    },
    /// A raw cross-context message from the foreground.
    Message { data: JsonValue },
    /// The user activated a displayed notification.
    NotificationClick { event: NotificationClickEvent },
    /// Stop the runtime.
    Shutdown,
}

// ==================== Worker Handle ====================

/// Foreground-side handle to the worker's event queue. Cloneable; every open
/// page holds one.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHandle {
    /// Post a cross-context message. The foreground is the only sender in
    /// this protocol.
    pub fn post_message(&self, data: JsonValue) -> Result<(), SwError> {
        self.event_tx
            .send(WorkerEvent::Message { data })
            .map_err(|_| SwError::InvalidState("worker has shut down".to_string()))
    }

    /// Submit an intercepted request and await the proxied response.
    pub async fn fetch(&self, event: FetchEvent) -> Result<FetchResponse, SwError> {
        let (reply, rx) = oneshot::channel();
        self.event_tx
            .send(WorkerEvent::Fetch { event, reply })
            .map_err(|_| SwError::InvalidState("worker has shut down".to_string()))?;
        rx.await
            .map_err(|_| SwError::InvalidState("worker dropped the request".to_string()))?
    }

    /// Deliver a notification interaction.
    pub fn notification_click(&self, event: NotificationClickEvent) -> Result<(), SwError> {
        self.event_tx
            .send(WorkerEvent::NotificationClick { event })
            .map_err(|_| SwError::InvalidState("worker has shut down".to_string()))
    }

    /// Stop the runtime after the events already queued.
    pub fn shutdown(&self) {
        let _ = self.event_tx.send(WorkerEvent::Shutdown);
    }
}

// ==================== Worker Runtime ====================

/// The worker process: owns lifecycle, proxy, clients and tray, and drains
/// the event queue serially. Each event's registered async work is awaited
/// before the next event is dequeued (extend-lifetime contract).
pub struct WorkerRuntime<N: NetworkFetcher> {
    scope: Url,
    lifecycle: LifecycleController,
    proxy: NetworkFallbackProxy,
    network: N,
    clients: Arc<RwLock<Clients>>,
    tray: Arc<RwLock<NotificationTray>>,
    event_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    pending_activation: Option<ActivateEvent>,
}

impl<N: NetworkFetcher> WorkerRuntime<N> {
    /// Process queued events one at a time, in arrival order, until
    /// shutdown or the last handle is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.event_rx.recv().await {
            match event {
                WorkerEvent::Shutdown => {
                    debug!("worker runtime shutting down");
                    break;
                }
                event => self.dispatch(event).await,
            }
        }
    }

    async fn dispatch(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Install => {
                let install = self.lifecycle.begin_install();
                self.pending_activation = self.lifecycle.handle_install(&install);
            }
            WorkerEvent::Activate => match self.pending_activation.take() {
                Some(activate) => {
                    let mut clients = self.clients.write().await;
                    self.lifecycle.handle_activate(&activate, &mut clients);
                }
                None => warn!("activate event with no activation pending"),
            },
            WorkerEvent::Fetch { event, reply } => {
                let result = self.proxy.handle_fetch(&self.network, &event).await;
                let _ = reply.send(result);
            }
            WorkerEvent::Message { data } => {
                let mut extendable = ExtendableEvent::new("message");
                match parse_command(&data) {
                    Some(WorkerCommand::ShowNotification { title, body }) => {
                        let tray = Arc::clone(&self.tray);
                        extendable.wait_until(tokio::spawn(async move {
                            let spec = NotificationSpec::workout_resume(title, body);
                            tray.write().await.show(spec);
                        }));
                    }
                    None => {
                        // Silently dropped: the protocol has no error channel
                        // back to the sender.
                        debug!("ignoring unrecognized cross-context message");
                    }
                }
                extendable.settled().await;
            }
            WorkerEvent::NotificationClick { event } => {
                if let Err(err) = self.handle_notification_click(&event).await {
                    // Unobserved rejection: logged, never surfaced.
                    warn!(error = %err, tag = %event.tag, "notification interaction failed");
                }
            }
            WorkerEvent::Shutdown => unreachable!("handled in run"),
        }
    }

    /// Interaction handler: dismiss first so a failed focus/open never
    /// leaves a dangling notification, then focus the first focusable window
    /// client in enumeration order, or open a new one at the root path.
    /// Exactly one of focus/open happens per interaction.
    async fn handle_notification_click(
        &self,
        event: &NotificationClickEvent,
    ) -> Result<(), SwError> {
        self.tray.write().await.dismiss(&event.tag);

        let mut clients = self.clients.write().await;
        let target = clients
            .match_all(ClientType::Window)
            .into_iter()
            .find(|c| c.supports_focus())
            .map(|c| c.id.clone());

        match target {
            Some(id) => clients.focus(&id),
            None => {
                let url = self
                    .scope
                    .join(ROOT_PATH)
                    .map_err(|e| SwError::InvalidState(e.to_string()))?;
                clients.open_window(url).map(|_| ())
            }
        }
    }
}

// ==================== Service Worker Host ====================

/// The thin once-at-startup initializer: builds the runtime, queues install
/// and activate, and hands the foreground its shared handles.
#[derive(Debug)]
pub struct ServiceWorkerHost {
    handle: WorkerHandle,
    cache: Arc<RwLock<CacheStore>>,
    clients: Arc<RwLock<Clients>>,
    tray: Arc<RwLock<NotificationTray>>,
}

impl ServiceWorkerHost {
    /// Register the worker for `scope`. Install and activate are already
    /// queued when this returns, so they precede any fetch, message, or
    /// notification-click the caller submits.
    pub fn register<N: NetworkFetcher>(scope: Url, network: N) -> (Self, WorkerRuntime<N>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let cache = Arc::new(RwLock::new(CacheStore::new()));
        let clients = Arc::new(RwLock::new(Clients::new()));
        let tray = Arc::new(RwLock::new(NotificationTray::new()));

        let runtime = WorkerRuntime {
            scope: scope.clone(),
            lifecycle: LifecycleController::new(scope),
            proxy: NetworkFallbackProxy::new(Arc::clone(&cache)),
            network,
            clients: Arc::clone(&clients),
            tray: Arc::clone(&tray),
            event_rx,
            pending_activation: None,
        };

        let _ = event_tx.send(WorkerEvent::Install);
        let _ = event_tx.send(WorkerEvent::Activate);

        let host = Self {
            handle: WorkerHandle { event_tx },
            cache,
            clients,
            tray,
        };
        (host, runtime)
    }

    /// A cloneable handle to the worker's event queue.
    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Shared cache store, for external seeding.
    pub fn cache(&self) -> Arc<RwLock<CacheStore>> {
        Arc::clone(&self.cache)
    }

    /// Shared client registry.
    pub fn clients(&self) -> Arc<RwLock<Clients>> {
        Arc::clone(&self.clients)
    }

    /// Shared notification tray.
    pub fn tray(&self) -> Arc<RwLock<NotificationTray>> {
        Arc::clone(&self.tray)
    }
}

// ==================== Helpers ====================

/// Milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a simple UUID-like string.
fn uuid_simple() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "{:016x}-{:04x}",
        now_ms(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    fn scope() -> Url {
        Url::parse("https://fitwave.app/").unwrap()
    }

    /// Scripted network: serves a fixed body while online, rejects while
    /// offline.
    #[derive(Clone)]
    struct ScriptedNetwork {
        online: Arc<AtomicBool>,
    }

    impl ScriptedNetwork {
        fn online() -> Self {
            Self {
                online: Arc::new(AtomicBool::new(true)),
            }
        }

        fn offline() -> Self {
            Self {
                online: Arc::new(AtomicBool::new(false)),
            }
        }

        fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }
    }

    impl NetworkFetcher for ScriptedNetwork {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, SwError> {
            if self.online.load(Ordering::SeqCst) {
                Ok(FetchResponse::ok(b"live".to_vec()))
            } else {
                Err(SwError::Network(format!("offline: {}", request.url)))
            }
        }
    }

    // ---- lifecycle ----

    #[test]
    fn test_install_skips_waiting() {
        let mut controller = LifecycleController::new(scope());
        let install = controller.begin_install();
        assert_eq!(
            controller.registration().installing.as_ref().unwrap().state,
            WorkerLifecycleState::Installing
        );

        let activate = controller.handle_install(&install);
        assert!(activate.is_some());
        // The new instance never parks in Waiting.
        assert!(controller.registration().waiting.is_none());
        assert_eq!(controller.state(), Some(WorkerLifecycleState::Activating));
    }

    #[test]
    fn test_activate_claims_all_clients() {
        let mut controller = LifecycleController::new(scope());
        let mut clients = Clients::new();
        clients.add(ClientContext::window(scope()));
        clients.add(ClientContext::window(scope()));

        let install = controller.begin_install();
        let activate = controller.handle_install(&install).unwrap();
        controller.handle_activate(&activate, &mut clients);

        assert!(controller.is_activated());
        for client in clients.match_all(ClientType::All) {
            assert_eq!(client.controller, Some(activate.worker_id));
        }
    }

    #[test]
    fn test_only_one_instance_activated() {
        let mut controller = LifecycleController::new(scope());
        let mut clients = Clients::new();

        let install = controller.begin_install();
        let activate = controller.handle_install(&install).unwrap();
        controller.handle_activate(&activate, &mut clients);
        let first = controller.registration().active_worker().unwrap().id;

        // A newer instance replaces the old one outright.
        let install = controller.begin_install();
        let activate = controller.handle_install(&install).unwrap();
        controller.handle_activate(&activate, &mut clients);

        let active = controller.registration().active_worker().unwrap();
        assert_ne!(active.id, first);
        assert!(active.is_activated());
        assert!(controller.registration().installing.is_none());
        assert!(controller.registration().waiting.is_none());
    }

    // ---- cache store ----

    #[test]
    fn test_cache_identity_is_url_plus_method() {
        let url = Url::parse("https://fitwave.app/api/workouts").unwrap();
        let mut store = CacheStore::new();
        store.seed(CacheEntry::new(&url, "GET", 200, b"[]".to_vec()));

        assert!(store.match_request(&FetchRequest::get(url.clone())).is_some());
        assert!(store.match_request(&FetchRequest::new("POST", url)).is_none());
    }

    #[test]
    fn test_cache_delete_and_clear() {
        let url = Url::parse("https://fitwave.app/app.css").unwrap();
        let mut store = CacheStore::new();
        let entry = CacheEntry::new(&url, "GET", 200, Vec::new());
        let key = entry.key();
        store.seed(entry);

        assert!(store.delete(&key));
        assert!(!store.delete(&key));

        store.seed_all(vec![
            CacheEntry::new(&url, "GET", 200, Vec::new()),
            CacheEntry::new(&Url::parse("https://fitwave.app/app.js").unwrap(), "GET", 200, Vec::new()),
        ]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.keys().len(), 2);
        store.clear();
        assert!(store.is_empty());
    }

    // ---- network fallback proxy ----

    #[tokio::test]
    async fn test_proxy_returns_live_response_verbatim() {
        let cache = Arc::new(RwLock::new(CacheStore::new()));
        let url = Url::parse("https://fitwave.app/api/plan").unwrap();
        cache
            .write()
            .await
            .seed(CacheEntry::new(&url, "GET", 200, b"stale".to_vec()));

        let proxy = NetworkFallbackProxy::new(Arc::clone(&cache));
        let response = proxy
            .handle_fetch(&ScriptedNetwork::online(), &FetchEvent::new(FetchRequest::get(url)))
            .await
            .unwrap();

        // No cache interposition on success.
        assert_eq!(response.body, b"live");
        assert!(!response.from_cache);
    }

    #[tokio::test]
    async fn test_proxy_success_never_writes_cache() {
        let cache = Arc::new(RwLock::new(CacheStore::new()));
        let proxy = NetworkFallbackProxy::new(Arc::clone(&cache));
        let url = Url::parse("https://fitwave.app/api/plan").unwrap();

        proxy
            .handle_fetch(&ScriptedNetwork::online(), &FetchEvent::new(FetchRequest::get(url)))
            .await
            .unwrap();

        assert!(cache.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_proxy_falls_back_to_cache_on_rejection() {
        let cache = Arc::new(RwLock::new(CacheStore::new()));
        let url = Url::parse("https://fitwave.app/").unwrap();
        cache
            .write()
            .await
            .seed(CacheEntry::new(&url, "GET", 200, b"shell".to_vec()));

        let proxy = NetworkFallbackProxy::new(cache);
        let response = proxy
            .handle_fetch(&ScriptedNetwork::offline(), &FetchEvent::new(FetchRequest::get(url)))
            .await
            .unwrap();

        assert_eq!(response.body, b"shell");
        assert!(response.from_cache);
    }

    #[tokio::test]
    async fn test_proxy_propagates_failure_on_cache_miss() {
        let proxy = NetworkFallbackProxy::new(Arc::new(RwLock::new(CacheStore::new())));
        let url = Url::parse("https://fitwave.app/api/history").unwrap();

        let err = proxy
            .handle_fetch(
                &ScriptedNetwork::offline(),
                &FetchEvent::new(FetchRequest::get(url.clone())),
            )
            .await
            .unwrap_err();

        // The original failure, unchanged.
        match err {
            SwError::Network(message) => assert_eq!(message, format!("offline: {}", url)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    // ---- clients ----

    #[test]
    fn test_match_all_preserves_insertion_order() {
        let mut clients = Clients::new();
        let a = ClientContext::window(scope());
        let b = ClientContext::window(scope());
        let (id_a, id_b) = (a.id.clone(), b.id.clone());
        clients.add(a);
        clients.add(b);

        let windows = clients.match_all(ClientType::Window);
        assert_eq!(windows[0].id, id_a);
        assert_eq!(windows[1].id, id_b);
    }

    #[test]
    fn test_focus_leaves_exactly_one_focused() {
        let mut clients = Clients::new();
        let mut a = ClientContext::window(scope());
        a.focused = true;
        let b = ClientContext::window(scope());
        let id_b = b.id.clone();
        clients.add(a);
        clients.add(b);

        clients.focus(&id_b).unwrap();
        let focused: Vec<_> = clients
            .match_all(ClientType::All)
            .into_iter()
            .filter(|c| c.focused)
            .collect();
        assert_eq!(focused.len(), 1);
        assert_eq!(focused[0].id, id_b);
    }

    #[test]
    fn test_focus_unknown_client() {
        let mut clients = Clients::new();
        assert!(matches!(
            clients.focus("client-missing"),
            Err(SwError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_window_focuses_new_client() {
        let mut clients = Clients::new();
        let id = clients.open_window(scope()).unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients.focused().unwrap().id, id);
    }

    // ---- notifications ----

    #[test]
    fn test_workout_resume_spec() {
        let spec = NotificationSpec::workout_resume("Workout Paused", "Resume when ready");
        assert_eq!(spec.tag, WORKOUT_NOTIFICATION_TAG);
        assert!(spec.require_interaction);
        assert_eq!(
            spec.actions,
            vec![NotificationAction {
                action: RESUME_ACTION_ID.to_string(),
                label: RESUME_ACTION_LABEL.to_string(),
            }]
        );
    }

    #[test]
    fn test_tray_same_tag_replaces() {
        let mut tray = NotificationTray::new();
        tray.show(NotificationSpec::workout_resume("First", ""));
        tray.show(NotificationSpec::workout_resume("Second", ""));

        assert_eq!(tray.visible().len(), 1);
        assert_eq!(tray.visible()[0].title, "Second");
    }

    #[test]
    fn test_tray_dismiss() {
        let mut tray = NotificationTray::new();
        tray.show(NotificationSpec::workout_resume("Paused", ""));

        assert!(tray.dismiss(WORKOUT_NOTIFICATION_TAG));
        assert!(tray.visible().is_empty());
        assert!(!tray.dismiss(WORKOUT_NOTIFICATION_TAG));
    }

    // ---- messaging ----

    #[test]
    fn test_parse_recognized_message() {
        let raw = json!({
            "type": "SHOW_NOTIFICATION",
            "title": "Workout Paused",
            "body": "Resume when ready"
        });
        assert_eq!(
            parse_command(&raw),
            Some(WorkerCommand::ShowNotification {
                title: "Workout Paused".to_string(),
                body: "Resume when ready".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_body_is_optional() {
        let raw = json!({"type": "SHOW_NOTIFICATION", "title": "Paused"});
        assert_eq!(
            parse_command(&raw),
            Some(WorkerCommand::ShowNotification {
                title: "Paused".to_string(),
                body: String::new(),
            })
        );
    }

    #[test]
    fn test_parse_rejects_malformed_messages() {
        // Missing title.
        assert_eq!(parse_command(&json!({"type": "SHOW_NOTIFICATION"})), None);
        // Empty title.
        assert_eq!(
            parse_command(&json!({"type": "SHOW_NOTIFICATION", "title": ""})),
            None
        );
        // Non-string title.
        assert_eq!(
            parse_command(&json!({"type": "SHOW_NOTIFICATION", "title": 7})),
            None
        );
        // Unknown type.
        assert_eq!(
            parse_command(&json!({"type": "SYNC_WORKOUTS", "title": "x"})),
            None
        );
        // Not an object.
        assert_eq!(parse_command(&json!("SHOW_NOTIFICATION")), None);
    }

    // ---- extendable events ----

    #[tokio::test]
    async fn test_extendable_event_settles_registered_work() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut event = ExtendableEvent::new("test");

        let task_flag = Arc::clone(&flag);
        event.wait_until(tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            task_flag.store(true, Ordering::SeqCst);
        }));

        assert_eq!(event.pending(), 1);
        event.settled().await;
        assert!(flag.load(Ordering::SeqCst));
    }

    // ---- runtime end to end ----

    #[tokio::test]
    async fn test_runtime_offline_fetch_round_trip() {
        let network = ScriptedNetwork::online();
        let (host, runtime) = ServiceWorkerHost::register(scope(), network.clone());
        let worker = tokio::spawn(runtime.run());
        let handle = host.handle();

        let url = Url::parse("https://fitwave.app/").unwrap();
        host.cache()
            .write()
            .await
            .seed(CacheEntry::new(&url, "GET", 200, b"shell".to_vec()));

        let live = handle
            .fetch(FetchEvent::new(FetchRequest::get(url.clone())))
            .await
            .unwrap();
        assert!(!live.from_cache);

        network.set_online(false);
        let fallback = handle
            .fetch(FetchEvent::new(FetchRequest::get(url)))
            .await
            .unwrap();
        assert!(fallback.from_cache);
        assert_eq!(fallback.body, b"shell");

        let miss_url = Url::parse("https://fitwave.app/api/history").unwrap();
        let err = handle
            .fetch(FetchEvent::new(FetchRequest::get(miss_url)))
            .await
            .unwrap_err();
        assert!(matches!(err, SwError::Network(_)));

        handle.shutdown();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_runtime_shows_notification_from_message() {
        let (host, runtime) = ServiceWorkerHost::register(scope(), ScriptedNetwork::online());
        let worker = tokio::spawn(runtime.run());
        let handle = host.handle();

        handle
            .post_message(json!({
                "type": "SHOW_NOTIFICATION",
                "title": "Workout Paused",
                "body": "Resume when ready"
            }))
            .unwrap();

        // A second message with the same tag replaces, never stacks.
        handle
            .post_message(json!({
                "type": "SHOW_NOTIFICATION",
                "title": "Still Paused",
                "body": ""
            }))
            .unwrap();

        // Malformed: dropped with no error back to the sender.
        handle.post_message(json!({"type": "SHOW_NOTIFICATION"})).unwrap();

        handle.shutdown();
        worker.await.unwrap();

        let tray = host.tray();
        let tray = tray.read().await;
        assert_eq!(tray.visible().len(), 1);
        let shown = tray.find(WORKOUT_NOTIFICATION_TAG).unwrap();
        assert_eq!(shown.title, "Still Paused");
        assert!(shown.require_interaction);
        assert_eq!(shown.actions.len(), 1);
        assert_eq!(shown.actions[0].label, RESUME_ACTION_LABEL);
    }

    #[tokio::test]
    async fn test_click_focuses_first_window_and_opens_none() {
        let (host, runtime) = ServiceWorkerHost::register(scope(), ScriptedNetwork::online());
        let worker = tokio::spawn(runtime.run());
        let handle = host.handle();

        let first_id = {
            let clients = host.clients();
            let mut clients = clients.write().await;
            let first = ClientContext::window(scope());
            let id = first.id.clone();
            clients.add(first);
            clients.add(ClientContext::window(scope()));
            id
        };

        host.tray()
            .write()
            .await
            .show(NotificationSpec::workout_resume("Paused", ""));

        handle
            .notification_click(NotificationClickEvent {
                tag: WORKOUT_NOTIFICATION_TAG.to_string(),
                action: Some(RESUME_ACTION_ID.to_string()),
            })
            .unwrap();

        handle.shutdown();
        worker.await.unwrap();

        let clients = host.clients();
        let clients = clients.read().await;
        // First-match: the first window in enumeration order was focused,
        // no new context opened.
        assert_eq!(clients.len(), 2);
        assert_eq!(clients.focused().unwrap().id, first_id);

        // Dismissed before the focus decision.
        assert!(host.tray().read().await.visible().is_empty());
    }

    #[tokio::test]
    async fn test_click_opens_root_when_no_clients() {
        let (host, runtime) = ServiceWorkerHost::register(scope(), ScriptedNetwork::online());
        let worker = tokio::spawn(runtime.run());
        let handle = host.handle();

        host.tray()
            .write()
            .await
            .show(NotificationSpec::workout_resume("Paused", ""));

        handle
            .notification_click(NotificationClickEvent {
                tag: WORKOUT_NOTIFICATION_TAG.to_string(),
                action: None,
            })
            .unwrap();

        handle.shutdown();
        worker.await.unwrap();

        let clients = host.clients();
        let clients = clients.read().await;
        assert_eq!(clients.len(), 1);
        let opened = clients.focused().unwrap();
        assert_eq!(opened.url.path(), ROOT_PATH);
        assert!(host.tray().read().await.visible().is_empty());
    }

    #[tokio::test]
    async fn test_register_claims_preexisting_clients() {
        let (host, runtime) = ServiceWorkerHost::register(scope(), ScriptedNetwork::online());

        // A page already open before the runtime starts draining events.
        let id = {
            let clients = host.clients();
            let mut guard = clients.write().await;
            let client = ClientContext::window(scope());
            let id = client.id.clone();
            guard.add(client);
            id
        };

        let worker = tokio::spawn(runtime.run());
        let handle = host.handle();

        // Install and activate were queued by register, so a completed fetch
        // implies they both ran first.
        let url = Url::parse("https://fitwave.app/").unwrap();
        handle
            .fetch(FetchEvent::new(FetchRequest::get(url)))
            .await
            .unwrap();

        let clients = host.clients();
        let guard = clients.read().await;
        assert!(guard.get(&id).unwrap().controller.is_some());
        drop(guard);

        handle.shutdown();
        worker.await.unwrap();
    }
}
