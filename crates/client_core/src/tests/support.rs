use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use media_transport::{
    ClientConfig, DeviceError, JoinOptions, MediaEngine, MediaTrack, NoTokenProvider,
    TransportClient, TransportEvent,
};
use shared::{
    domain::{
        AudienceLatency, ChannelName, ClientRole, MediaKind, ParticipantId, RemoteParticipant,
        ViewHandle,
    },
    error::Alert,
    protocol::{ChatMessage, NewChatMessage},
};
use storage::{InsertSubscription, MessageStore, SubscriptionEvent};
use tokio::sync::{broadcast, mpsc};

use crate::{
    media::MediaSessionController,
    session::{Session, SharedSession},
    surface::{ChatRow, ControlState, RenderSurface},
    views::ViewRegistry,
    ClientEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    CreateView(ViewHandle, String),
    RemoveView(ViewHandle),
    Append(ChatRow),
    Clear,
    Notice(String),
    Alert(Alert),
    Controls(ControlState),
}

pub struct RecordingSurface {
    calls: StdMutex<Vec<SurfaceCall>>,
    controls: StdMutex<ControlState>,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: StdMutex::new(Vec::new()),
            controls: StdMutex::new(ControlState::idle()),
        })
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().expect("surface calls").clone()
    }

    fn record(&self, call: SurfaceCall) {
        self.calls.lock().expect("surface calls").push(call);
    }

    /// Rows rendered since the last clear.
    pub fn rows(&self) -> Vec<ChatRow> {
        let mut rows = Vec::new();
        for call in self.calls() {
            match call {
                SurfaceCall::Append(row) => rows.push(row),
                SurfaceCall::Clear => rows.clear(),
                _ => {}
            }
        }
        rows
    }

    pub fn contents(&self) -> Vec<String> {
        self.rows().into_iter().map(|row| row.content).collect()
    }

    pub fn live_views(&self) -> Vec<ViewHandle> {
        let mut views = Vec::new();
        for call in self.calls() {
            match call {
                SurfaceCall::CreateView(view, _) => views.push(view),
                SurfaceCall::RemoveView(view) => views.retain(|live| *live != view),
                _ => {}
            }
        }
        views
    }

    pub fn removals_of(&self, view: ViewHandle) -> usize {
        self.calls()
            .into_iter()
            .filter(|call| *call == SurfaceCall::RemoveView(view))
            .count()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Alert(alert) => Some(alert),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Notice(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn controls_history(&self) -> Vec<ControlState> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Controls(controls) => Some(controls),
                _ => None,
            })
            .collect()
    }
}

impl RenderSurface for RecordingSurface {
    fn create_view(&self, view: ViewHandle, label: &str) {
        self.record(SurfaceCall::CreateView(view, label.to_string()));
    }

    fn remove_view(&self, view: ViewHandle) {
        self.record(SurfaceCall::RemoveView(view));
    }

    fn append_message(&self, row: ChatRow) {
        self.record(SurfaceCall::Append(row));
    }

    fn clear_messages(&self) {
        self.record(SurfaceCall::Clear);
    }

    fn system_notice(&self, text: &str) {
        self.record(SurfaceCall::Notice(text.to_string()));
    }

    fn alert(&self, alert: &Alert) {
        self.record(SurfaceCall::Alert(alert.clone()));
    }

    fn controls(&self) -> ControlState {
        *self.controls.lock().expect("controls")
    }

    fn set_controls(&self, controls: ControlState) {
        *self.controls.lock().expect("controls") = controls;
        self.record(SurfaceCall::Controls(controls));
    }
}

pub struct MockTrack {
    kind: MediaKind,
    closed: AtomicBool,
    target: StdMutex<Option<Option<ViewHandle>>>,
}

impl MockTrack {
    pub fn new(kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            closed: AtomicBool::new(false),
            target: StdMutex::new(None),
        })
    }

    /// `Some(target)` once `play` was called.
    pub fn played_on(&self) -> Option<Option<ViewHandle>> {
        *self.target.lock().expect("track target")
    }
}

impl MediaTrack for MockTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn play(&self, target: Option<ViewHandle>) -> Result<()> {
        if self.is_closed() {
            bail!("track closed");
        }
        *self.target.lock().expect("track target") = Some(target);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TransportScript {
    pub fail_join: bool,
    pub fail_publish: bool,
    pub fail_leave: bool,
    pub fail_subscribe: bool,
}

pub struct MockTransport {
    script: StdMutex<TransportScript>,
    events: broadcast::Sender<TransportEvent>,
    calls: StdMutex<Vec<String>>,
    subscribed: StdMutex<Vec<Arc<MockTrack>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            script: StdMutex::new(TransportScript::default()),
            events,
            calls: StdMutex::new(Vec::new()),
            subscribed: StdMutex::new(Vec::new()),
        })
    }

    pub fn script(&self, script: TransportScript) {
        *self.script.lock().expect("script") = script;
    }

    fn current(&self) -> TransportScript {
        *self.script.lock().expect("script")
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("transport calls").push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("transport calls").clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn subscribed(&self) -> Vec<Arc<MockTrack>> {
        self.subscribed.lock().expect("subscribed").clone()
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl TransportClient for MockTransport {
    async fn join(&self, options: JoinOptions) -> Result<ParticipantId> {
        self.record(format!(
            "join:{}:{}",
            options.channel,
            if options.token.is_some() { "token" } else { "open" }
        ));
        if self.current().fail_join {
            bail!("gateway rejected join");
        }
        Ok(ParticipantId(7))
    }

    async fn leave(&self) -> Result<()> {
        self.record("leave".to_string());
        if self.current().fail_leave {
            bail!("gateway unreachable");
        }
        Ok(())
    }

    async fn set_client_role(
        &self,
        role: ClientRole,
        latency: Option<AudienceLatency>,
    ) -> Result<()> {
        self.record(format!("role:{role:?}:{latency:?}"));
        Ok(())
    }

    async fn publish(&self, tracks: Vec<Arc<dyn MediaTrack>>) -> Result<()> {
        let kinds = tracks
            .iter()
            .map(|track| track.kind().to_string())
            .collect::<Vec<_>>();
        self.record(format!("publish:{}", kinds.join("+")));
        if self.current().fail_publish {
            bail!("publish rejected");
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        participant_id: ParticipantId,
        kind: MediaKind,
    ) -> Result<Arc<dyn MediaTrack>> {
        self.record(format!("subscribe:{participant_id}:{kind}"));
        if self.current().fail_subscribe {
            bail!("subscribe rejected");
        }
        let track = MockTrack::new(kind);
        self.subscribed
            .lock()
            .expect("subscribed")
            .push(Arc::clone(&track));
        Ok(track as Arc<dyn MediaTrack>)
    }

    async fn remote_participants(&self) -> Vec<RemoteParticipant> {
        Vec::new()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

pub struct MockEngine {
    transport: Arc<MockTransport>,
    created: AtomicUsize,
    deny_camera: AtomicBool,
    local_tracks: StdMutex<Vec<Arc<MockTrack>>>,
}

impl MockEngine {
    pub fn new(transport: Arc<MockTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            created: AtomicUsize::new(0),
            deny_camera: AtomicBool::new(false),
            local_tracks: StdMutex::new(Vec::new()),
        })
    }

    pub fn clients_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn deny_camera(&self) {
        self.deny_camera.store(true, Ordering::SeqCst);
    }

    pub fn local_tracks(&self) -> Vec<Arc<MockTrack>> {
        self.local_tracks.lock().expect("local tracks").clone()
    }

    fn capture(&self, kind: MediaKind) -> Arc<dyn MediaTrack> {
        let track = MockTrack::new(kind);
        self.local_tracks
            .lock()
            .expect("local tracks")
            .push(Arc::clone(&track));
        track
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    fn create_client(&self, _config: ClientConfig) -> Arc<dyn TransportClient> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Arc::clone(&self.transport) as Arc<dyn TransportClient>
    }

    async fn create_microphone_track(&self) -> Result<Arc<dyn MediaTrack>> {
        Ok(self.capture(MediaKind::Audio))
    }

    async fn create_camera_track(&self) -> Result<Arc<dyn MediaTrack>> {
        if self.deny_camera.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied(MediaKind::Video).into());
        }
        Ok(self.capture(MediaKind::Video))
    }
}

#[derive(Default)]
pub struct MockStore {
    unavailable: AtomicBool,
    fail_insert: AtomicBool,
    fail_subscribe: AtomicBool,
    history: StdMutex<Vec<ChatMessage>>,
    inserted: StdMutex<Vec<NewChatMessage>>,
    arrive_during_history: StdMutex<Vec<ChatMessage>>,
    feeds: StdMutex<Vec<mpsc::Sender<SubscriptionEvent>>>,
    calls: StdMutex<Vec<&'static str>>,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self) {
        self.fail_insert.store(true, Ordering::SeqCst);
    }

    pub fn fail_subscribes(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }

    pub fn seed_history(&self, messages: Vec<ChatMessage>) {
        *self.history.lock().expect("history") = messages;
    }

    /// Queued onto the live feed while history is being fetched.
    pub fn arrive_during_history(&self, messages: Vec<ChatMessage>) {
        *self.arrive_during_history.lock().expect("pending") = messages;
    }

    pub fn inserted(&self) -> Vec<NewChatMessage> {
        self.inserted.lock().expect("inserted").clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("store calls").clone()
    }

    pub fn subscriptions(&self) -> usize {
        self.feeds.lock().expect("feeds").len()
    }

    fn latest_feed(&self) -> Option<mpsc::Sender<SubscriptionEvent>> {
        self.feeds.lock().expect("feeds").last().cloned()
    }

    pub async fn push_live(&self, message: ChatMessage) {
        if let Some(feed) = self.latest_feed() {
            let _ = feed.send(SubscriptionEvent::Inserted(message)).await;
        }
    }

    pub async fn drop_feed(&self, reason: &str) {
        if let Some(feed) = self.latest_feed() {
            let _ = feed
                .send(SubscriptionEvent::Closed {
                    reason: reason.to_string(),
                })
                .await;
        }
    }
}

#[async_trait]
impl MessageStore for MockStore {
    async fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn insert(&self, message: NewChatMessage) -> Result<ChatMessage> {
        self.calls.lock().expect("store calls").push("insert");
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(anyhow!("insert rejected"));
        }
        let mut inserted = self.inserted.lock().expect("inserted");
        inserted.push(message.clone());
        Ok(message.into_stored(Some(inserted.len() as i64)))
    }

    async fn history(&self, _channel: &ChannelName, limit: u32) -> Result<Vec<ChatMessage>> {
        self.calls.lock().expect("store calls").push("history");
        let pending = std::mem::take(&mut *self.arrive_during_history.lock().expect("pending"));
        if let Some(feed) = self.latest_feed() {
            for message in pending {
                let _ = feed.try_send(SubscriptionEvent::Inserted(message));
            }
        }
        let history = self.history.lock().expect("history");
        Ok(history.iter().take(limit as usize).cloned().collect())
    }

    async fn subscribe_inserts(&self, channel: &ChannelName) -> Result<InsertSubscription> {
        self.calls.lock().expect("store calls").push("subscribe");
        if self.fail_subscribe.load(Ordering::SeqCst) {
            bail!("realtime refused");
        }
        let (tx, rx) = mpsc::channel(16);
        self.feeds.lock().expect("feeds").push(tx);
        Ok(InsertSubscription::new(
            channel.clone(),
            rx,
            tokio::spawn(async {}),
        ))
    }
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_557_600 + seconds, 0)
        .single()
        .expect("timestamp")
}

pub fn message(id: i64, sender_id: &str, content: &str, seconds: i64) -> ChatMessage {
    ChatMessage {
        id: Some(id),
        channel: ChannelName::parse("test").expect("channel"),
        content: content.to_string(),
        sender_id: sender_id.to_string(),
        sender_name: format!("{sender_id}-name"),
        created_at: at(seconds),
    }
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub struct MediaFixture {
    pub controller: Arc<MediaSessionController>,
    pub session: SharedSession,
    pub views: Arc<ViewRegistry>,
    pub surface: Arc<RecordingSurface>,
    pub engine: Arc<MockEngine>,
    pub transport: Arc<MockTransport>,
    pub events: broadcast::Receiver<ClientEvent>,
}

pub fn media_fixture() -> MediaFixture {
    let transport = MockTransport::new();
    let engine = MockEngine::new(Arc::clone(&transport));
    let surface = RecordingSurface::new();
    let session = Session::shared("guest");
    let views = Arc::new(ViewRegistry::new(surface.clone()));
    let (events, receiver) = broadcast::channel(64);
    let controller = MediaSessionController::new(
        engine.clone(),
        Arc::new(NoTokenProvider),
        "app-id",
        Arc::clone(&session),
        Arc::clone(&views),
        events,
    );
    MediaFixture {
        controller,
        session,
        views,
        surface,
        engine,
        transport,
        events: receiver,
    }
}
