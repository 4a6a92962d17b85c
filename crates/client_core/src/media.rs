//! Media session lifecycle: host and audience joins, leave, and remote
//! publish handling.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use media_transport::{
    ClientConfig, JoinOptions, MediaEngine, MediaTrack, TokenProvider, TransportClient,
    TransportEvent,
};
use shared::domain::{
    AudienceLatency, ChannelName, ClientRole, MediaKind, ParticipantId, RemoteParticipant,
};
use tokio::{
    sync::{broadcast, Mutex, OnceCell},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::ClientError,
    session::SharedSession,
    views::{ViewOwner, ViewRegistry},
    ClientEvent,
};

const AUDIENCE_LATENCY: AudienceLatency = AudienceLatency::UltraLow;

type EpochEvents = (u64, broadcast::Receiver<TransportEvent>);

/// Camera and microphone tracks held while hosting.
struct LocalMedia {
    audio: Arc<dyn MediaTrack>,
    video: Arc<dyn MediaTrack>,
}

impl LocalMedia {
    fn release(self) {
        self.audio.close();
        self.video.close();
    }
}

struct RemoteMedia {
    participant: RemoteParticipant,
    audio: Option<Arc<dyn MediaTrack>>,
    video: Option<Arc<dyn MediaTrack>>,
}

impl RemoteMedia {
    fn new(participant_id: ParticipantId) -> Self {
        Self {
            participant: RemoteParticipant::new(participant_id),
            audio: None,
            video: None,
        }
    }

    fn slot(&mut self, kind: MediaKind) -> &mut Option<Arc<dyn MediaTrack>> {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }

    fn release(self) {
        for track in [self.audio, self.video].into_iter().flatten() {
            track.close();
        }
    }
}

pub struct MediaSessionController {
    engine: Arc<dyn MediaEngine>,
    tokens: Arc<dyn TokenProvider>,
    app_id: String,
    session: SharedSession,
    views: Arc<ViewRegistry>,
    events: broadcast::Sender<ClientEvent>,
    client: OnceCell<Arc<dyn TransportClient>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped at the start of every join; remote events carry the epoch they were received in.
    join_epoch: AtomicU64,
    fresh_events: Mutex<Option<EpochEvents>>,
    local: Mutex<Option<LocalMedia>>,
    remote: Mutex<HashMap<ParticipantId, RemoteMedia>>,
}

impl MediaSessionController {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        tokens: Arc<dyn TokenProvider>,
        app_id: impl Into<String>,
        session: SharedSession,
        views: Arc<ViewRegistry>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            tokens,
            app_id: app_id.into(),
            session,
            views,
            events,
            client: OnceCell::new(),
            event_task: Mutex::new(None),
            join_epoch: AtomicU64::new(0),
            fresh_events: Mutex::new(None),
            local: Mutex::new(None),
            remote: Mutex::new(HashMap::new()),
        })
    }

    /// Creates the transport client and registers event handling. Idempotent.
    pub async fn initialize(self: &Arc<Self>) -> Arc<dyn TransportClient> {
        let client = self
            .client
            .get_or_init(|| async {
                info!("media: creating transport client");
                self.engine.create_client(ClientConfig::live_broadcast())
            })
            .await;

        let mut task = self.event_task.lock().await;
        if task.is_none() {
            *task = Some(self.spawn_event_task(Arc::clone(client)));
        }
        Arc::clone(client)
    }

    fn spawn_event_task(self: &Arc<Self>, client: Arc<dyn TransportClient>) -> JoinHandle<()> {
        let mut events = client.subscribe_events();
        let mut epoch = self.join_epoch.load(Ordering::SeqCst);
        let controller = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "media: transport events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                // the fresh receiver holds every event sent since the fence
                if let Some((next_epoch, fresh)) = controller.fresh_events.lock().await.take() {
                    debug!(epoch = next_epoch, "media: switching to fresh transport events");
                    epoch = next_epoch;
                    events = fresh;
                    continue;
                }
                controller.handle_epoch_event(event, epoch).await;
            }
        })
    }

    /// Starts a new join epoch. Events queued before this point are dropped
    /// and any still in flight fail the epoch check.
    async fn fence_events(&self, client: &Arc<dyn TransportClient>) {
        let fresh = client.subscribe_events();
        let epoch = self.join_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.fresh_events.lock().await = Some((epoch, fresh));
    }

    pub(crate) fn join_epoch(&self) -> u64 {
        self.join_epoch.load(Ordering::SeqCst)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.join_epoch() == epoch
    }

    pub async fn join_as_host(
        self: &Arc<Self>,
        channel: &str,
        display_name: &str,
    ) -> Result<ParticipantId, ClientError> {
        let channel = ChannelName::parse(channel)?;
        self.ensure_not_member().await?;
        let client = self.initialize().await;
        self.fence_events(&client).await;
        self.views.open().await;

        let local_id = match self.connect(&client, &channel, ClientRole::Host, None).await {
            Ok(local_id) => local_id,
            Err(err) => {
                self.views.close().await;
                return Err(err);
            }
        };
        self.session
            .write()
            .await
            .enter(ClientRole::Host, local_id, channel.clone(), Some(display_name));

        if let Err(err) = self.publish_local(&client, local_id).await {
            error!(channel = %channel, "media: host join failed after connect: {err}");
            self.rollback(&client).await;
            return Err(err);
        }

        info!(channel = %channel, local_id = local_id.0, "media: hosting");
        self.emit_session().await;
        Ok(local_id)
    }

    pub async fn join_as_audience(
        self: &Arc<Self>,
        channel: &str,
        display_name: &str,
    ) -> Result<ParticipantId, ClientError> {
        let channel = ChannelName::parse(channel)?;
        self.ensure_not_member().await?;
        let client = self.initialize().await;
        self.fence_events(&client).await;
        self.views.open().await;

        let local_id = match self
            .connect(&client, &channel, ClientRole::Audience, Some(AUDIENCE_LATENCY))
            .await
        {
            Ok(local_id) => local_id,
            Err(err) => {
                self.views.close().await;
                return Err(err);
            }
        };
        self.session
            .write()
            .await
            .enter(ClientRole::Audience, local_id, channel.clone(), Some(display_name));

        info!(channel = %channel, local_id = local_id.0, "media: watching");
        self.emit_session().await;
        Ok(local_id)
    }

    async fn ensure_not_member(&self) -> Result<(), ClientError> {
        if self.session.read().await.is_member() {
            return Err(ClientError::Join("already in a channel".to_string()));
        }
        Ok(())
    }

    async fn connect(
        &self,
        client: &Arc<dyn TransportClient>,
        channel: &ChannelName,
        role: ClientRole,
        latency: Option<AudienceLatency>,
    ) -> Result<ParticipantId, ClientError> {
        let token = self
            .tokens
            .fetch_token(channel, None, role)
            .await
            .map_err(|err| ClientError::Join(err.to_string()))?;
        client
            .set_client_role(role, latency)
            .await
            .map_err(|err| ClientError::Join(err.to_string()))?;
        client
            .join(JoinOptions {
                app_id: self.app_id.clone(),
                channel: channel.clone(),
                token,
                local_id: None,
            })
            .await
            .map_err(|err| ClientError::Join(format!("{err:#}")))
    }

    async fn publish_local(
        &self,
        client: &Arc<dyn TransportClient>,
        local_id: ParticipantId,
    ) -> Result<(), ClientError> {
        let audio = self
            .engine
            .create_microphone_track()
            .await
            .map_err(|err| ClientError::MediaAcquisition(err.to_string()))?;
        let video = match self.engine.create_camera_track().await {
            Ok(video) => video,
            Err(err) => {
                audio.close();
                return Err(ClientError::MediaAcquisition(err.to_string()));
            }
        };
        *self.local.lock().await = Some(LocalMedia {
            audio: Arc::clone(&audio),
            video: Arc::clone(&video),
        });

        client
            .publish(vec![audio, Arc::clone(&video)])
            .await
            .map_err(|err| ClientError::Join(format!("publish failed: {err:#}")))?;

        let view = self
            .views
            .upsert(ViewOwner::Local, &format!("Local user {local_id}"))
            .await
            .ok_or_else(|| ClientError::Join("views closed during join".to_string()))?;
        video
            .play(Some(view))
            .map_err(|err| ClientError::MediaAcquisition(err.to_string()))
    }

    /// Undoes a host join that failed after the transport connected.
    async fn rollback(&self, client: &Arc<dyn TransportClient>) {
        if let Some(local) = self.local.lock().await.take() {
            local.release();
        }
        self.views.close().await;
        self.release_remote().await;
        if let Err(err) = client.leave().await {
            warn!("media: leave during rollback failed: {err}");
        }
        self.session.write().await.reset();
        self.emit_session().await;
    }

    /// Always tears down local state; a transport failure is reported afterwards.
    pub async fn leave(&self) -> Result<(), ClientError> {
        let was_member = self.session.read().await.is_member();
        let local = self.local.lock().await.take();
        if !was_member && local.is_none() {
            debug!("media: leave requested outside a channel");
            return Ok(());
        }

        if let Some(local) = local {
            local.release();
        }
        let removed = self.views.close().await;
        self.release_remote().await;
        self.session.write().await.reset();
        self.emit_session().await;

        let result = match self.client.get() {
            Some(client) => client.leave().await.map_err(|err| {
                warn!("media: transport leave failed: {err}");
                ClientError::Leave(err.to_string())
            }),
            None => Ok(()),
        };
        info!(views_removed = removed, "media: left channel");
        result
    }

    pub async fn remote_participants(&self) -> Vec<RemoteParticipant> {
        let remote = self.remote.lock().await;
        snapshot(&remote)
    }

    pub async fn is_publishing(&self) -> bool {
        self.local.lock().await.is_some()
    }

    pub async fn shutdown(&self) {
        if let Err(err) = self.leave().await {
            warn!("media: {err}");
        }
        if let Some(task) = self.event_task.lock().await.take() {
            task.abort();
        }
    }

    pub(crate) async fn handle_transport_event(&self, event: TransportEvent) {
        self.handle_epoch_event(event, self.join_epoch()).await;
    }

    async fn handle_epoch_event(&self, event: TransportEvent, epoch: u64) {
        match event {
            TransportEvent::ConnectionStateChanged { previous, current } => {
                info!(?previous, ?current, "media: connection state changed");
                let _ = self.events.send(ClientEvent::ConnectionStateChanged(current));
            }
            event if !self.is_current(epoch) => {
                debug!(epoch, ?event, "media: dropping event from an earlier join");
            }
            TransportEvent::RemotePublished {
                participant_id,
                kind,
            } => self.on_remote_published(participant_id, kind, epoch).await,
            TransportEvent::RemoteUnpublished {
                participant_id,
                kind,
            } => self.on_remote_unpublished(participant_id, kind).await,
            TransportEvent::RemoteLeft { participant_id } => {
                self.on_remote_left(participant_id).await
            }
        }
    }

    async fn on_remote_published(
        &self,
        participant_id: ParticipantId,
        kind: MediaKind,
        epoch: u64,
    ) {
        // open from the start of a join until leave or rollback
        if !self.views.is_open().await {
            debug!(%participant_id, %kind, "media: ignoring publish outside a channel");
            return;
        }
        let Some(client) = self.client.get().cloned() else {
            return;
        };
        let track = match client.subscribe(participant_id, kind).await {
            Ok(track) => track,
            Err(err) => {
                warn!(%participant_id, %kind, "media: subscribe failed: {err}");
                return;
            }
        };
        if !self.is_current(epoch) {
            track.close();
            return;
        }

        let played = match kind {
            MediaKind::Video => {
                let label = format!("Remote user {participant_id}");
                match self.views.upsert(ViewOwner::Remote(participant_id), &label).await {
                    Some(view) => track.play(Some(view)),
                    None => {
                        track.close();
                        return;
                    }
                }
            }
            MediaKind::Audio => track.play(None),
        };
        if let Err(err) = played {
            warn!(%participant_id, %kind, "media: remote playback failed: {err}");
        }

        let participants = {
            let mut remote = self.remote.lock().await;
            // leave() closes the views before clearing this map
            if !self.views.is_open().await || !self.is_current(epoch) {
                track.close();
                return;
            }
            let entry = remote
                .entry(participant_id)
                .or_insert_with(|| RemoteMedia::new(participant_id));
            if let Some(previous) = entry.slot(kind).replace(track) {
                previous.close();
            }
            entry.participant.set(kind, true);
            snapshot(&remote)
        };
        debug!(%participant_id, %kind, "media: remote track playing");
        let _ = self
            .events
            .send(ClientEvent::RemoteParticipantsUpdated(participants));
    }

    async fn on_remote_unpublished(&self, participant_id: ParticipantId, kind: MediaKind) {
        let (track, participants) = {
            let mut remote = self.remote.lock().await;
            let Some(entry) = remote.get_mut(&participant_id) else {
                return;
            };
            entry.participant.set(kind, false);
            let track = entry.slot(kind).take();
            (track, snapshot(&remote))
        };
        if let Some(track) = track {
            track.close();
        }
        if kind == MediaKind::Video {
            self.views.remove(ViewOwner::Remote(participant_id)).await;
        }
        let _ = self
            .events
            .send(ClientEvent::RemoteParticipantsUpdated(participants));
    }

    async fn on_remote_left(&self, participant_id: ParticipantId) {
        let (removed, participants) = {
            let mut remote = self.remote.lock().await;
            let removed = remote.remove(&participant_id);
            (removed, snapshot(&remote))
        };
        if let Some(media) = removed {
            media.release();
        }
        self.views.remove(ViewOwner::Remote(participant_id)).await;
        info!(%participant_id, "media: remote participant left");
        let _ = self
            .events
            .send(ClientEvent::RemoteParticipantsUpdated(participants));
    }

    async fn release_remote(&self) {
        let drained = std::mem::take(&mut *self.remote.lock().await);
        for (_, media) in drained {
            media.release();
        }
    }

    async fn emit_session(&self) {
        let session = self.session.read().await;
        let snapshot = session.is_member().then(|| session.clone());
        let _ = self.events.send(ClientEvent::SessionChanged(snapshot));
    }
}

fn snapshot(remote: &HashMap<ParticipantId, RemoteMedia>) -> Vec<RemoteParticipant> {
    let mut participants = remote
        .values()
        .map(|media| media.participant)
        .collect::<Vec<_>>();
    participants.sort_by_key(|participant| participant.participant_id);
    participants
}

#[cfg(test)]
#[path = "tests/media_tests.rs"]
mod tests;
