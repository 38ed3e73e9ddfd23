//! Colaboradores falsos compartidos por las pruebas del engine.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast;

use super::{
    backend::{BackendFactory, LinkState, PlayOptions, PlaybackBackend},
    limiter::{GuildLimits, GuildLimitsSource, QueueLimiter},
    player::{GuildPlayer, PlayerServices},
    snapshot::{PlayerSnapshot, PlayerStore},
    track::{AudioTrack, TrackContext},
};
use crate::{bot::announce::Announcer, monitoring::Metrics};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BackendCommand {
    Play(String, PlayOptions),
    Stop,
    Pause(bool),
    Seek(u64),
    Volume(f32),
    Connect(ChannelId),
    Destroy,
}

/// Nodo de audio que solo anota lo que se le pide
pub(crate) struct RecordingBackend {
    commands: Mutex<Vec<BackendCommand>>,
    state: Mutex<LinkState>,
    channel: Mutex<Option<ChannelId>>,
    position: AtomicU64,
    rejected: Mutex<Vec<String>>,
    pause_yields: AtomicBool,
}

impl RecordingBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            state: Mutex::new(LinkState::NotConnected),
            channel: Mutex::new(None),
            position: AtomicU64::new(0),
            rejected: Mutex::new(Vec::new()),
            pause_yields: AtomicBool::new(false),
        })
    }

    /// `play` falla para las pistas con este título
    pub(crate) fn reject(&self, title: &str) {
        self.rejected.lock().push(title.to_string());
    }

    /// `pause` cede el control antes de responder, como un nodo remoto
    pub(crate) fn yield_on_pause(&self) {
        self.pause_yields.store(true, Ordering::Relaxed);
    }

    pub(crate) fn commands(&self) -> Vec<BackendCommand> {
        self.commands.lock().clone()
    }

    /// Títulos enviados a `play`, en orden
    pub(crate) fn played(&self) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .filter_map(|c| match c {
                BackendCommand::Play(title, _) => Some(title.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn set_position(&self, millis: u64) {
        self.position.store(millis, Ordering::Relaxed);
    }

    fn record(&self, command: BackendCommand) {
        self.commands.lock().push(command);
    }
}

#[async_trait]
impl PlaybackBackend for RecordingBackend {
    async fn play(&self, track: &AudioTrack, options: PlayOptions) -> Result<()> {
        if self.rejected.lock().contains(&track.title) {
            return Err(anyhow!("pista no disponible: {}", track.title));
        }
        self.position.store(options.start_millis, Ordering::Relaxed);
        self.record(BackendCommand::Play(track.title.clone(), options));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record(BackendCommand::Stop);
        Ok(())
    }

    async fn pause(&self, paused: bool) -> Result<()> {
        if self.pause_yields.load(Ordering::Relaxed) {
            tokio::task::yield_now().await;
        }
        self.record(BackendCommand::Pause(paused));
        Ok(())
    }

    async fn seek(&self, position_millis: u64) -> Result<()> {
        self.position.store(position_millis, Ordering::Relaxed);
        self.record(BackendCommand::Seek(position_millis));
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<()> {
        self.record(BackendCommand::Volume(volume));
        Ok(())
    }

    async fn connect(&self, channel_id: ChannelId) -> Result<()> {
        *self.channel.lock() = Some(channel_id);
        *self.state.lock() = LinkState::Connected;
        self.record(BackendCommand::Connect(channel_id));
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        *self.channel.lock() = None;
        *self.state.lock() = LinkState::Destroyed;
        self.record(BackendCommand::Destroy);
        Ok(())
    }

    fn position_millis(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn current_channel(&self) -> Option<ChannelId> {
        *self.channel.lock()
    }

    fn state(&self) -> LinkState {
        *self.state.lock()
    }
}

/// Entrega siempre el mismo backend para poder inspeccionarlo
pub(crate) struct SharedBackendFactory {
    pub(crate) links: DashMap<GuildId, Arc<RecordingBackend>>,
}

impl SharedBackendFactory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { links: DashMap::new() })
    }

    pub(crate) fn link(&self, guild_id: GuildId) -> Option<Arc<RecordingBackend>> {
        self.links.get(&guild_id).map(|l| l.clone())
    }
}

impl BackendFactory for SharedBackendFactory {
    fn create_link(&self, guild_id: GuildId) -> Arc<dyn PlaybackBackend> {
        let link = RecordingBackend::new();
        self.links.insert(guild_id, link.clone());
        link
    }
}

#[derive(Default)]
pub(crate) struct RecordingAnnouncer {
    messages: Mutex<Vec<(GuildId, String)>>,
}

impl RecordingAnnouncer {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.messages.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

impl Announcer for RecordingAnnouncer {
    fn send(&self, guild_id: GuildId, message: String) {
        self.messages.lock().push((guild_id, message));
    }
}

pub(crate) struct StaticLimits(pub(crate) GuildLimits);

#[async_trait]
impl GuildLimitsSource for StaticLimits {
    async fn fetch_guild_limits(&self, _guild_id: GuildId) -> Result<GuildLimits> {
        Ok(self.0.clone())
    }
}

/// Persistencia en memoria con latencia y fallos configurables
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) snapshots: DashMap<GuildId, PlayerSnapshot>,
    pub(crate) loads: AtomicUsize,
    pub(crate) delay: Duration,
    pub(crate) fail_loads: bool,
    pub(crate) fail_saves_for: Option<GuildId>,
}

#[async_trait]
impl PlayerStore for MemoryStore {
    async fn load_snapshot(&self, guild_id: GuildId) -> Result<Option<PlayerSnapshot>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_loads {
            return Err(anyhow!("base de datos caída"));
        }
        Ok(self.snapshots.get(&guild_id).map(|s| s.clone()))
    }

    async fn save_snapshot(&self, guild_id: GuildId, snapshot: &PlayerSnapshot) -> Result<()> {
        if self.fail_saves_for == Some(guild_id) {
            return Err(anyhow!("disco lleno"));
        }
        self.snapshots.insert(guild_id, snapshot.clone());
        Ok(())
    }
}

pub(crate) fn services_with(limits: GuildLimits) -> (PlayerServices, Arc<RecordingAnnouncer>) {
    let metrics = Arc::new(Metrics::new());
    let announcer = Arc::new(RecordingAnnouncer::default());
    let (status, _) = broadcast::channel(16);
    let services = PlayerServices {
        limiter: Arc::new(QueueLimiter::new(Arc::new(StaticLimits(limits)), metrics.clone())),
        announcer: announcer.clone(),
        metrics,
        status,
        announce_tracks: true,
    };
    (services, announcer)
}

pub(crate) fn guild() -> GuildId {
    GuildId::new(42)
}

/// Player de prueba conectado a un [`RecordingBackend`]
pub(crate) fn player_with(limits: GuildLimits) -> (GuildPlayer, Arc<RecordingBackend>, Arc<RecordingAnnouncer>) {
    let backend = RecordingBackend::new();
    let (services, announcer) = services_with(limits);
    let player = GuildPlayer::new(guild(), backend.clone(), services, 1.0);
    (player, backend, announcer)
}

pub(crate) fn player() -> (GuildPlayer, Arc<RecordingBackend>, Arc<RecordingAnnouncer>) {
    player_with(GuildLimits::default())
}

/// Pista de 3 minutos pedida por `user`
pub(crate) fn track(title: &str, user: u64) -> TrackContext {
    TrackContext::new(AudioTrack::new(title.to_lowercase(), title, 180_000), UserId::new(user))
}
