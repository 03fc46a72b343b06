//! Live session lifecycle
//!
//! One controller owns at most one session. Hardware callbacks, the
//! handshake task and the connection reader all feed a single event queue,
//! so every state change happens on one task in arrival order. Each session
//! gets a fresh epoch; events from an earlier session are dropped on sight.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Span;
use uuid::Uuid;

use super::connection::{Connector, Link, LinkEvent};
use super::protocol::{ClientMessage, ServerMessage, Setup};
use super::status::{Fault, Phase, SessionStatus};
use super::uplink::{Delivery, Uplink};
use crate::Config;
use crate::voice::{
    AudioBackend, CapturePipeline, IDLE_LEVELS, Levels, PlaybackScheduler, SourceId, Visualizer,
    encode_outbound,
};
use crate::{Error, Result};

/// Imperative requests from the view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

enum Event {
    Captured { epoch: u64, block: Vec<f32> },
    Handshake { epoch: u64, result: Result<Link> },
    Link { epoch: u64, event: LinkEvent },
    SourceEnded { epoch: u64, id: SourceId },
}

impl Event {
    const fn epoch(&self) -> u64 {
        match self {
            Self::Captured { epoch, .. }
            | Self::Handshake { epoch, .. }
            | Self::Link { epoch, .. }
            | Self::SourceEnded { epoch, .. } => *epoch,
        }
    }
}

/// View-side handle: two entry points and two read-only feeds
///
/// Dropping every handle tears the session down.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
    levels: watch::Receiver<Levels>,
}

impl SessionHandle {
    /// Ask for a session; ignored while one is active
    ///
    /// Returns false if the controller is gone.
    pub fn start_session(&self) -> bool {
        self.commands.send(Command::Start).is_ok()
    }

    /// Ask for the running session to stop
    ///
    /// Returns false if the controller is gone.
    pub fn stop_session(&self) -> bool {
        self.commands.send(Command::Stop).is_ok()
    }

    /// Phase, connected/active flags and error
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Amplitude bars
    #[must_use]
    pub fn levels(&self) -> watch::Receiver<Levels> {
        self.levels.clone()
    }
}

/// Every resource of one live session
struct Session {
    id: Uuid,
    epoch: u64,
    span: Span,
    capture: Option<CapturePipeline>,
    playback: Option<PlaybackScheduler>,
    uplink: Uplink<mpsc::UnboundedSender<ClientMessage>>,
    handshake: Option<JoinHandle<()>>,
    link: Option<Link>,
    inbound: Option<JoinHandle<()>>,
    visualizer: Option<Visualizer>,
    blocks_sent: u64,
    chunks_scheduled: u64,
}

impl Session {
    fn new(epoch: u64, pending_capacity: usize) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            epoch,
            span: tracing::info_span!("live_session", %id),
            capture: None,
            playback: None,
            uplink: Uplink::new(pending_capacity),
            handshake: None,
            link: None,
            inbound: None,
            visualizer: None,
            blocks_sent: 0,
            chunks_scheduled: 0,
        }
    }

    /// Release everything held; each resource is released at most once
    fn teardown(&mut self) {
        if let Some(mut visualizer) = self.visualizer.take() {
            visualizer.stop();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(handshake) = self.handshake.take() {
            handshake.abort();
        }
        if let Some(inbound) = self.inbound.take() {
            inbound.abort();
        }
        self.uplink.close();
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.teardown();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Drives the single live session
pub struct SessionController {
    config: Config,
    backend: Box<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    phase: Phase,
    error: Option<Fault>,
    epoch: u64,
    session: Option<Session>,
    status: watch::Sender<SessionStatus>,
    levels: Arc<watch::Sender<Levels>>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl SessionController {
    /// Create an idle controller and its view handle
    pub fn new(
        config: Config,
        backend: impl AudioBackend + 'static,
        connector: impl Connector + 'static,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(SessionStatus::default());
        let (levels, levels_rx) = watch::channel(IDLE_LEVELS);

        let controller = Self {
            config,
            backend: Box::new(backend),
            connector: Arc::new(connector),
            phase: Phase::Idle,
            error: None,
            epoch: 0,
            session: None,
            status,
            levels: Arc::new(levels),
            events_tx,
            events_rx,
            commands,
        };

        let handle = SessionHandle {
            commands: commands_tx,
            status: status_rx,
            levels: levels_rx,
        };

        (controller, handle)
    }

    /// Process commands and events until every handle is dropped
    pub async fn run(mut self) {
        while self.step().await {}
        tracing::debug!("session controller exiting");
    }

    /// Process one command or event
    ///
    /// Returns false once every handle is gone; the session has then been
    /// torn down.
    pub async fn step(&mut self) -> bool {
        tokio::select! {
            biased;
            command = self.commands.recv() => match command {
                Some(Command::Start) => self.start(),
                Some(Command::Stop) => self.stop(),
                None => {
                    self.stop();
                    return false;
                }
            },
            Some(event) = self.events_rx.recv() => self.handle_event(event),
        }
        true
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Playback chunks still scheduled to sound
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.playback().map_or(0, PlaybackScheduler::in_flight)
    }

    /// End of the playback schedule in output-clock seconds
    #[must_use]
    pub fn running_clock(&self) -> f64 {
        self.playback().map_or(0.0, PlaybackScheduler::running_clock)
    }

    /// Captured blocks waiting for the handshake
    #[must_use]
    pub fn pending_uplink(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.uplink.pending())
    }

    fn playback(&self) -> Option<&PlaybackScheduler> {
        self.session.as_ref().and_then(|s| s.playback.as_ref())
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.status.send_replace(SessionStatus {
            phase,
            error: self.error.clone(),
        });
    }

    fn start(&mut self) {
        if self.phase != Phase::Idle {
            tracing::debug!(phase = ?self.phase, "start ignored, session already active");
            return;
        }

        self.epoch += 1;
        let mut session = Session::new(self.epoch, self.config.audio.pending_capacity);
        let span = session.span.clone();
        let _entered = span.enter();

        self.error = None;
        self.set_phase(Phase::Starting);
        tracing::info!("starting live session");

        match self.acquire(&mut session) {
            Ok(()) => {
                self.session = Some(session);
                self.set_phase(Phase::Active { connected: false });
            }
            Err(e) => {
                session.teardown();
                self.fault(e);
            }
        }
    }

    /// Open capture, playback, handshake and visualizer for `session`
    ///
    /// On error, whatever was acquired stays in `session` for teardown.
    fn acquire(&self, session: &mut Session) -> Result<()> {
        let epoch = session.epoch;
        let audio = &self.config.audio;

        let events = self.events_tx.clone();
        let capture = CapturePipeline::start(
            self.backend.as_ref(),
            audio.capture_sample_rate,
            audio.block_size,
            move |block| {
                let _ = events.send(Event::Captured { epoch, block });
            },
        )?;
        let analyzer = capture.analyzer();
        session.capture = Some(capture);

        let events = self.events_tx.clone();
        let sink = self.backend.open_output(
            audio.output_sample_rate,
            Arc::new(move |id| {
                let _ = events.send(Event::SourceEnded { epoch, id });
            }),
        )?;
        session.playback = Some(PlaybackScheduler::new(sink, audio.output_sample_rate));

        let connector = Arc::clone(&self.connector);
        let setup = Setup::from_config(&self.config.live);
        let timeout = self.config.live.handshake_timeout;
        let events = self.events_tx.clone();
        session.handshake = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, connector.connect(setup)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Handshake(format!(
                    "no connection within {}s",
                    timeout.as_secs()
                ))),
            };
            let _ = events.send(Event::Handshake { epoch, result });
        }));

        session.visualizer = Some(Visualizer::start(
            analyzer,
            audio.visual_interval,
            Arc::clone(&self.levels),
        ));

        Ok(())
    }

    fn stop(&mut self) {
        if self.session.is_none() && self.phase == Phase::Idle {
            tracing::trace!("stop ignored, no session");
            return;
        }

        self.set_phase(Phase::Stopping);
        self.teardown();
        self.set_phase(Phase::Idle);
        tracing::info!("live session stopped");
    }

    /// End the session because of `error` and surface it
    fn fault(&mut self, error: Error) {
        let fault = Fault::from_error(&error);
        tracing::error!(error = %error, kind = ?fault.kind, "live session failed");

        self.teardown();
        self.error = Some(fault);
        self.set_phase(Phase::Idle);
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown();
            tracing::info!(
                session = %session.id,
                blocks_sent = session.blocks_sent,
                chunks_scheduled = session.chunks_scheduled,
                "session resources released"
            );
        }
        self.levels.send_replace(IDLE_LEVELS);
    }

    fn handle_event(&mut self, event: Event) {
        let current = self
            .session
            .as_ref()
            .filter(|s| s.epoch == event.epoch())
            .map(|s| s.span.clone());

        let Some(span) = current else {
            if let Event::Handshake {
                result: Ok(mut link),
                ..
            } = event
            {
                tracing::debug!("closing connection opened for a finished session");
                link.close();
            }
            return;
        };
        let _entered = span.enter();

        match event {
            Event::Captured { block, .. } => self.on_captured(&block),
            Event::Handshake { result, .. } => self.on_handshake(result),
            Event::Link { event, .. } => self.on_link_event(event),
            Event::SourceEnded { id, .. } => {
                if let Some(playback) = self.session.as_mut().and_then(|s| s.playback.as_mut()) {
                    playback.source_ended(id);
                }
            }
        }
    }

    fn on_captured(&mut self, block: &[f32]) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let message = ClientMessage::audio(encode_outbound(block));
        match session.uplink.submit(message) {
            Ok(Delivery::Sent) => session.blocks_sent += 1,
            Ok(Delivery::Queued | Delivery::Discarded) => {}
            // The reader reports the broken connection; no need to fail twice
            Err(e) => tracing::debug!(error = %e, "captured block not sent"),
        }
    }

    fn on_handshake(&mut self, result: Result<Link>) {
        let epoch = self.epoch;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.handshake = None;

        let outcome = match result {
            Ok(mut link) => {
                let inbound = link.take_inbound();
                let opened = session.uplink.open(link.sender());

                if let Some(mut inbound) = inbound {
                    let events = self.events_tx.clone();
                    session.inbound = Some(tokio::spawn(async move {
                        while let Some(event) = inbound.recv().await {
                            if events.send(Event::Link { epoch, event }).is_err() {
                                break;
                            }
                        }
                    }));
                }
                session.link = Some(link);

                // Not ready yet, so a broken writer still counts against the handshake
                opened
                    .map(|flushed| {
                        session.blocks_sent += flushed as u64;
                        tracing::info!(flushed, "connection open, awaiting ready acknowledgment");
                    })
                    .map_err(|e| Error::Handshake(e.to_string()))
            }
            Err(e) => {
                let discarded = session.uplink.fail();
                tracing::debug!(discarded, "discarding audio queued for a failed handshake");
                Err(match e {
                    Error::Handshake(_) | Error::Config(_) => e,
                    other => Error::Handshake(other.to_string()),
                })
            }
        };

        if let Err(e) = outcome {
            self.fault(e);
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        let connected = self.phase == Phase::Active { connected: true };

        let detail = match event {
            LinkEvent::Message(message) => {
                self.on_server_message(&message);
                return;
            }
            LinkEvent::Closed { reason } => {
                reason.unwrap_or_else(|| "connection closed by remote".to_string())
            }
            LinkEvent::Failed(detail) => detail,
        };

        if connected {
            self.fault(Error::Transport(detail));
        } else {
            self.fault(Error::Handshake(detail));
        }
    }

    fn on_server_message(&mut self, message: &ServerMessage) {
        if message.is_setup_complete() && self.phase == (Phase::Active { connected: false }) {
            self.set_phase(Phase::Active { connected: true });
            tracing::info!("live service ready");
        }

        if let Some(go_away) = &message.go_away {
            tracing::warn!(time_left = ?go_away.time_left, "live service will close the connection");
        }

        let connected = self.phase == Phase::Active { connected: true };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(playback) = session.playback.as_mut() else {
            return;
        };

        if message.is_interrupted() {
            let stopped = playback.interrupt();
            tracing::info!(stopped, "reply interrupted by user speech");
        }

        for data in message.audio_chunks() {
            if !connected {
                tracing::debug!("audio before ready acknowledgment, dropping");
                continue;
            }
            match playback.enqueue(data) {
                Ok(Some(_)) => session.chunks_scheduled += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "dropping malformed audio chunk"),
            }
        }

        if message.is_turn_complete() {
            tracing::debug!(queued = playback.in_flight(), "model turn complete");
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown();
        }
    }
}
