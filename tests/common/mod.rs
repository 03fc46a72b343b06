//! Shared test utilities
//!
//! Fake audio devices and a scripted live service, so session tests run
//! without audio hardware or network.

#![allow(dead_code)]

use std::cell::{Ref, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::{Notify, mpsc};

use casefile_live::live::{ClientMessage, Connector, Link, LinkEvent, ServerMessage, Setup};
use casefile_live::voice::{
    AudioBackend, CaptureStream, EndedHandler, OutputSink, SampleHandler, SourceId,
};
use casefile_live::{Config, Error, Result};

/// Config with tiny blocks and a fast visual cadence
#[must_use]
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.audio.block_size = 4;
    config.audio.visual_interval = Duration::from_millis(5);
    config.live.handshake_timeout = Duration::from_secs(60);
    config
}

/// Generate a sine wave
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sine(frequency: f32, sample_rate: u32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.5 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Base64 PCM payload of `frames` silent samples
#[must_use]
pub fn silent_chunk(frames: usize) -> String {
    BASE64.encode(vec![0u8; frames * 2])
}

/// What the fake devices saw
#[derive(Default)]
pub struct AudioState {
    pub deny_microphone: bool,
    pub fail_output: bool,
    pub captures_opened: usize,
    pub captures_stopped: usize,
    pub outputs_opened: usize,
    pub outputs_closed: usize,
    /// Output clock in seconds
    pub now: f64,
    /// (id, start, frames) per scheduled source
    pub started: Vec<(SourceId, f64, usize)>,
    pub stopped: Vec<SourceId>,
    handler: Option<SampleHandler>,
    on_ended: Option<EndedHandler>,
}

impl AudioState {
    /// Start times of every scheduled source, in scheduling order
    #[must_use]
    pub fn start_times(&self) -> Vec<f64> {
        self.started.iter().map(|(_, at, _)| *at).collect()
    }
}

/// Fake microphone and speaker sharing one inspectable state
#[derive(Clone, Default)]
pub struct FakeAudio(Rc<RefCell<AudioState>>);

impl FakeAudio {
    #[must_use]
    pub fn denying_microphone() -> Self {
        let audio = Self::default();
        audio.0.borrow_mut().deny_microphone = true;
        audio
    }

    #[must_use]
    pub fn failing_output() -> Self {
        let audio = Self::default();
        audio.0.borrow_mut().fail_output = true;
        audio
    }

    /// Deliver samples through the capture callback, if capture is open
    pub fn speak(&self, samples: &[f32]) {
        let handler = self.0.borrow_mut().handler.take();
        if let Some(mut handler) = handler {
            handler(samples);
            self.0.borrow_mut().handler = Some(handler);
        }
    }

    pub fn set_now(&self, now: f64) {
        self.0.borrow_mut().now = now;
    }

    /// Report natural completion of a source
    pub fn finish(&self, id: SourceId) {
        let on_ended = self.0.borrow().on_ended.clone();
        if let Some(on_ended) = on_ended {
            on_ended(id);
        }
    }

    #[must_use]
    pub fn state(&self) -> Ref<'_, AudioState> {
        self.0.borrow()
    }

    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.0.borrow().handler.is_some()
    }
}

struct FakeCapture {
    state: Rc<RefCell<AudioState>>,
    stopped: bool,
}

impl CaptureStream for FakeCapture {
    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            let mut state = self.state.borrow_mut();
            state.captures_stopped += 1;
            state.handler = None;
        }
    }
}

struct FakeSink {
    state: Rc<RefCell<AudioState>>,
    closed: bool,
}

impl OutputSink for FakeSink {
    fn now(&self) -> f64 {
        self.state.borrow().now
    }

    fn start(&mut self, id: SourceId, samples: Arc<[f32]>, at: f64) {
        self.state.borrow_mut().started.push((id, at, samples.len()));
    }

    fn stop(&mut self, id: SourceId) {
        self.state.borrow_mut().stopped.push(id);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = self.state.borrow_mut();
            state.outputs_closed += 1;
            state.on_ended = None;
        }
    }
}

impl AudioBackend for FakeAudio {
    fn open_capture(
        &self,
        _sample_rate: u32,
        on_samples: SampleHandler,
    ) -> Result<Box<dyn CaptureStream>> {
        let mut state = self.0.borrow_mut();
        if state.deny_microphone {
            return Err(Error::Permission("permission denied".to_string()));
        }
        state.captures_opened += 1;
        state.handler = Some(on_samples);

        Ok(Box::new(FakeCapture {
            state: Rc::clone(&self.0),
            stopped: false,
        }))
    }

    fn open_output(&self, _sample_rate: u32, on_ended: EndedHandler) -> Result<Box<dyn OutputSink>> {
        let mut state = self.0.borrow_mut();
        if state.fail_output {
            return Err(Error::Audio("no output device".to_string()));
        }
        state.outputs_opened += 1;
        state.on_ended = Some(on_ended);

        Ok(Box::new(FakeSink {
            state: Rc::clone(&self.0),
            closed: false,
        }))
    }
}

/// How the fake service answers a connection attempt
#[derive(Debug, Clone)]
pub enum Script {
    Accept,
    Reject(String),
    Hang,
    /// Connects, but the writer is already gone
    BrokenWriter,
}

/// Service side of an accepted fake connection
pub struct Remote {
    pub sent: mpsc::UnboundedReceiver<ClientMessage>,
    pub events: mpsc::UnboundedSender<LinkEvent>,
}

impl Remote {
    fn push(&self, json: &str) {
        let message = ServerMessage::from_slice(json.as_bytes()).expect("valid server message");
        let _ = self.events.send(LinkEvent::Message(message));
    }

    pub fn ready(&self) {
        self.push(r#"{"setupComplete":{}}"#);
    }

    pub fn audio(&self, data: &str) {
        self.push(&format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{data}"}}}}]}}}}}}"#
        ));
    }

    pub fn interrupted(&self) {
        self.push(r#"{"serverContent":{"interrupted":true}}"#);
    }

    pub fn fail(&self, detail: &str) {
        let _ = self.events.send(LinkEvent::Failed(detail.to_string()));
    }

    pub fn close(&self) {
        let _ = self.events.send(LinkEvent::Closed { reason: None });
    }

    /// Payloads of every audio block received so far, in arrival order
    pub fn received_audio(&mut self) -> Vec<String> {
        let mut received = Vec::new();
        while let Ok(message) = self.sent.try_recv() {
            if let ClientMessage::RealtimeInput(input) = message {
                received.push(input.media.data);
            }
        }
        received
    }
}

struct ConnectorState {
    script: Script,
    gate: Option<Arc<Notify>>,
    remotes: Mutex<VecDeque<Remote>>,
    setups: Mutex<Vec<Setup>>,
}

/// Scripted stand-in for the live service
#[derive(Clone)]
pub struct FakeConnector(Arc<ConnectorState>);

impl FakeConnector {
    #[must_use]
    pub fn new(script: Script) -> Self {
        Self(Arc::new(ConnectorState {
            script,
            gate: None,
            remotes: Mutex::new(VecDeque::new()),
            setups: Mutex::new(Vec::new()),
        }))
    }

    /// Accepting connector that waits for `release` before resolving
    #[must_use]
    pub fn gated() -> (Self, Arc<Notify>) {
        Self::gated_with(Script::Accept)
    }

    /// Scripted connector that waits for `release` before resolving
    #[must_use]
    pub fn gated_with(script: Script) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let connector = Self(Arc::new(ConnectorState {
            script,
            gate: Some(Arc::clone(&gate)),
            remotes: Mutex::new(VecDeque::new()),
            setups: Mutex::new(Vec::new()),
        }));
        (connector, gate)
    }

    /// Oldest accepted connection not yet taken
    #[must_use]
    pub fn take_remote(&self) -> Option<Remote> {
        self.0.remotes.lock().expect("lock").pop_front()
    }

    #[must_use]
    pub fn setups(&self) -> Vec<Setup> {
        self.0.setups.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, setup: Setup) -> Result<Link> {
        self.0.setups.lock().expect("lock").push(setup);

        if let Some(gate) = &self.0.gate {
            gate.notified().await;
        }

        match &self.0.script {
            Script::Accept => {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                self.0.remotes.lock().expect("lock").push_back(Remote {
                    sent: out_rx,
                    events: in_tx,
                });
                Ok(Link::new(out_tx, in_rx, Vec::new()))
            }
            Script::BrokenWriter => {
                let (out_tx, _) = mpsc::unbounded_channel();
                let (_, in_rx) = mpsc::unbounded_channel();
                Ok(Link::new(out_tx, in_rx, Vec::new()))
            }
            Script::Reject(reason) => Err(Error::Handshake(reason.clone())),
            Script::Hang => std::future::pending().await,
        }
    }
}
