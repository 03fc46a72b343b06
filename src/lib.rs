//! Casefile Live - real-time voice conversation with a live model
//!
//! This library provides the pieces of a duplex audio session:
//! - Microphone capture with an analyzer tap
//! - PCM wire codec
//! - Gapless playback scheduling with barge-in
//! - Amplitude visualization
//! - Session lifecycle over a WebSocket link
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   blocks    ┌──────────┐   frames   ┌──────────────┐
//! │   Capture    ├────────────►│  Uplink  ├───────────►│              │
//! └──────┬───────┘             └──────────┘            │     Live     │
//!        │ analyzer                                    │   service    │
//! ┌──────▼───────┐             ┌──────────┐   chunks   │              │
//! │  Visualizer  │             │ Playback │◄───────────┤              │
//! └──────────────┘             └──────────┘            └──────────────┘
//! ```

pub mod config;
pub mod error;
pub mod live;
pub mod voice;

pub use config::Config;
pub use error::{Error, FaultKind, Result};
pub use live::{SessionController, SessionHandle, SessionStatus};
