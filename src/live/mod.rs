//! Live conversation session
//!
//! Owns the duplex connection to the live service and the controller that
//! ties capture, transmission, playback and visualization together.

mod connection;
mod protocol;
mod session;
mod status;
mod uplink;

pub use connection::{Connector, GeminiConnector, Link, LinkEvent};
pub use protocol::{
    Blob, ClientMessage, Content, GenerationConfig, GoAway, Modality, Part, PrebuiltVoiceConfig,
    RealtimeInput, ServerContent, ServerMessage, Setup, SetupComplete, SpeechConfig, VoiceConfig,
};
pub use session::{Command, SessionController, SessionHandle};
pub use status::{Fault, Phase, SessionStatus};
pub use uplink::{Delivery, FrameSink, Uplink};
