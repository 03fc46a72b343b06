//! Session state published to the view

use crate::error::{Error, FaultKind};

/// Lifecycle phase of the live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No resources held
    #[default]
    Idle,
    /// Microphone and output being acquired, handshake being initiated
    Starting,
    /// Capture and transmission running
    Active {
        /// The service acknowledged the setup
        connected: bool,
    },
    /// Releasing every resource
    Stopping,
}

/// A session-ending failure shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    /// Build a fault from a session-ending error
    ///
    /// Errors without a fault class are reported as transport faults.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self {
            kind: error.fault_kind().unwrap_or(FaultKind::Transport),
            message: error.to_string(),
        }
    }

    /// Short banner for the view
    #[must_use]
    pub const fn headline(&self) -> &'static str {
        match self.kind {
            FaultKind::Permission => "MIC ACCESS DENIED. UNABLE TO START.",
            FaultKind::Handshake | FaultKind::Transport => "LIVE SESSION ERROR. CHECK CONNECTION.",
        }
    }
}

/// Snapshot of the session for the view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: Phase,
    /// At most one error; cleared when a new session starts
    pub error: Option<Fault>,
}

impl SessionStatus {
    /// Whether a session is starting or running
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Starting | Phase::Active { .. })
    }

    /// Whether the service acknowledged the setup
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.phase, Phase::Active { connected: true })
    }

    /// One-line status text
    #[must_use]
    pub const fn label(&self) -> &'static str {
        if self.error.is_some() {
            return "SYSTEM FAILURE";
        }
        match self.phase {
            Phase::Idle | Phase::Stopping => "OFFLINE",
            Phase::Starting | Phase::Active { connected: false } => "INITIALIZING UPLINK...",
            Phase::Active { connected: true } => "LIVE CONNECTION ESTABLISHED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_phase() {
        let mut status = SessionStatus::default();
        assert_eq!(status.label(), "OFFLINE");

        status.phase = Phase::Active { connected: false };
        assert!(status.is_active());
        assert!(!status.is_connected());
        assert_eq!(status.label(), "INITIALIZING UPLINK...");

        status.phase = Phase::Active { connected: true };
        assert!(status.is_connected());
        assert_eq!(status.label(), "LIVE CONNECTION ESTABLISHED");
    }

    #[test]
    fn error_overrides_label() {
        let status = SessionStatus {
            phase: Phase::Idle,
            error: Some(Fault::from_error(&Error::Permission("denied".to_string()))),
        };
        assert_eq!(status.label(), "SYSTEM FAILURE");
        assert_eq!(
            status.error.as_ref().map(Fault::headline),
            Some("MIC ACCESS DENIED. UNABLE TO START.")
        );
    }
}
