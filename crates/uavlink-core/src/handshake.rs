//! Telemetry handshake state machine.
//!
//! The client announces its link status through a local status object and the
//! peer answers through a remote one. This module only computes transitions;
//! sending the resulting status is the caller's job.
//!
//! ```text
//! start                 -> send HandshakeReq, HandshakeRequested
//! HandshakeAck          -> send Connected,    Acknowledged
//! Connected             -> send Connected,    Connected (ready the first time)
//! Disconnected          -> send HandshakeReq, HandshakeRequested
//! anything else         -> halt
//! ```

use crate::error::HandshakeError;
use std::fmt;
use std::str::FromStr;

/// Link status values exchanged during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryStatus {
    Disconnected,
    HandshakeReq,
    HandshakeAck,
    Connected,
}

impl TelemetryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::HandshakeReq => "HandshakeReq",
            Self::HandshakeAck => "HandshakeAck",
            Self::Connected => "Connected",
        }
    }
}

impl fmt::Display for TelemetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TelemetryStatus {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Disconnected" => Ok(Self::Disconnected),
            "HandshakeReq" => Ok(Self::HandshakeReq),
            "HandshakeAck" => Ok(Self::HandshakeAck),
            "Connected" => Ok(Self::Connected),
            other => Err(HandshakeError::UnexpectedStatus(other.to_owned())),
        }
    }
}

/// Handshake progress of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    Idle,
    HandshakeRequested,
    Acknowledged,
    Connected,
    /// The transport closed.
    Disconnected,
}

/// What the caller must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Step {
    /// Status to publish on the local status object.
    pub send: Option<TelemetryStatus>,
    /// Set exactly once per machine, on the first entry into `Connected`.
    pub became_ready: bool,
}

impl Step {
    fn send(status: TelemetryStatus) -> Self {
        Self {
            send: Some(status),
            became_ready: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Handshake {
    state: HandshakeState,
    ready: bool,
    halted: bool,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether the session has ever reached `Connected`. Never reset.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Begin (or restart) the handshake.
    pub fn start(&mut self) -> Step {
        if self.halted {
            return Step::default();
        }
        self.enter(HandshakeState::HandshakeRequested);
        Step::send(TelemetryStatus::HandshakeReq)
    }

    /// Feed a status reported by the peer.
    ///
    /// An unknown status halts the machine; every later call returns
    /// [`HandshakeError::Halted`] without changing state.
    pub fn observe(&mut self, status: &str) -> Result<Step, HandshakeError> {
        if self.halted {
            return Err(HandshakeError::Halted(status.to_owned()));
        }
        let parsed = match status.parse::<TelemetryStatus>() {
            Ok(parsed) => parsed,
            Err(err) => {
                self.halted = true;
                return Err(err);
            }
        };

        Ok(match parsed {
            // Acknowledged is an intermediate state: Connected is entered
            // only once the peer itself reports Connected.
            TelemetryStatus::HandshakeAck => {
                if self.state != HandshakeState::Connected {
                    self.enter(HandshakeState::Acknowledged);
                }
                Step::send(TelemetryStatus::Connected)
            }
            TelemetryStatus::Disconnected => {
                self.enter(HandshakeState::HandshakeRequested);
                Step::send(TelemetryStatus::HandshakeReq)
            }
            // The peer never requests a handshake of its own.
            TelemetryStatus::HandshakeReq => {
                self.halted = true;
                return Err(HandshakeError::UnexpectedStatus(status.to_owned()));
            }
            TelemetryStatus::Connected => {
                self.enter(HandshakeState::Connected);
                let became_ready = !self.ready;
                self.ready = true;
                Step {
                    send: Some(TelemetryStatus::Connected),
                    became_ready,
                }
            }
        })
    }

    /// Stop reacting to statuses, e.g. after a malformed status update.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Record that the transport went away. Readiness is kept.
    pub fn transport_closed(&mut self) {
        self.enter(HandshakeState::Disconnected);
    }

    fn enter(&mut self, next: HandshakeState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "handshake transition");
            self.state = next;
        }
    }
}
