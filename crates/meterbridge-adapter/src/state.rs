//! Per-channel connection state machine
//!
//! ```text
//! None --Create--> Provisioned --Start--> Active --Stop--> Closed
//!   \______________Start_____________________/^
//!                  Provisioned --Stop--> Closed
//! ```
//!
//! The table is pure: it only says which steps to run and where the channel
//! ends up. The event loop runs the steps and commits the state afterwards.

use std::fmt;

use meterbridge_common::ConnStatus;

/// Lifecycle state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    None,
    Provisioned,
    Active,
    /// Terminal
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::None => write!(f, "none"),
            ConnectionState::Provisioned => write!(f, "provisioned"),
            ConnectionState::Active => write!(f, "active"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Role action run for a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Create: provision the user or route
    Provision,
    /// Start: apply configuration and start metering
    Activate,
    /// Stop of an active channel: tear down, stop metering, end the session
    Deactivate,
    /// Stop of a provisioned channel: undo provisioning, end the session
    Deprovision,
}

/// Accepted transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub steps: &'static [Step],
    pub next: ConnectionState,
}

/// Look up the transition for `status` in `state`
///
/// `None` means the event is unexpected here and must be ignored.
pub fn transition(state: ConnectionState, status: ConnStatus) -> Option<Transition> {
    use ConnStatus as E;
    use ConnectionState as S;

    let (steps, next): (&'static [Step], _) = match (state, status) {
        (S::None, E::Create) => (&[Step::Provision], S::Provisioned),
        (S::None, E::Start) => (&[Step::Provision, Step::Activate], S::Active),
        (S::Provisioned, E::Start) => (&[Step::Activate], S::Active),
        (S::Provisioned, E::Stop) => (&[Step::Deprovision], S::Closed),
        (S::Active, E::Stop) => (&[Step::Deactivate], S::Closed),
        _ => return None,
    };

    Some(Transition { steps, next })
}
