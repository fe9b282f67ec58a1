//! Human-readable status line derived from channel state and the last action.

use ffb_shared::Car;

use crate::error::SyncError;
use crate::events::ConnectionState;

/// User-initiated operations that report into the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Claim,
    Release,
    CreateSession,
    LoadRooms,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Claim => "Claim",
            Action::Release => "Release",
            Action::CreateSession => "Create session",
            Action::LoadRooms => "Load rooms",
        }
    }
}

/// How the most recent action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded { action: Action, detail: String },
    Failed { action: Action, message: String },
}

impl ActionOutcome {
    pub fn claimed(car: &Car) -> Self {
        let detail = match car.assigned_to.as_deref() {
            Some(user) => format!("Claimed {} for {}", car.id, user),
            None => format!("Claimed {}", car.id),
        };
        ActionOutcome::Succeeded {
            action: Action::Claim,
            detail,
        }
    }

    pub fn released(car_id: &str, already_free: bool) -> Self {
        let detail = if already_free {
            format!("Released {car_id} (already free)")
        } else {
            format!("Released {car_id}")
        };
        ActionOutcome::Succeeded {
            action: Action::Release,
            detail,
        }
    }

    pub fn session_ready(car_id: &str) -> Self {
        ActionOutcome::Succeeded {
            action: Action::CreateSession,
            detail: format!("Session ready for {car_id}"),
        }
    }

    pub fn rooms_loaded() -> Self {
        ActionOutcome::Succeeded {
            action: Action::LoadRooms,
            detail: "Rooms loaded".to_string(),
        }
    }

    pub fn failed(action: Action, err: &SyncError) -> Self {
        ActionOutcome::Failed {
            action,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub text: String,
    pub tone: Tone,
}

impl StatusLine {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tone: Tone::Ok,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tone: Tone::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.tone == Tone::Error
    }
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

const DISCONNECTED: &str = "disconnected, retrying";

/// Derive the status line. Pure; never fails.
///
/// The last action's outcome is shown when there is one. While the channel is
/// down the standing disconnected notice is appended to it.
pub fn project(connection: ConnectionState, last_action: Option<&ActionOutcome>) -> StatusLine {
    let action_line = last_action.map(describe);

    match (connection, action_line) {
        (ConnectionState::Disconnected, Some(line)) => {
            StatusLine::error(format!("{} ({DISCONNECTED})", line.text))
        }
        (ConnectionState::Disconnected, None) => StatusLine::error(DISCONNECTED),
        (_, Some(line)) => line,
        (ConnectionState::Connecting, None) => StatusLine::ok("connecting…"),
        (ConnectionState::Live, None) => StatusLine::ok("live"),
    }
}

fn describe(outcome: &ActionOutcome) -> StatusLine {
    match outcome {
        ActionOutcome::Succeeded { action, detail } => {
            if detail.trim().is_empty() {
                StatusLine::ok(format!("{} ok", action.label()))
            } else {
                StatusLine::ok(detail.clone())
            }
        }
        ActionOutcome::Failed { action, message } => {
            let message = if message.trim().is_empty() {
                "unknown error"
            } else {
                message.as_str()
            };
            StatusLine::error(format!("{} failed: {}", action.label(), message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffb_shared::CarState;

    #[test]
    fn connection_only() {
        assert_eq!(project(ConnectionState::Connecting, None).text, "connecting…");
        assert_eq!(project(ConnectionState::Live, None), StatusLine::ok("live"));
        let down = project(ConnectionState::Disconnected, None);
        assert_eq!(down.text, "disconnected, retrying");
        assert!(down.is_error());
    }

    #[test]
    fn successful_claim_names_car_and_user() {
        let car = Car::new("car-1", CarState::Reserved).assigned("u1");
        let status = project(ConnectionState::Live, Some(&ActionOutcome::claimed(&car)));
        assert_eq!(status, StatusLine::ok("Claimed car-1 for u1"));
    }

    #[test]
    fn failure_carries_action_and_message() {
        let err = SyncError::InvalidOperation("car not owned by user".into());
        let outcome = ActionOutcome::failed(Action::Release, &err);
        let status = project(ConnectionState::Live, Some(&outcome));
        assert_eq!(status.text, "Release failed: car not owned by user");
        assert!(status.is_error());
    }

    #[test]
    fn disconnect_is_appended_to_last_outcome() {
        let outcome = ActionOutcome::released("car-2", false);
        let status = project(ConnectionState::Disconnected, Some(&outcome));
        assert_eq!(status.text, "Released car-2 (disconnected, retrying)");
        assert!(status.is_error());
    }

    #[test]
    fn blank_inputs_degrade_instead_of_failing() {
        let failed = ActionOutcome::Failed {
            action: Action::CreateSession,
            message: "  ".into(),
        };
        assert_eq!(
            project(ConnectionState::Live, Some(&failed)).text,
            "Create session failed: unknown error"
        );

        let succeeded = ActionOutcome::Succeeded {
            action: Action::LoadRooms,
            detail: String::new(),
        };
        assert_eq!(
            project(ConnectionState::Connecting, Some(&succeeded)).text,
            "Load rooms ok"
        );
    }

    #[test]
    fn projection_is_stable_for_equal_inputs() {
        let outcome = ActionOutcome::rooms_loaded();
        let a = project(ConnectionState::Live, Some(&outcome));
        let b = project(ConnectionState::Live, Some(&outcome));
        assert_eq!(a, b);
        assert_eq!(a.text, "Rooms loaded");
    }
}
