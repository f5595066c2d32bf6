//! Deployment intent group lifecycle.
//!
//! A group's state is an append-only history of actions. The last entry is
//! the current state; while it is `Instantiated` its instance field names
//! the live context.

use chrono::{DateTime, Utc};
use emco_id::ContextId;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state history is empty")]
    Empty,

    #[error("recorded context id {0:?} is not valid")]
    BadContextId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Created,
    Approved,
    Instantiated,
    Terminated,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "Created",
            Self::Approved => "Approved",
            Self::Instantiated => "Instantiated",
            Self::Terminated => "Terminated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEntry {
    pub state: State,
    /// Context ID the action applied to, empty when none.
    #[serde(rename = "instance", default)]
    pub context_id: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateInfo {
    #[serde(default)]
    pub actions: Vec<ActionEntry>,
}

impl StateInfo {
    /// History holding a single `Created` entry.
    pub fn created() -> Self {
        let mut info = Self::default();
        info.push(State::Created, None);
        info
    }

    pub fn current(&self) -> Result<State, StateError> {
        self.actions
            .last()
            .map(|a| a.state)
            .ok_or(StateError::Empty)
    }

    /// The live context, if the group is instantiated.
    pub fn tracked_context(&self) -> Result<Option<ContextId>, StateError> {
        match self.actions.last() {
            Some(last) if last.state == State::Instantiated => last
                .context_id
                .parse()
                .map(Some)
                .map_err(|_| StateError::BadContextId(last.context_id.clone())),
            Some(_) => Ok(None),
            None => Err(StateError::Empty),
        }
    }

    pub fn push(&mut self, state: State, context_id: Option<ContextId>) {
        self.actions.push(ActionEntry {
            state,
            context_id: context_id.map(|id| id.to_string()).unwrap_or_default(),
            time: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_is_last_action() {
        let mut info = StateInfo::created();
        assert_eq!(info.current().unwrap(), State::Created);
        info.push(State::Approved, None);
        assert_eq!(info.current().unwrap(), State::Approved);
        assert!(info.tracked_context().unwrap().is_none());
    }

    #[test]
    fn test_tracked_context_only_while_instantiated() {
        let id = ContextId::new();
        let mut info = StateInfo::created();
        info.push(State::Instantiated, Some(id));
        assert_eq!(info.tracked_context().unwrap(), Some(id));

        info.push(State::Terminated, Some(id));
        assert_eq!(info.tracked_context().unwrap(), None);
    }

    #[test]
    fn test_empty_history_is_error() {
        let info = StateInfo::default();
        assert!(matches!(info.current(), Err(StateError::Empty)));
    }

    #[test]
    fn test_serialized_shape() {
        let info = StateInfo::created();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["actions"][0]["state"], "Created");
        assert_eq!(json["actions"][0]["instance"], "");
    }
}
