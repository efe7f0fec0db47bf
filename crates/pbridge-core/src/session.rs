//! Session presence entities and value objects.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Stable identifier of a player as reported by the host.
///
/// Usually a UUID string (e.g., "11111111-2222-3333-4444-555555555555"),
/// but treated as opaque: no format is enforced beyond being non-empty
/// once surrounding whitespace is trimmed.
/// Two events refer to the same player iff their ids are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Creates a new PlayerId without validation.
    ///
    /// Prefer [`PlayerId::parse`] for values coming from the host.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a PlayerId from host input, trimming surrounding whitespace
    /// and rejecting empty or whitespace-only input.
    pub fn parse(id: impl Into<String>) -> DomainResult<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvalidFieldValue {
                field: "player_id".to_string(),
                value: id,
                expected: "a non-empty identifier".to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for PlayerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Display name of a player at the time of the signal.
///
/// Names are not identity: a player may be renamed between sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerName(String);

impl PlayerName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Creates a PlayerName, rejecting empty or whitespace-only input.
    pub fn parse(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::InvalidFieldValue {
                field: "player_name".to_string(),
                value: name,
                expected: "a non-empty name".to_string(),
            });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlayerName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Session Record
// ============================================================================

/// Minimal identifying payload sent to the control plane per transition.
///
/// Fields are private so a record cannot change after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRecord {
    name: PlayerName,
    id: PlayerId,
}

impl SessionRecord {
    pub fn new(name: PlayerName, id: PlayerId) -> Self {
        Self { name, id }
    }

    /// Builds a record from raw host strings, validating both fields.
    pub fn from_raw(name: &str, id: &str) -> DomainResult<Self> {
        Ok(Self {
            name: PlayerName::parse(name)?,
            id: PlayerId::parse(id)?,
        })
    }

    pub fn name(&self) -> &PlayerName {
        &self.name
    }

    pub fn id(&self) -> &PlayerId {
        &self.id
    }
}

impl fmt::Display for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id.short())
    }
}

// ============================================================================
// Session Events
// ============================================================================

/// Kind of presence transition, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Connected,
    Disconnected,
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A single presence transition observed on the host.
///
/// Produced exactly once per host signal and never coalesced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum SessionEvent {
    Connected(SessionRecord),
    Disconnected(SessionRecord),
}

impl SessionEvent {
    pub fn kind(&self) -> SessionEventKind {
        match self {
            Self::Connected(_) => SessionEventKind::Connected,
            Self::Disconnected(_) => SessionEventKind::Disconnected,
        }
    }

    pub fn record(&self) -> &SessionRecord {
        match self {
            Self::Connected(record) | Self::Disconnected(record) => record,
        }
    }

    /// The player this event belongs to; used as the ordering key.
    pub fn player_id(&self) -> &PlayerId {
        self.record().id()
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.record(), self.kind())
    }
}
