use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Harvest status of a tracked account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Supplied by the entity list, not yet looked up.
    Unresolved,
    Active,
    /// Resolved, but no record has ever been harvested.
    Empty,
    Private,
    NotFound,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Active => "active",
            Self::Empty => "empty",
            Self::Private => "private",
            Self::NotFound => "not_found",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unresolved" => Ok(Self::Unresolved),
            "active" => Ok(Self::Active),
            "empty" => Ok(Self::Empty),
            "private" => Ok(Self::Private),
            "not_found" => Ok(Self::NotFound),
            other => Err(format!("unknown entity status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    /// The name as supplied by the entity list.
    pub handle: String,
    /// Remote id, present once identity resolution succeeded.
    pub external_id: Option<String>,
    /// Resolved once; may be stale.
    pub display_name: Option<String>,
    pub status: EntityStatus,
    pub updated_at: DateTime<Utc>,
}

impl TrackedEntity {
    pub fn new(handle: &str) -> Self {
        Self {
            handle: handle.to_string(),
            external_id: None,
            display_name: None,
            status: EntityStatus::Unresolved,
            updated_at: Utc::now(),
        }
    }

    pub fn resolved(handle: &str, external_id: &str) -> Self {
        Self {
            external_id: Some(external_id.to_string()),
            status: EntityStatus::Active,
            ..Self::new(handle)
        }
    }

    /// Name used in logs and artifact files.
    pub fn label(&self) -> &str {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            EntityStatus::Unresolved,
            EntityStatus::Active,
            EntityStatus::Empty,
            EntityStatus::Private,
            EntityStatus::NotFound,
        ] {
            assert_eq!(status.as_str().parse::<EntityStatus>(), Ok(status));
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("deleted".parse::<EntityStatus>().is_err());
    }

    #[test]
    fn new_entity_is_unresolved() {
        let entity = TrackedEntity::new("somebody");
        assert_eq!(entity.status, EntityStatus::Unresolved);
        assert!(entity.external_id.is_none());
    }
}
