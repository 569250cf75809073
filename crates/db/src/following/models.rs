use serde::{Deserialize, Serialize};

/// One edge of a tracked entity's relationship list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Following {
    /// External id of the tracked entity whose list this came from.
    pub follower_id: String,
    pub followed_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub payload: serde_json::Value,
}
