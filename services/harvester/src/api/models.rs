use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level body of every v2 response.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<Vec<T>>,
    pub meta: Option<Meta>,
    #[serde(default)]
    pub errors: Vec<ApiProblem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    #[serde(default, alias = "continuationToken")]
    pub next_token: Option<String>,
    #[serde(default, alias = "resultCount")]
    pub result_count: Option<u64>,
}

/// Per-resource problem reported inside a 200 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiProblem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemClass {
    /// Protected or suspended account; the caller may not see it.
    Private,
    NotFound,
    Other,
}

impl ApiProblem {
    pub fn class(&self) -> ProblemClass {
        let kind = self.kind.as_deref().unwrap_or_default();
        let title = self.title.as_deref().unwrap_or_default();
        if kind.ends_with("not-authorized-for-resource")
            || kind.ends_with("authorization-error")
            || title.eq_ignore_ascii_case("Authorization Error")
        {
            ProblemClass::Private
        } else if kind.ends_with("resource-not-found") || title.eq_ignore_ascii_case("Not Found Error")
        {
            ProblemClass::NotFound
        } else {
            ProblemClass::Other
        }
    }

    pub fn describe(&self) -> String {
        let text = self
            .detail
            .as_deref()
            .or(self.title.as_deref())
            .unwrap_or("unspecified problem");
        match &self.value {
            Some(value) => format!("{text} ({value})"),
            None => text.to_string(),
        }
    }
}

/// A timeline post. Fields the harvester does not read stay in `rest` so the
/// stored payload matches what the API sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiPost {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// An account, as returned by user lookup and relationship lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}
