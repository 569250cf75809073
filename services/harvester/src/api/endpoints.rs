use serde::de::DeserializeOwned;

use super::client::PageRequest;
use super::models::{ApiPost, ApiUser};
use crate::cursor::LowWaterMark;

const TWEET_FIELDS: &str = "id,author_id,created_at,text,public_metrics,attachments,geo";
const USER_FIELDS: &str =
    "id,username,name,created_at,description,location,pinned_tweet_id,public_metrics";

/// Where in a walk the next request starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position<'a> {
    /// First page: filter by the low-water mark.
    Start(LowWaterMark),
    /// Later pages: the continuation token alone addresses the page.
    After(&'a str),
}

/// A paginated listing owned by one entity.
pub trait Endpoint: Send + Sync {
    type Item: DeserializeOwned + Send + Sync;

    fn name(&self) -> &'static str;

    fn request(&self, owner_id: &str, position: Position<'_>) -> PageRequest;
}

/// Full-archive search restricted to one author.
#[derive(Debug, Clone)]
pub struct TimelineEndpoint {
    page_size: u32,
}

impl TimelineEndpoint {
    pub fn new(page_size: u32) -> Self {
        Self { page_size }
    }
}

impl Endpoint for TimelineEndpoint {
    type Item = ApiPost;

    fn name(&self) -> &'static str {
        "timeline"
    }

    fn request(&self, owner_id: &str, position: Position<'_>) -> PageRequest {
        let request = PageRequest::new("/2/tweets/search/all")
            .param("query", format!("(from:{owner_id})"))
            .param("tweet.fields", TWEET_FIELDS)
            .param("max_results", self.page_size);

        match position {
            Position::Start(LowWaterMark::BeginningOfTime) => request,
            Position::Start(LowWaterMark::After(id)) => request.param("since_id", id),
            Position::After(token) => request.param("next_token", token),
        }
    }
}

/// Accounts an entity follows. The listing has no id filter, so every walk
/// is full depth and duplicates are absorbed by the sink.
#[derive(Debug, Clone)]
pub struct FollowingEndpoint {
    page_size: u32,
}

impl FollowingEndpoint {
    pub fn new(page_size: u32) -> Self {
        Self { page_size }
    }
}

impl Endpoint for FollowingEndpoint {
    type Item = ApiUser;

    fn name(&self) -> &'static str {
        "following"
    }

    fn request(&self, owner_id: &str, position: Position<'_>) -> PageRequest {
        let request = PageRequest::new(format!("/2/users/{owner_id}/following"))
            .param("max_results", self.page_size)
            .param("user.fields", USER_FIELDS);

        match position {
            Position::Start(_) => request,
            Position::After(token) => request.param("pagination_token", token),
        }
    }
}

/// Batch lookup of account names. Callers keep batches within the lookup cap.
pub fn user_lookup(names: &[String]) -> PageRequest {
    PageRequest::new("/2/users/by")
        .param("usernames", names.join(","))
        .param("user.fields", USER_FIELDS)
}
