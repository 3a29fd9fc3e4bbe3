/// API request and response models
use serde::{Deserialize, Serialize};

use crate::types::ChatMessage;

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    pub code: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Server version
    pub version: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Users with an open websocket session
    pub active_connections: usize,
}

/// Users with an open websocket session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveConnectionsResponse {
    pub active: Vec<i64>,
}

fn default_limit() -> i64 {
    100
}

/// `?skip=&limit=&include_deleted=`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub include_deleted: bool,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: default_limit(),
            include_deleted: false,
        }
    }
}

/// `?include_deleted=`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeDeletedQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

/// `?name=&author_id=` of `POST /files`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadQuery {
    pub name: String,
    #[serde(default)]
    pub author_id: Option<i64>,
}

/// Body of `POST /chats/:id/messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub author_id: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub file_id: Option<i64>,
}

/// A stored chat message and whether it was pushed to the other participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageResponse {
    pub message: ChatMessage,
    pub delivered: bool,
}
