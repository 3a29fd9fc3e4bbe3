use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::soft_delete::SoftDelete;

/// Implements [`SoftDelete`] for a record with `id` and `deleted_at` fields.
macro_rules! soft_delete_record {
    ($record:ty, $table:literal) => {
        impl SoftDelete for $record {
            const TABLE: &'static str = $table;

            fn id(&self) -> i64 {
                self.id
            }

            fn deleted_at(&self) -> Option<DateTime<Utc>> {
                self.deleted_at
            }

            fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>) {
                self.deleted_at = at;
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    InProgress,
    Completed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "active",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "in_progress" => OrderStatus::InProgress,
            "completed" => OrderStatus::Completed,
            _ => OrderStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Pending,
    Accepted,
    Rejected,
}

impl BidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BidStatus::Pending => "pending",
            BidStatus::Accepted => "accepted",
            BidStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "accepted" => BidStatus::Accepted,
            "rejected" => BidStatus::Rejected,
            _ => BidStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_core: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub role_id: i64,
    pub login: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Association row linking a user to a skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSkill {
    pub id: i64,
    pub user_id: i64,
    pub skill_id: i64,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: i64,
    pub author_id: Option<i64>,
    pub name: String,
    /// Where the contents live on disk; None for metadata-only records.
    pub path: Option<String>,
    pub is_image: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub author_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub preview_file_id: Option<i64>,
    pub start_price: Option<f64>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub price: Option<f64>,
    pub comment: Option<String>,
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub name: Option<String>,
    pub order_id: i64,
    pub client_id: i64,
    pub executor_id: i64,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Chat {
    /// The participant on the other side of `user_id`, if `user_id` takes part.
    pub fn counterpart(&self, user_id: i64) -> Option<i64> {
        if user_id == self.client_id {
            Some(self.executor_id)
        } else if user_id == self.executor_id {
            Some(self.client_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub chat_id: i64,
    pub author_id: i64,
    pub text: Option<String>,
    pub file_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub author_id: i64,
    pub executor_id: i64,
    pub grade: i32,
    pub comment: Option<String>,
    pub file_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

soft_delete_record!(Role, "roles");
soft_delete_record!(User, "users");
soft_delete_record!(Skill, "skills");
soft_delete_record!(UserSkill, "user_skills");
soft_delete_record!(File, "files");
soft_delete_record!(Order, "orders");
soft_delete_record!(Bid, "bids");
soft_delete_record!(Chat, "chats");
soft_delete_record!(ChatMessage, "messages");
soft_delete_record!(Review, "reviews");
soft_delete_record!(Notification, "notifications");

// ========== Write models ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub role_id: i64,
    pub login: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub author_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub preview_file_id: Option<i64>,
    pub start_price: Option<f64>,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_price: Option<f64>,
    pub status: Option<OrderStatus>,
}

fn default_search_limit() -> i64 {
    10
}

/// Name search over orders open for bids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSearch {
    /// Case-insensitive substring of the order name.
    pub q: String,
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_search_limit")]
    pub limit: i64,
}

impl OrderSearch {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            min_price: None,
            max_price: None,
            skip: 0,
            limit: default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBid {
    pub order_id: i64,
    pub user_id: i64,
    pub price: Option<f64>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChat {
    pub name: Option<String>,
    pub order_id: i64,
    pub client_id: i64,
    pub executor_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub author_id: i64,
    pub text: Option<String>,
    pub file_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    pub author_id: i64,
    pub executor_id: i64,
    pub grade: i32,
    pub comment: Option<String>,
    pub file_id: Option<i64>,
}
