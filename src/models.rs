use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Id = i64;

pub const MESSAGE_MAX_LEN: usize = 140;
pub const TIMELINE_LIMIT: usize = 100;
pub const DEFAULT_IMAGE_URL: &str = "/static/images/default-pic.svg";
pub const DEFAULT_HEADER_IMAGE_URL: &str = "/static/images/perch-hero.svg";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub email: String,
    pub bio: String,
    pub image_url: String,
    pub header_image_url: String,
    pub password_hash: String, // argon2 PHC string, never rendered
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub image_url: Option<String>,
}

/// Full replacement of the editable profile fields.
#[derive(Debug, Clone)]
pub struct UpdateProfile {
    pub username: String,
    pub email: String,
    pub image_url: String,
    pub header_image_url: String,
    pub bio: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Message {
    pub id: Id,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: Id,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: Id,
    pub text: String,
}

/// A message joined with the bits of its author a page needs to render it.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct FeedItem {
    pub id: Id,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: Id,
    pub username: String,
    pub image_url: String,
}

impl FeedItem {
    pub fn from_parts(message: &Message, author: &User) -> Self {
        Self {
            id: message.id,
            text: message.text.clone(),
            timestamp: message.timestamp,
            user_id: author.id,
            username: author.username.clone(),
            image_url: author.image_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct DirectMessageThread {
    pub id: Id,
    pub user_1: Id,
    pub user_2: Id,
}

impl DirectMessageThread {
    /// True when the thread pairs exactly `a` and `b`, in either order.
    pub fn involves(&self, a: Id, b: Id) -> bool {
        (self.user_1 == a && self.user_2 == b) || (self.user_1 == b && self.user_2 == a)
    }

    pub fn other_participant(&self, me: Id) -> Option<Id> {
        if self.user_1 == me {
            Some(self.user_2)
        } else if self.user_2 == me {
            Some(self.user_1)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct DirectMessage {
    pub id: Id,
    pub text: String,
    pub thread_id: Id,
    pub sender_id: Id,
    pub recipient_id: Id,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDirectMessage {
    pub sender_id: Id,
    pub recipient_id: Id,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeToggle {
    Liked,
    Unliked,
}
