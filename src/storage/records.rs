//! Typed record shapes, one per resource kind
//!
//! Every field apart from the identity is optional: the source omits fields
//! freely and a later scrape may fill in what an earlier one lacked.

use crate::storage::Identified;
use serde::{Deserialize, Serialize};

/// An account profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Source-assigned user id; empty when the source omitted the id
    #[serde(default)]
    pub id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub biography: Option<String>,
    pub external_url: Option<String>,
    pub followers_count: Option<u64>,
    pub following_count: Option<u64>,
    pub posts_count: Option<u64>,
    pub is_private: Option<bool>,
    pub is_verified: Option<bool>,
    pub is_business_account: Option<bool>,
    pub profile_pic_url: Option<String>,
    pub category_name: Option<String>,
}

impl Identified for ProfileRecord {
    fn identity(&self) -> String {
        if self.id.is_empty() {
            self.username.clone()
        } else {
            self.id.clone()
        }
    }
}

/// A post URL discovered on an account timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostUrlRecord {
    pub shortcode: String,
    pub url: String,
    /// Unix seconds
    pub taken_at: Option<i64>,
    pub is_video: Option<bool>,
}

impl Identified for PostUrlRecord {
    fn identity(&self) -> String {
        self.shortcode.clone()
    }
}

/// Detailed post information scraped from a post page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub shortcode: String,
    pub id: Option<String>,
    pub url: String,
    /// One of `photo`, `video`, `reel`, `carousel`
    pub post_type: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    pub likes: Option<u64>,
    pub comments: Option<u64>,
    pub video_view_count: Option<u64>,
    /// Unix seconds
    pub taken_at: Option<i64>,
    pub owner_username: Option<String>,
    pub location: Option<String>,
}

impl Identified for PostRecord {
    fn identity(&self) -> String {
        self.shortcode.clone()
    }
}

/// A top-level comment on a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: String,
    pub text: Option<String>,
    /// Unix seconds
    pub created_at: Option<i64>,
    pub owner_id: Option<String>,
    pub owner_username: Option<String>,
    pub owner_is_verified: Option<bool>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub replies: u64,
}

impl Identified for CommentRecord {
    fn identity(&self) -> String {
        self.id.clone()
    }
}

/// A user tagged on a post, with the carousel slides the tag appears on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRelationRecord {
    pub shortcode: String,
    pub username: String,
    #[serde(default)]
    pub slides: Vec<u32>,
}

impl Identified for TagRelationRecord {
    fn identity(&self) -> String {
        format!("{}:{}", self.shortcode, self.username)
    }
}
