//! Payload parser for API responses and post pages
//!
//! This module turns source payloads into typed records:
//! - Profile and timeline listings from the web profile endpoint
//! - Comment listings from the GraphQL comment query
//! - Post details and tagged users from the JSON embedded in post pages
//!
//! Parsing is shallow: identity fields are required, everything else is
//! taken when present.

use crate::storage::{CommentRecord, PostRecord, PostUrlRecord, ProfileRecord, TagRelationRecord};
use crate::target::post_url;
use scraper::{Html, Selector};
use serde_json::Value;
use std::collections::BTreeMap;

/// Keys under which post pages nest the media object
const MEDIA_KEYS: &[&str] = &["xdt_shortcode_media", "shortcode_media"];

/// One page of a cursor listing
#[derive(Debug, Clone)]
pub struct Listing<R> {
    pub items: Vec<R>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub count: Option<u64>,
}

/// Parses the `data.user` object of a web profile response
///
/// # Returns
///
/// * `Ok(ProfileRecord)` - The user object was present
/// * `Err(String)` - The response has no user; the account is missing or hidden
pub fn parse_profile(body: &Value) -> Result<ProfileRecord, String> {
    let user = body
        .pointer("/data/user")
        .filter(|u| u.is_object())
        .ok_or_else(|| "Invalid response structure or user not found".to_string())?;

    let username = str_field(user, "username")
        .ok_or_else(|| "User object has no username".to_string())?;

    Ok(ProfileRecord {
        id: id_field(user, "id").unwrap_or_default(),
        username,
        full_name: str_field(user, "full_name"),
        biography: str_field(user, "biography"),
        external_url: str_field(user, "external_url"),
        followers_count: user.pointer("/edge_followed_by/count").and_then(Value::as_u64),
        following_count: user.pointer("/edge_follow/count").and_then(Value::as_u64),
        posts_count: user
            .pointer("/edge_owner_to_timeline_media/count")
            .and_then(Value::as_u64),
        is_private: user.get("is_private").and_then(Value::as_bool),
        is_verified: user.get("is_verified").and_then(Value::as_bool),
        is_business_account: user.get("is_business_account").and_then(Value::as_bool),
        profile_pic_url: str_field(user, "profile_pic_url_hd")
            .or_else(|| str_field(user, "profile_pic_url")),
        category_name: str_field(user, "category_name"),
    })
}

/// Parses the owner id and timeline listing from a profile or timeline response
///
/// Both the web profile endpoint and the GraphQL timeline query nest the
/// listing at `data.user.edge_owner_to_timeline_media`.
///
/// # Arguments
///
/// * `body` - The decoded response
/// * `base_url` - Used to build canonical post URLs
pub fn parse_timeline(
    body: &Value,
    base_url: &str,
) -> Result<(Option<String>, Listing<PostUrlRecord>), String> {
    let user = body
        .pointer("/data/user")
        .filter(|u| u.is_object())
        .ok_or_else(|| "Invalid response structure or user not found".to_string())?;

    let media = user
        .get("edge_owner_to_timeline_media")
        .filter(|m| m.is_object())
        .ok_or_else(|| "No posts data found in any expected location".to_string())?;

    let items = edges(media)
        .filter_map(|node| {
            let shortcode = str_field(node, "shortcode").or_else(|| str_field(node, "code"))?;
            Some(PostUrlRecord {
                url: post_url(base_url, &shortcode),
                taken_at: node.get("taken_at_timestamp").and_then(Value::as_i64),
                is_video: node.get("is_video").and_then(Value::as_bool),
                shortcode,
            })
        })
        .collect();

    Ok((id_field(user, "id"), listing_from(media, items)))
}

/// Parses a GraphQL comment listing
pub fn parse_comments(body: &Value) -> Result<Listing<CommentRecord>, String> {
    let comments = body
        .pointer("/data/shortcode_media/edge_media_to_parent_comment")
        .filter(|c| c.is_object())
        .ok_or_else(|| "Invalid response structure or post not found".to_string())?;

    let items = edges(comments)
        .filter_map(|node| {
            Some(CommentRecord {
                id: id_field(node, "id")?,
                text: str_field(node, "text"),
                created_at: node.get("created_at").and_then(Value::as_i64),
                owner_id: node.get("owner").and_then(|o| id_field(o, "id")),
                owner_username: node.get("owner").and_then(|o| str_field(o, "username")),
                owner_is_verified: node.pointer("/owner/is_verified").and_then(Value::as_bool),
                likes: node
                    .pointer("/edge_liked_by/count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                replies: node
                    .pointer("/edge_threaded_comments/count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            })
        })
        .collect();

    Ok(listing_from(comments, items))
}

/// Extracts every JSON document embedded in an HTML page
///
/// Looks at `application/json` and `application/ld+json` script blocks and
/// silently skips blocks that do not decode.
pub fn extract_embedded_json(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);

    let selector = match Selector::parse(
        r#"script[type="application/json"], script[type="application/ld+json"]"#,
    ) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter_map(|element| {
            let text = element.text().collect::<String>();
            serde_json::from_str(text.trim()).ok()
        })
        .collect()
}

/// Finds the media object for `shortcode` inside a decoded document
///
/// Matches an object whose `shortcode` or `code` equals the shortcode, or the
/// value under a `shortcode_media` style key, whichever is met first in a
/// depth-first walk.
pub fn find_media<'v>(value: &'v Value, shortcode: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => {
            let code = map
                .get("shortcode")
                .or_else(|| map.get("code"))
                .and_then(Value::as_str);
            if code == Some(shortcode) {
                return Some(value);
            }

            for (key, child) in map {
                if MEDIA_KEYS.contains(&key.as_str()) && child.is_object() {
                    return Some(child);
                }
                if let Some(found) = find_media(child, shortcode) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(|item| find_media(item, shortcode)),
        _ => None,
    }
}

/// Locates the media object for `shortcode` in a post page
pub fn find_media_in_page(html: &str, shortcode: &str) -> Option<Value> {
    extract_embedded_json(html)
        .iter()
        .find_map(|doc| find_media(doc, shortcode).cloned())
}

/// Builds a post record from a media object
///
/// Handles both the GraphQL shape (`__typename`, `edge_*` counters) and the
/// web API shape (`media_type`, `like_count`).
pub fn parse_post(media: &Value, shortcode: &str, url: &str) -> PostRecord {
    let graphql = media.get("__typename").is_some();
    let is_clip = media.get("product_type").and_then(Value::as_str) == Some("clips");

    let post_type = if graphql {
        match media.get("__typename").and_then(Value::as_str) {
            Some("GraphVideo") if is_clip => "reel",
            Some("GraphVideo") => "video",
            Some("GraphSidecar") => "carousel",
            _ => "photo",
        }
    } else {
        match media.get("media_type").and_then(Value::as_u64) {
            Some(2) if is_clip => "reel",
            Some(2) => "video",
            Some(8) => "carousel",
            _ => "photo",
        }
    };

    let caption_pointer = if graphql {
        "/edge_media_to_caption/edges/0/node/text"
    } else {
        "/caption/text"
    };
    let caption = media
        .pointer(caption_pointer)
        .and_then(Value::as_str)
        .map(str::to_string);

    let (likes, comments, taken_at, owner) = if graphql {
        (
            media
                .pointer("/edge_media_preview_like/count")
                .or_else(|| media.pointer("/edge_liked_by/count"))
                .and_then(Value::as_u64),
            media
                .pointer("/edge_media_to_comment/count")
                .or_else(|| media.pointer("/edge_media_to_parent_comment/count"))
                .and_then(Value::as_u64),
            media.get("taken_at_timestamp").and_then(Value::as_i64),
            media.pointer("/owner/username"),
        )
    } else {
        (
            media.get("like_count").and_then(Value::as_u64),
            media.get("comment_count").and_then(Value::as_u64),
            media.get("taken_at").and_then(Value::as_i64),
            media.pointer("/user/username"),
        )
    };

    PostRecord {
        shortcode: shortcode.to_string(),
        id: id_field(media, "id").or_else(|| id_field(media, "pk")),
        url: url.to_string(),
        post_type: Some(post_type.to_string()),
        hashtags: caption.as_deref().map(extract_hashtags).unwrap_or_default(),
        caption,
        likes,
        comments,
        video_view_count: media
            .get("video_view_count")
            .or_else(|| media.get("play_count"))
            .and_then(Value::as_u64),
        taken_at,
        owner_username: owner.and_then(Value::as_str).map(str::to_string),
        location: media.pointer("/location/name").and_then(Value::as_str).map(str::to_string),
    }
}

/// Collects the users tagged on a post, with the slides they appear on
///
/// Carousels report per-slide tags (slides numbered from 1); single media
/// report their tags on slide 1.
pub fn parse_tag_relations(media: &Value, shortcode: &str) -> Vec<TagRelationRecord> {
    let mut slides_by_user: BTreeMap<String, Vec<u32>> = BTreeMap::new();

    match media.get("carousel_media").and_then(Value::as_array) {
        Some(children) if media.get("media_type").and_then(Value::as_u64) == Some(8) => {
            for (index, child) in children.iter().enumerate() {
                for username in tagged_usernames(child) {
                    slides_by_user
                        .entry(username)
                        .or_default()
                        .push(index as u32 + 1);
                }
            }
        }
        _ => {
            for username in tagged_usernames(media) {
                slides_by_user.entry(username).or_default().push(1);
            }
        }
    }

    slides_by_user
        .into_iter()
        .map(|(username, mut slides)| {
            slides.dedup();
            TagRelationRecord {
                shortcode: shortcode.to_string(),
                username,
                slides,
            }
        })
        .collect()
}

/// Extracts `#hashtags` from caption text, lowercased and deduplicated
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();

    for word in text.split('#').skip(1) {
        let tag: String = word
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if tag.is_empty() {
            continue;
        }
        let tag = tag.to_lowercase();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    tags
}

/// Usernames from `usertags.in` (web API) or `edge_media_to_tagged_user` (GraphQL)
fn tagged_usernames(media: &Value) -> Vec<String> {
    let api = media
        .pointer("/usertags/in")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|tag| tag.pointer("/user/username").and_then(Value::as_str));

    let graphql = media
        .pointer("/edge_media_to_tagged_user/edges")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|edge| edge.pointer("/node/user/username").and_then(Value::as_str));

    api.chain(graphql).map(str::to_string).collect()
}

/// Iterates the `node` of each entry in `edges`
fn edges(listing: &Value) -> impl Iterator<Item = &Value> {
    listing
        .get("edges")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|edge| edge.get("node"))
}

fn listing_from<R>(listing: &Value, items: Vec<R>) -> Listing<R> {
    Listing {
        items,
        end_cursor: listing
            .pointer("/page_info/end_cursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
        has_next_page: listing
            .pointer("/page_info/has_next_page")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        count: listing.get("count").and_then(Value::as_u64),
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Ids arrive as strings or numbers depending on the endpoint
fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
