//! Feed records: posts and the user references embedded in them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Denormalized reference to a user, as embedded in posts, conversations
/// and notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    /// User ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Whether the account is verified.
    #[serde(default)]
    pub is_verified: bool,
    /// Last known presence.
    #[serde(default)]
    pub is_online: bool,
}

impl UserRef {
    /// Creates a user reference with only an id and a name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: None,
            is_verified: false,
            is_online: false,
        }
    }
}

/// A point on the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// A named location attached to a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    /// Human-readable name ("Tokyo, Japan").
    pub name: String,
    /// Coordinates of the place.
    pub coordinates: Coordinates,
}

/// Kind of feed post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    /// Plain text.
    #[default]
    Text,
    /// Post with images.
    Image,
    /// Travel story.
    Story,
    /// Travel tip.
    Tip,
    /// Safety report.
    Safety,
}

/// A feed post.
///
/// `likes`, `comments` and `shares` are unsigned, so the `likes >= 0`
/// invariant holds by construction; stores still clamp on decrement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Server-assigned post ID.
    pub id: String,
    /// Author ID.
    pub user_id: String,
    /// Author snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
    /// Body text.
    pub content: String,
    /// Media references.
    #[serde(default)]
    pub images: Vec<String>,
    /// Location the post was written at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Place>,
    /// Tag set.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Like counter.
    #[serde(default)]
    pub likes: u32,
    /// Comment counter.
    #[serde(default)]
    pub comments: u32,
    /// Share counter.
    #[serde(default)]
    pub shares: u32,
    /// Whether the current user liked the post.
    #[serde(default)]
    pub is_liked: bool,
    /// Whether the current user bookmarked the post.
    #[serde(default)]
    pub is_bookmarked: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Post kind.
    #[serde(rename = "type", default)]
    pub kind: PostKind,
}

/// Body of a post creation request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    /// Body text.
    pub content: String,
    /// Media references.
    #[serde(default)]
    pub images: Vec<String>,
    /// Optional location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Place>,
    /// Tag set.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Post kind.
    #[serde(rename = "type", default)]
    pub kind: PostKind,
}

impl NewPost {
    /// Creates a text post draft.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Adds a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_wire_names_are_camel_case() {
        let json = r#"{
            "id": "1",
            "userId": "u1",
            "content": "Kyoto at dawn",
            "tags": ["japan"],
            "likes": 124,
            "comments": 15,
            "shares": 8,
            "isLiked": false,
            "isBookmarked": true,
            "createdAt": "2024-05-01T08:00:00Z",
            "updatedAt": "2024-05-01T08:00:00Z",
            "type": "image"
        }"#;

        let post: Post = serde_json::from_str(json).unwrap();
        assert_eq!(post.user_id, "u1");
        assert_eq!(post.likes, 124);
        assert!(post.is_bookmarked);
        assert_eq!(post.kind, PostKind::Image);
        assert!(post.images.is_empty());
    }

    #[test]
    fn negative_like_count_is_rejected() {
        let json = r#"{"id":"1","userId":"u1","content":"","likes":-1,
            "createdAt":"2024-05-01T08:00:00Z","updatedAt":"2024-05-01T08:00:00Z"}"#;
        assert!(serde_json::from_str::<Post>(json).is_err());
    }

    #[test]
    fn new_post_defaults_to_text() {
        let draft = NewPost::text("hello").with_tag("solo");
        let value = serde_json::to_value(&draft).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["tags"][0], "solo");
    }
}
