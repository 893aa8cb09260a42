use serde::Deserialize;
use serde_json::Value;

/// Twitter v1.1 status, as returned with `tweet_mode=extended`.
#[derive(Clone, Debug, Deserialize)]
pub struct Post {
    pub id: u64,
    #[serde(default)]
    pub id_str: Option<String>,
    pub created_at: String,
    /// Set in `tweet_mode=extended` responses
    #[serde(default)]
    pub full_text: Option<String>,
    /// Possibly truncated text of compat mode
    #[serde(default)]
    pub text: Option<String>,
    pub user: PostAuthor,
    /// Present iff this post is a retweet
    #[serde(default)]
    pub retweeted_status: Option<Box<Post>>,
    /// Present iff this post quotes another one
    #[serde(default)]
    pub quoted_status: Option<Box<Post>>,
    #[serde(default)]
    pub is_quote_status: bool,
    /// Whether the authenticated account has favorited this post
    #[serde(default)]
    pub favorited: Option<bool>,
    #[serde(default)]
    pub entities: Option<PostEntities>,
    #[serde(default)]
    pub extended_entities: Option<PostExtendedEntities>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PostAuthor {
    pub screen_name: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PostEntities {
    #[serde(default)]
    pub urls: Vec<PostUrl>,
}

/// Short url in post text.
#[derive(Clone, Debug, Deserialize)]
pub struct PostUrl {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub expanded_url: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PostExtendedEntities {
    #[serde(default)]
    pub media: Vec<MediaDescriptor>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MediaDescriptor {
    pub r#type: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_url_https: Option<String>,
    #[serde(default)]
    pub video_info: Option<VideoInfo>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub variants: Vec<VideoVariant>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VideoVariant {
    #[serde(default)]
    pub bitrate: Option<u64>,
    pub url: String,
}

impl Post {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    /// Stable string id of the post.
    pub fn key(&self) -> String {
        match &self.id_str {
            Some(s) if !s.is_empty() => s.clone(),
            _ => self.id.to_string(),
        }
    }

    /// Full post text, compat `text` if the extended one is missing.
    pub fn text(&self) -> &str {
        self.full_text
            .as_deref()
            .or(self.text.as_deref())
            .unwrap_or_default()
    }

    pub fn media(&self) -> &[MediaDescriptor] {
        self.extended_entities
            .as_ref()
            .map(|e| e.media.as_slice())
            .unwrap_or_default()
    }

    pub fn urls(&self) -> &[PostUrl] {
        self.entities
            .as_ref()
            .map(|e| e.urls.as_slice())
            .unwrap_or_default()
    }
}
