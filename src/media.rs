use std::collections::BTreeMap;

use thiserror::Error;

use crate::sources::{
    post::{MediaDescriptor, Post},
    MediaHostResolver, ResolverError,
};

/// Links starting with this are resolved by [`MediaHostResolver`].
pub const HOSTED_MEDIA_PREFIX: &str = "https://www.instagram.com";

/// Real posts nest at most retweet -> quote -> post.
const MAX_NESTING: usize = 8;

/// Media found in a single post.
#[derive(Clone, Debug)]
pub struct MediaRecord {
    pub post_id: String,
    /// Never empty
    pub media_urls: Vec<String>,
    /// Post that actually carries the media (not retweet wrapper).
    pub source_post: Post,
}

/// post id -> media record
pub type MediaMap = BTreeMap<String, MediaRecord>;

/// Outcome of resolving a single top-level post.
#[derive(Debug)]
pub enum Resolution {
    Media(MediaMap),
    Empty,
    Failed(ResolutionError),
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("malformed post: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("video descriptor has no video_info")]
    MissingVideoInfo,
    #[error("failed to resolve hosted media {url}: {source}")]
    Host {
        url: String,
        #[source]
        source: ResolverError,
    },
    #[error("post nesting is deeper than 8 levels")]
    TooDeep,
}

/// Where media of a post comes from.
enum MediaSource<'a> {
    Direct(&'a [MediaDescriptor]),
    Hosted(&'a str),
}

/// Resolve all media reachable from `post`: its own (or retweeted) media and
/// media of quoted posts, each keyed by id of the post carrying it.
pub fn resolve(post: &Post, host: &dyn MediaHostResolver) -> Resolution {
    match collect(post, host, 0) {
        Ok(map) if map.is_empty() => Resolution::Empty,
        Ok(map) => Resolution::Media(map),
        Err(e) => Resolution::Failed(e),
    }
}

fn collect(post: &Post, host: &dyn MediaHostResolver, depth: usize) -> Result<MediaMap, ResolutionError> {
    if depth > MAX_NESTING {
        return Err(ResolutionError::TooDeep);
    }

    let target = post.retweeted_status.as_deref().unwrap_or(post);
    let mut found = MediaMap::new();

    if target.is_quote_status {
        if let Some(quoted) = target.quoted_status.as_deref() {
            found.extend(collect(quoted, host, depth + 1)?);
        }
    }

    let urls = match media_source(target) {
        Some(MediaSource::Direct(media)) => direct_urls(media)?,
        Some(MediaSource::Hosted(url)) => host.resolve(url).map_err(|source| ResolutionError::Host {
            url: url.to_string(),
            source,
        })?,
        None => vec![],
    };

    if !urls.is_empty() {
        let post_id = target.key();
        found.insert(
            post_id.clone(),
            MediaRecord {
                post_id,
                media_urls: urls,
                source_post: target.clone(),
            },
        );
    }

    Ok(found)
}

fn media_source(post: &Post) -> Option<MediaSource<'_>> {
    let media = post.media();
    if !media.is_empty() {
        return Some(MediaSource::Direct(media));
    }

    post.urls()
        .iter()
        .find_map(|u| {
            [u.expanded_url.as_deref(), u.url.as_deref()]
                .into_iter()
                .flatten()
                .find(|s| s.starts_with(HOSTED_MEDIA_PREFIX))
        })
        .map(MediaSource::Hosted)
}

/// One url per descriptor, descriptors without usable url are dropped.
fn direct_urls(media: &[MediaDescriptor]) -> Result<Vec<String>, ResolutionError> {
    let mut urls = Vec::with_capacity(media.len());

    for m in media {
        let url = match m.r#type.as_str() {
            "photo" => photo_url(m),
            "video" => video_url(m)?,
            _ => None,
        };

        urls.extend(url);
    }

    Ok(urls)
}

fn photo_url(media: &MediaDescriptor) -> Option<String> {
    media
        .media_url_https
        .as_ref()
        .or(media.media_url.as_ref())
        .cloned()
}

/// Url of the first variant with the strictly greatest positive bitrate.
fn video_url(media: &MediaDescriptor) -> Result<Option<String>, ResolutionError> {
    let info = media.video_info.as_ref().ok_or(ResolutionError::MissingVideoInfo)?;

    let mut best: Option<(u64, &str)> = None;
    for variant in &info.variants {
        match (variant.bitrate, best) {
            (Some(b), Some((max, _))) if b <= max => {}
            (Some(b), _) if b > 0 => best = Some((b, variant.url.as_str())),
            _ => {}
        }
    }

    Ok(best.map(|(_, url)| url.to_string()))
}
