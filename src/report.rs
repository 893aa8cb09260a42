use chrono::DateTime;
use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    media::{MediaMap, MediaRecord},
    sources::post::Post,
};

/// Host used in permalinks.
pub const SERVICE_HOST: &str = "twitter.com";
/// `created_at` format of twitter v1.1 API
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

lazy_static! {
    static ref IMAGE_SIZE: Regex = Regex::new("name=[a-z0-9]+").unwrap();
}

pub struct Reporter {
    /// Rewrite twitter photo urls to the original size.
    pub original_quality: bool,
}

pub fn permalink(post: &Post) -> String {
    format!("https://{SERVICE_HOST}/{}/status/{}", post.user.screen_name, post.key())
}

/// `created_at` as `YYYY-MM-DD HH:MM:SS+HH:MM`, or unchanged if unparseable.
pub fn post_date(post: &Post) -> String {
    match DateTime::parse_from_str(&post.created_at, CREATED_AT_FORMAT) {
        Ok(dt) => dt.format("%Y-%m-%d %H:%M:%S%:z").to_string(),
        Err(_) => post.created_at.clone(),
    }
}

/// Author name, handle and text of the post.
pub fn description(post: &Post) -> String {
    format!("{}\n@{}\n{}", post.user.name, post.user.screen_name, post.text())
}

/// Url of the largest version of a twitter-hosted image.
pub fn original_image_url(url: &str) -> String {
    if !url.contains("pbs.twimg.com/media/") {
        return url.into();
    }

    if url.contains('?') {
        if IMAGE_SIZE.is_match(url) {
            IMAGE_SIZE.replace_all(url, "name=orig").into_owned()
        } else {
            format!("{url}&name=orig")
        }
    } else {
        format!("{url}?name=orig")
    }
}

impl Reporter {
    pub fn new(original_quality: bool) -> Self {
        Self { original_quality }
    }

    pub fn line(&self, record: &MediaRecord) -> String {
        let post = &record.source_post;
        let urls: Vec<String> = record
            .media_urls
            .iter()
            .map(|u| if self.original_quality { original_image_url(u) } else { u.clone() })
            .collect();

        format!(
            "user_id={}, tweet_date={}, permalink={}, media_urls={:?}",
            post.user.screen_name,
            post_date(post),
            permalink(post),
            urls
        )
    }

    /// Lines for all records, oldest post first.
    pub fn lines(&self, media: &MediaMap) -> Vec<String> {
        let mut records: Vec<&MediaRecord> = media.values().collect();
        records.sort_by_key(|r| r.source_post.id);

        records.into_iter().map(|r| self.line(r)).collect()
    }
}
