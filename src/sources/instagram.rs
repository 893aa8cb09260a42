use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking::Client;
use tracing::debug;

use super::{MediaHostResolver, ResolverError};

lazy_static! {
    static ref JSON_MEDIA: Regex = Regex::new(r#""(?:video_url|display_url)"\s*:\s*"([^"]+)""#).unwrap();
    static ref META_MEDIA: Regex =
        Regex::new(r#"<meta\s+property="og:(?:video|image)"\s+content="([^"]+)""#).unwrap();
}

/// Scrapes media urls from instagram post pages.
pub struct InstagramResolver {
    http: Client,
}

impl InstagramResolver {
    pub fn new() -> Self {
        Self { http: Client::new() }
    }
}

impl Default for InstagramResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaHostResolver for InstagramResolver {
    fn resolve(&self, url: &str) -> Result<Vec<String>, ResolverError> {
        let res = self.http.get(url).send()?;

        if !res.status().is_success() {
            return Err(ResolverError::Status(res.status().as_u16()));
        }

        let urls = extract_media_urls(&res.text()?);
        debug!(%url, found = urls.len(), "resolved hosted media");

        Ok(urls)
    }
}

/// Media urls embedded into page, first-seen order, without duplicates.
/// Meta tags are used only when page has no embedded json.
pub fn extract_media_urls(page: &str) -> Vec<String> {
    let mut urls = Vec::new();

    for cap in JSON_MEDIA.captures_iter(page) {
        push_unescaped(&mut urls, &cap[1]);
    }
    if urls.is_empty() {
        for cap in META_MEDIA.captures_iter(page) {
            push_unescaped(&mut urls, &cap[1]);
        }
    }

    urls
}

fn push_unescaped(urls: &mut Vec<String>, raw: &str) {
    let url = raw
        .replace("\\u0026", "&")
        .replace("\\/", "/")
        .replace("&amp;", "&");
    if !urls.contains(&url) {
        urls.push(url);
    }
}

#[cfg(test)]
mod tests {
    use super::extract_media_urls;

    #[test]
    fn from_embedded_json() {
        let page = r#"{"display_url":"https:\/\/cdn.example\/a.jpg?x=1&y=2","video_url":"https://cdn.example/v.mp4",
            "edges":[{"display_url":"https://cdn.example/b.jpg"},{"display_url":"https://cdn.example/b.jpg"}]}"#;

        assert_eq!(
            extract_media_urls(page),
            vec![
                "https://cdn.example/a.jpg?x=1&y=2",
                "https://cdn.example/v.mp4",
                "https://cdn.example/b.jpg",
            ]
        );
    }

    #[test]
    fn from_meta_tags() {
        let page = r#"<head><meta property="og:image" content="https://cdn.example/c.jpg?a=1&amp;b=2" /></head>"#;

        assert_eq!(extract_media_urls(page), vec!["https://cdn.example/c.jpg?a=1&b=2"]);
    }

    #[test]
    fn nothing_found() {
        assert!(extract_media_urls("<html></html>").is_empty());
    }
}
