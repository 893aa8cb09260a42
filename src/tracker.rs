//! Turns full per-cycle results into deltas of not yet delivered media.
//!
//! Retweets are tracked with a `since_id` high-water mark, so only newer
//! timeline posts are fetched at all. Favorites are not id ordered, so the
//! whole list is fetched every cycle and diffed against previous snapshot.
//!
//! Note that in `mixed` mode a retweet is only surfaced if the account had
//! favorited it at the time it was fetched. Retweets favorited later are
//! behind `since_id` already and never seen again.

use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    media::{self, MediaMap, Resolution, ResolutionError},
    sources::{post::Post, Feed, MediaHostResolver, Page, PageQuery, PostSource, SourceError},
};

/// Which feeds are watched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mode {
    pub favorites: bool,
    pub retweets: bool,
    /// Only retweets of posts favorited by the account itself
    pub mixed: bool,
}

#[derive(Debug, Error)]
#[error("unknown mode {0:?}, expected combination of \"fav\", \"rt\" or \"mixed\"")]
pub struct UnknownMode(String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mixed = s.contains("mixed");
        let mode = Self {
            favorites: s.contains("fav"),
            retweets: s.contains("rt") || mixed,
            mixed,
        };

        if mode.favorites || mode.retweets {
            Ok(mode)
        } else {
            Err(UnknownMode(s.into()))
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    pub page_limit: u32,
    pub page_size: u32,
    pub mode: Mode,
}

/// Per-account state carried between cycles. Lives in memory only.
#[derive(Clone, Debug)]
pub struct PollCursor {
    /// Retweets with id at or below are already seen. Never decreases
    pub since_id: u64,
    /// Full favorites result of previous cycle
    pub favorites: MediaMap,
}

impl Default for PollCursor {
    fn default() -> Self {
        Self {
            since_id: 1,
            favorites: MediaMap::new(),
        }
    }
}

/// Post that could not be resolved.
#[derive(Debug)]
pub struct Failure {
    pub post_id: Option<String>,
    pub error: ResolutionError,
}

/// Result of a single poll cycle.
#[derive(Debug, Default)]
pub struct Cycle {
    /// Newly seen media
    pub delivered: MediaMap,
    pub failures: Vec<Failure>,
}

/// Run one cycle for `account`: fetch what `settings.mode` asks for and
/// return updated cursor with delta against `cursor`.
pub fn poll(
    cursor: PollCursor,
    source: &dyn PostSource,
    host: &dyn MediaHostResolver,
    account: &str,
    settings: &PollSettings,
) -> (PollCursor, Cycle) {
    let PollCursor {
        mut since_id,
        favorites: mut snapshot,
    } = cursor;
    let mut cycle = Cycle::default();

    if settings.mode.favorites {
        let query = PageQuery {
            page_limit: settings.page_limit,
            page_size: settings.page_size,
            since_id: None,
        };
        let pages = source.fetch_pages(Feed::Favorites, account, query);

        let (current, failures, complete) = collect_favorites(pages, host);
        let (delta, mut next) = diff_favorites(&snapshot, current);
        info!(%account, total = next.len(), new = delta.len(), complete, "favorites polled");

        if !complete {
            // Partial list, previously seen ids stay seen
            next.extend(snapshot);
        }
        snapshot = next;
        cycle.delivered.extend(delta);
        cycle.failures.extend(failures);
    }

    if settings.mode.retweets {
        let query = PageQuery {
            page_limit: settings.page_limit,
            page_size: settings.page_size,
            since_id: Some(since_id),
        };
        let pages = source.fetch_pages(Feed::Timeline, account, query);

        let (next, media, failures) = collect_retweets(since_id, pages, settings.mode.mixed, host);
        info!(%account, since_id = next, new = media.len(), "retweets polled");

        since_id = next;
        cycle.delivered.extend(media);
        cycle.failures.extend(failures);
    }

    let cursor = PollCursor {
        since_id,
        favorites: snapshot,
    };

    (cursor, cycle)
}

/// Media of every favorited post. The flag is false if fetching was cut
/// short by a source error.
pub fn collect_favorites<I>(pages: I, host: &dyn MediaHostResolver) -> (MediaMap, Vec<Failure>, bool)
where
    I: IntoIterator<Item = Result<Page, SourceError>>,
{
    let mut found = MediaMap::new();
    let mut failures = Vec::new();

    for page in pages {
        let page = match page {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "favorites fetch stopped");
                return (found, failures, false);
            }
        };

        resolve_page(&page, |_| true, host, &mut found, &mut failures);
    }

    (found, failures, true)
}

/// Media of retweets in timeline pages, with advanced `since_id`.
/// With `mixed` only retweets of posts favorited by account count.
pub fn collect_retweets<I>(
    mut since_id: u64,
    pages: I,
    mixed: bool,
    host: &dyn MediaHostResolver,
) -> (u64, MediaMap, Vec<Failure>)
where
    I: IntoIterator<Item = Result<Page, SourceError>>,
{
    let mut found = MediaMap::new();
    let mut failures = Vec::new();

    let eligible = |raw: &Value| match raw.get("retweeted_status") {
        Some(rt) if !rt.is_null() => !mixed || rt.get("favorited").and_then(Value::as_bool) == Some(true),
        _ => false,
    };

    for page in pages {
        let page = match page {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "timeline fetch stopped");
                break;
            }
        };

        since_id = since_id.max(page.max_id);
        resolve_page(&page, &eligible, host, &mut found, &mut failures);
    }

    (since_id, found, failures)
}

/// Split `current` into ids absent from `previous` and the next snapshot.
/// Removed ids are not reported.
pub fn diff_favorites(previous: &MediaMap, current: MediaMap) -> (MediaMap, MediaMap) {
    let delta = current
        .iter()
        .filter(|(id, _)| !previous.contains_key(*id))
        .map(|(id, record)| (id.clone(), record.clone()))
        .collect();

    (delta, current)
}

fn resolve_page(
    page: &Page,
    eligible: impl Fn(&Value) -> bool,
    host: &dyn MediaHostResolver,
    found: &mut MediaMap,
    failures: &mut Vec<Failure>,
) {
    for raw in &page.posts {
        if !eligible(raw) {
            continue;
        }

        let post = match Post::from_value(raw) {
            Ok(p) => p,
            Err(e) => {
                let post_id = raw.get("id_str").and_then(|v| v.as_str()).map(String::from);
                warn!(post_id = ?post_id, error = %e, "skipping malformed post");
                failures.push(Failure {
                    post_id,
                    error: e.into(),
                });
                continue;
            }
        };

        match media::resolve(&post, host) {
            Resolution::Media(map) => found.extend(map),
            Resolution::Empty => {}
            Resolution::Failed(error) => {
                warn!(post_id = %post.key(), error = %error, cause = ?std::error::Error::source(&error), "failed to resolve media");
                failures.push(Failure {
                    post_id: Some(post.key()),
                    error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{collect_favorites, collect_retweets, diff_favorites, poll, Mode, PollCursor, PollSettings};
    use crate::{
        media::{
            tests::{photo_post, post, FakeHost},
            MediaMap, MediaRecord,
        },
        sources::{post::Post, Feed, Page, PageQuery, PostSource, SourceError},
    };

    /// Serves fixed pages per feed and records queries.
    #[derive(Default)]
    struct FakeSource {
        timeline: Vec<Vec<Value>>,
        favorites: Vec<Vec<Value>>,
        fail_after: Option<usize>,
        queries: std::cell::RefCell<Vec<(Feed, PageQuery)>>,
    }

    impl PostSource for FakeSource {
        fn fetch_pages<'a>(
            &'a self,
            feed: Feed,
            _account: &'a str,
            query: PageQuery,
        ) -> Box<dyn Iterator<Item = Result<Page, SourceError>> + 'a> {
            self.queries.borrow_mut().push((feed, query));

            let pages = match feed {
                Feed::Timeline => &self.timeline,
                Feed::Favorites => &self.favorites,
            };
            let since_id = query.since_id.unwrap_or(0);
            let fail_after = self.fail_after;

            Box::new(
                pages
                    .iter()
                    .take(query.page_limit as usize)
                    .enumerate()
                    .map(move |(i, posts)| {
                        if fail_after.map(|n| i >= n).unwrap_or(false) {
                            return Err(SourceError::Api {
                                status: 500,
                                message: "boom".into(),
                            });
                        }
                        let posts = posts
                            .iter()
                            .filter(|p| p["id"].as_u64().unwrap_or(0) > since_id)
                            .cloned()
                            .collect();
                        Ok(Page::new(posts))
                    }),
            )
        }
    }

    fn settings(mode: &str) -> PollSettings {
        PollSettings {
            page_limit: 25,
            page_size: 200,
            mode: mode.parse().unwrap(),
        }
    }

    fn retweet(id: u64, original: Value) -> Value {
        post(id, json!({ "retweeted_status": original }))
    }

    fn ids(map: &MediaMap) -> Vec<&str> {
        map.keys().map(String::as_str).collect()
    }

    fn record(id: u64) -> (String, MediaRecord) {
        let source_post = Post::from_value(&photo_post(id, "https://x/p.jpg")).unwrap();
        (
            id.to_string(),
            MediaRecord {
                post_id: id.to_string(),
                media_urls: vec!["https://x/p.jpg".into()],
                source_post,
            },
        )
    }

    #[test]
    fn mode_parsing() {
        let m: Mode = "rt".parse().unwrap();
        assert!(m.retweets && !m.favorites && !m.mixed);

        let m: Mode = "fav,rt".parse().unwrap();
        assert!(m.retweets && m.favorites && !m.mixed);

        let m: Mode = "fav+mixed".parse().unwrap();
        assert!(m.retweets && m.favorites && m.mixed);

        assert!("likes".parse::<Mode>().is_err());
    }

    #[test]
    fn favorites_delta() {
        let cycle1: MediaMap = [record(1), record(2)].into_iter().collect();
        let cycle2: MediaMap = [record(2), record(3)].into_iter().collect();

        let (delta, snapshot) = diff_favorites(&MediaMap::new(), cycle1);
        assert_eq!(ids(&delta), vec!["1", "2"]);

        let (delta, snapshot) = diff_favorites(&snapshot, cycle2);
        assert_eq!(ids(&delta), vec!["3"]);
        assert_eq!(ids(&snapshot), vec!["2", "3"]);

        let same = snapshot.clone();
        let (delta, _) = diff_favorites(&snapshot, same);
        assert!(delta.is_empty());
    }

    #[test]
    fn retweets_only_and_since_id_advances() {
        let pages = vec![
            Ok(Page::new(vec![
                retweet(40, photo_post(4, "https://x/4.jpg")),
                photo_post(39, "https://x/own.jpg"),
            ])),
            Ok(Page::new(vec![post(30, json!({}))])),
        ];

        let (since_id, media, failures) = collect_retweets(1, pages, false, &FakeHost::default());

        assert_eq!(since_id, 40);
        assert_eq!(ids(&media), vec!["4"]);
        assert!(failures.is_empty());
    }

    #[test]
    fn since_id_never_decreases() {
        let pages = vec![Ok(Page::new(vec![post(30, json!({}))])), Ok(Page::new(vec![]))];

        let (since_id, media, _) = collect_retweets(100, pages, false, &FakeHost::default());

        assert_eq!(since_id, 100);
        assert!(media.is_empty());
    }

    #[test]
    fn mixed_requires_favorited_original() {
        let mut liked = photo_post(5, "https://x/5.jpg");
        liked["favorited"] = json!(true);
        let mut not_liked = photo_post(6, "https://x/6.jpg");
        not_liked["favorited"] = json!(false);
        let pages = vec![Ok(Page::new(vec![
            retweet(50, liked),
            retweet(60, not_liked),
            retweet(70, photo_post(7, "https://x/7.jpg")),
        ]))];

        let (since_id, media, _) = collect_retweets(1, pages, true, &FakeHost::default());

        assert_eq!(since_id, 70);
        assert_eq!(ids(&media), vec!["5"]);
    }

    #[test]
    fn bad_post_does_not_abort_batch() {
        let pages = vec![Ok(Page::new(vec![
            retweet(10, post(1, json!({ "extended_entities": { "media": [{ "type": "video" }] } }))),
            json!({ "id": 11, "id_str": "11", "retweeted_status": { "id": 5 } }),
            retweet(12, photo_post(2, "https://x/2.jpg")),
        ]))];

        let (since_id, media, failures) = collect_retweets(1, pages, false, &FakeHost::default());

        assert_eq!(since_id, 12);
        assert_eq!(ids(&media), vec!["2"]);
        let failed: Vec<_> = failures.iter().map(|f| f.post_id.as_deref()).collect();
        assert_eq!(failed, vec![Some("10"), Some("11")]);
    }

    #[test]
    fn source_error_stops_pages() {
        let pages = vec![
            Ok(Page::new(vec![retweet(10, photo_post(1, "https://x/1.jpg"))])),
            Err(SourceError::Api {
                status: 401,
                message: "nope".into(),
            }),
            Ok(Page::new(vec![retweet(20, photo_post(2, "https://x/2.jpg"))])),
        ];

        let (since_id, media, _) = collect_retweets(1, pages, false, &FakeHost::default());

        assert_eq!(since_id, 10);
        assert_eq!(ids(&media), vec!["1"]);
    }

    #[test]
    fn favorites_cycles_report_only_new() {
        let mut source = FakeSource {
            favorites: vec![vec![photo_post(1, "https://x/a.jpg"), photo_post(2, "https://x/b.jpg")]],
            ..Default::default()
        };
        let host = FakeHost::default();
        let settings = settings("fav");

        let (cursor, cycle) = poll(PollCursor::default(), &source, &host, "acc", &settings);
        assert_eq!(ids(&cycle.delivered), vec!["1", "2"]);

        source.favorites = vec![vec![photo_post(2, "https://x/b.jpg"), photo_post(3, "https://x/c.jpg")]];
        let (cursor, cycle) = poll(cursor, &source, &host, "acc", &settings);
        assert_eq!(ids(&cycle.delivered), vec!["3"]);
        assert_eq!(ids(&cursor.favorites), vec!["2", "3"]);

        let (cursor, cycle) = poll(cursor, &source, &host, "acc", &settings);
        assert!(cycle.delivered.is_empty());
        assert_eq!(cursor.since_id, 1);
        assert!(source.queries.borrow().iter().all(|(feed, _)| *feed == Feed::Favorites));
    }

    #[test]
    fn failed_favorites_fetch_keeps_snapshot() {
        let mut source = FakeSource {
            favorites: vec![vec![photo_post(1, "https://x/a.jpg"), photo_post(2, "https://x/b.jpg")]],
            ..Default::default()
        };
        let host = FakeHost::default();
        let settings = settings("fav");

        let (cursor, cycle) = poll(PollCursor::default(), &source, &host, "acc", &settings);
        assert_eq!(ids(&cycle.delivered), vec!["1", "2"]);

        source.fail_after = Some(0);
        let (cursor, cycle) = poll(cursor, &source, &host, "acc", &settings);
        assert!(cycle.delivered.is_empty());
        assert_eq!(ids(&cursor.favorites), vec!["1", "2"]);

        source.fail_after = None;
        let (cursor, cycle) = poll(cursor, &source, &host, "acc", &settings);
        assert!(cycle.delivered.is_empty());
        assert_eq!(ids(&cursor.favorites), vec!["1", "2"]);
    }

    #[test]
    fn partial_favorites_fetch_merges_snapshot() {
        let mut source = FakeSource {
            favorites: vec![vec![photo_post(1, "https://x/a.jpg")], vec![photo_post(2, "https://x/b.jpg")]],
            ..Default::default()
        };
        let host = FakeHost::default();
        let settings = settings("fav");

        let (cursor, _) = poll(PollCursor::default(), &source, &host, "acc", &settings);

        source.favorites[0].insert(0, photo_post(3, "https://x/c.jpg"));
        source.fail_after = Some(1);
        let (cursor, cycle) = poll(cursor, &source, &host, "acc", &settings);
        assert_eq!(ids(&cycle.delivered), vec!["3"]);
        assert_eq!(ids(&cursor.favorites), vec!["1", "2", "3"]);

        source.fail_after = None;
        let (_, cycle) = poll(cursor, &source, &host, "acc", &settings);
        assert!(cycle.delivered.is_empty());
    }

    #[test]
    fn collect_favorites_reports_interruption() {
        let pages = vec![
            Ok(Page::new(vec![photo_post(1, "https://x/1.jpg")])),
            Err(SourceError::Api {
                status: 503,
                message: "over capacity".into(),
            }),
        ];

        let (media, _, complete) = collect_favorites(pages, &FakeHost::default());

        assert_eq!(ids(&media), vec!["1"]);
        assert!(!complete);

        let (_, _, complete) = collect_favorites(vec![Ok(Page::new(vec![]))], &FakeHost::default());
        assert!(complete);
    }

    #[test]
    fn malformed_non_retweet_is_skipped() {
        let pages = vec![Ok(Page::new(vec![
            json!({ "id": 11, "id_str": "11" }),
            json!({ "id": 12, "id_str": "12", "retweeted_status": null }),
            retweet(13, photo_post(3, "https://x/3.jpg")),
        ]))];

        let (since_id, media, failures) = collect_retweets(1, pages, false, &FakeHost::default());

        assert_eq!(since_id, 13);
        assert_eq!(ids(&media), vec!["3"]);
        assert!(failures.is_empty());
    }

    #[test]
    fn retweet_cycles_use_since_id() {
        let source = FakeSource {
            timeline: vec![
                vec![retweet(20, photo_post(2, "https://x/2.jpg")), post(15, json!({}))],
                vec![retweet(10, photo_post(1, "https://x/1.jpg"))],
            ],
            ..Default::default()
        };
        let host = FakeHost::default();
        let settings = settings("rt");

        let (cursor, cycle) = poll(PollCursor::default(), &source, &host, "acc", &settings);
        assert_eq!(ids(&cycle.delivered), vec!["1", "2"]);
        assert_eq!(cursor.since_id, 20);

        let (cursor, cycle) = poll(cursor, &source, &host, "acc", &settings);
        assert!(cycle.delivered.is_empty());
        assert_eq!(cursor.since_id, 20);

        let queries = source.queries.borrow();
        assert_eq!(queries[0].1.since_id, Some(1));
        assert_eq!(queries[1].1.since_id, Some(20));
        assert_eq!(queries[1].1.page_size, 200);
    }

    #[test]
    fn combined_delivery_is_union() {
        let source = FakeSource {
            favorites: vec![vec![photo_post(1, "https://x/1.jpg")]],
            timeline: vec![vec![retweet(20, photo_post(2, "https://x/2.jpg"))]],
            ..Default::default()
        };

        let (cursor, cycle) = poll(PollCursor::default(), &source, &FakeHost::default(), "acc", &settings("fav,rt"));

        assert_eq!(ids(&cycle.delivered), vec!["1", "2"]);
        assert_eq!(ids(&cursor.favorites), vec!["1"]);
        assert_eq!(cursor.since_id, 20);
    }

    #[test]
    fn page_limit_is_respected() {
        let source = FakeSource {
            timeline: vec![
                vec![retweet(30, photo_post(3, "https://x/3.jpg"))],
                vec![retweet(20, photo_post(2, "https://x/2.jpg"))],
            ],
            ..Default::default()
        };
        let settings = PollSettings {
            page_limit: 1,
            ..settings("rt")
        };

        let (cursor, cycle) = poll(PollCursor::default(), &source, &FakeHost::default(), "acc", &settings);

        assert_eq!(ids(&cycle.delivered), vec!["3"]);
        assert_eq!(cursor.since_id, 30);
    }

    #[test]
    fn failing_source_keeps_earlier_pages() {
        let source = FakeSource {
            timeline: vec![
                vec![retweet(30, photo_post(3, "https://x/3.jpg"))],
                vec![retweet(20, photo_post(2, "https://x/2.jpg"))],
            ],
            fail_after: Some(1),
            ..Default::default()
        };

        let (cursor, cycle) = poll(PollCursor::default(), &source, &FakeHost::default(), "acc", &settings("rt"));

        assert_eq!(ids(&cycle.delivered), vec!["3"]);
        assert_eq!(cursor.since_id, 30);
    }
}
