use std::{thread, time::Duration};

use reqwest::{blocking::Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    oauth::{Credentials, Nonce},
    Feed, Page, PageQuery, PostSource, SourceError,
};

const API_BASE: &str = "https://api.twitter.com/1.1";
/// Statuses worth another try.
const RETRY_STATUSES: [u16; 2] = [500, 503];
/// Used when 429 comes without `x-rate-limit-reset`.
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(15 * 60);
const RATE_LIMIT_SLACK: Duration = Duration::from_secs(5);

pub struct TwitterClient {
    credentials: Credentials,
    http: Client,
    api_base: String,
    pub retry_count: u32,
    pub retry_delay: Duration,
}

/// Iterates pages of one feed going back in time with `max_id`.
/// `fetch` gets the `max_id` of the page to request.
struct PageCursor<F> {
    fetch: F,
    page_limit: u32,
    max_id: Option<u64>,
    fetched: u32,
    done: bool,
}

impl TwitterClient {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            http: Client::new(),
            api_base: API_BASE.into(),
            retry_count: 3,
            retry_delay: Duration::from_secs(5),
        }
    }

    fn endpoint(&self, feed: Feed) -> String {
        match feed {
            Feed::Timeline => format!("{}/statuses/user_timeline.json", self.api_base),
            Feed::Favorites => format!("{}/favorites/list.json", self.api_base),
        }
    }

    /// Fetch single page, waiting out rate limits and retrying 5xx.
    pub fn fetch_page(
        &self,
        feed: Feed,
        account: &str,
        query: &PageQuery,
        max_id: Option<u64>,
    ) -> Result<Vec<Value>, SourceError> {
        let url = self.endpoint(feed);

        let account_key = if account.chars().all(|c| c.is_ascii_digit()) {
            "user_id"
        } else {
            "screen_name"
        };
        let count = query.page_size.to_string();
        let since_id = query.since_id.filter(|_| feed == Feed::Timeline).map(|v| v.to_string());
        let max_id = max_id.map(|v| v.to_string());

        let mut params = vec![
            (account_key, account),
            ("count", count.as_str()),
            ("tweet_mode", "extended"),
        ];
        if let Some(v) = &since_id {
            params.push(("since_id", v.as_str()));
        }
        if let Some(v) = &max_id {
            params.push(("max_id", v.as_str()));
        }

        let mut attempt = 0;
        loop {
            let auth = self
                .credentials
                .authorization("GET", &url, &params, &Nonce::generate());

            debug!(%url, ?params, attempt, "fetching page");
            let res = self
                .http
                .get(&url)
                .query(&params)
                .header("Authorization", auth)
                .send()?;

            let status = res.status();
            if status.is_success() {
                return Ok(serde_json::from_str(&res.text()?)?);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = rate_limit_wait(
                    res.headers()
                        .get("x-rate-limit-reset")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok()),
                    chrono::Utc::now().timestamp(),
                );
                warn!(wait_secs = wait.as_secs(), "rate limited, waiting");
                thread::sleep(wait);
                continue;
            }

            if RETRY_STATUSES.contains(&status.as_u16()) && attempt < self.retry_count {
                attempt += 1;
                warn!(status = status.as_u16(), attempt, "server error, retrying");
                thread::sleep(self.retry_delay);
                continue;
            }

            return Err(SourceError::Api {
                status: status.as_u16(),
                message: res.text().unwrap_or_default(),
            });
        }
    }
}

/// How long to sleep after 429, given `x-rate-limit-reset` unix time.
fn rate_limit_wait(reset: Option<i64>, now: i64) -> Duration {
    match reset {
        Some(reset) => Duration::from_secs(reset.saturating_sub(now).max(0) as u64) + RATE_LIMIT_SLACK,
        None => RATE_LIMIT_WINDOW,
    }
}

impl PostSource for TwitterClient {
    fn fetch_pages<'a>(
        &'a self,
        feed: Feed,
        account: &'a str,
        query: PageQuery,
    ) -> Box<dyn Iterator<Item = Result<Page, SourceError>> + 'a> {
        Box::new(PageCursor::new(query.page_limit, move |max_id| {
            self.fetch_page(feed, account, &query, max_id)
        }))
    }
}

impl<F> PageCursor<F>
where
    F: FnMut(Option<u64>) -> Result<Vec<Value>, SourceError>,
{
    fn new(page_limit: u32, fetch: F) -> Self {
        Self {
            fetch,
            page_limit,
            max_id: None,
            fetched: 0,
            done: false,
        }
    }
}

impl<F> Iterator for PageCursor<F>
where
    F: FnMut(Option<u64>) -> Result<Vec<Value>, SourceError>,
{
    type Item = Result<Page, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.fetched >= self.page_limit {
            return None;
        }

        let posts = match (self.fetch)(self.max_id) {
            Ok(v) => v,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let page = Page::new(posts);
        self.fetched += 1;

        match page.min_id() {
            Some(0) | None => {
                self.done = true;
                if page.posts.is_empty() {
                    return None;
                }
            }
            Some(min) => self.max_id = Some(min - 1),
        }

        Some(Ok(page))
    }
}
