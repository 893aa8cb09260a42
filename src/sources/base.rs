use serde_json::Value;
use thiserror::Error;

/// Which list of an account to page through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// Account's own timeline, retweets included. Honours `since_id`.
    Timeline,
    /// Posts the account has favorited.
    Favorites,
}

/// Paging parameters for one [`PostSource::fetch_pages`] call.
#[derive(Debug, Clone, Copy)]
pub struct PageQuery {
    /// Maximum pages to fetch
    pub page_limit: u32,
    /// Posts requested per page
    pub page_size: u32,
    /// Only posts with greater id are fetched. Ignored for favorites
    pub since_id: Option<u64>,
}

/// One page of raw posts.
///
/// Posts are kept as raw json so a single malformed post can be
/// rejected on its own without losing the rest of the page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub posts: Vec<Value>,
    /// Greatest numeric `id` in this page, 0 if none.
    pub max_id: u64,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse page: {0}")]
    Scheme(#[from] serde_json::Error),
    #[error("API returned error {status}: {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("media host returned status {0}")]
    Status(u16),
}

/// Paginated access to an account's posts.
pub trait PostSource {
    /// Lazily fetch pages, newest first.
    /// The iterator ends on pagination end or after `query.page_limit` pages.
    /// Rate limits must be waited out inside, not reported.
    fn fetch_pages<'a>(
        &'a self,
        feed: Feed,
        account: &'a str,
        query: PageQuery,
    ) -> Box<dyn Iterator<Item = Result<Page, SourceError>> + 'a>;
}

/// Resolves a link to the media hosting service into direct media urls.
pub trait MediaHostResolver {
    /// Returns empty vec if page has no media. Fails only if the page
    /// can't be fetched.
    fn resolve(&self, url: &str) -> Result<Vec<String>, ResolverError>;
}

impl Page {
    pub fn new(posts: Vec<Value>) -> Self {
        let max_id = posts
            .iter()
            .filter_map(|p| p.get("id").and_then(Value::as_u64))
            .max()
            .unwrap_or(0);

        Self { posts, max_id }
    }

    /// Smallest numeric id, used as pagination cursor.
    pub fn min_id(&self) -> Option<u64> {
        self.posts
            .iter()
            .filter_map(|p| p.get("id").and_then(Value::as_u64))
            .min()
    }
}
