//! Platform adapters and the paging contract they share.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::FeedsConfig;
use crate::http::Fetch;
use crate::route::Route;

pub mod composite;
pub mod hackernews;
pub mod mastodon;
pub mod reddit;
pub mod rss;
pub mod tree;
pub mod youtube;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::UpstreamUnavailable(_))
    }
}

/// One page of results. `next == None` means the sequence is exhausted.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
    /// Sub-feeds of a composite feed that failed while others succeeded.
    pub failures: Vec<SourceError>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next: Option<String>) -> Self {
        Self {
            items,
            next,
            failures: Vec::new(),
        }
    }

    pub fn end() -> Self {
        Self::new(Vec::new(), None)
    }

    pub fn is_exhausted(&self) -> bool {
        self.next.is_none()
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next: self.next,
            failures: self.failures,
        }
    }
}

/// A post normalized across platforms. `raw` is the adapter's own record and
/// is only ever read by the adapter that produced it.
#[derive(Debug, Clone)]
pub struct Post<R> {
    pub url: String,
    pub title: String,
    pub author: String,
    pub author_url: String,
    pub created_at: i64,
    pub feed: String,
    pub domain: String,
    pub score: Option<i64>,
    pub num_comments: i64,
    pub is_self: bool,
    pub is_gallery: bool,
    pub num_gallery_images: usize,
    pub body: String,
    pub raw: R,
}

impl<R> Post<R> {
    pub fn map_raw<U, F: FnOnce(R) -> U>(self, f: F) -> Post<U> {
        Post {
            url: self.url,
            title: self.title,
            author: self.author,
            author_url: self.author_url,
            created_at: self.created_at,
            feed: self.feed,
            domain: self.domain,
            score: self.score,
            num_comments: self.num_comments,
            is_self: self.is_self,
            is_gallery: self.is_gallery,
            num_gallery_images: self.num_gallery_images,
            body: self.body,
            raw: f(self.raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub url: String,
    pub author: String,
    pub author_url: String,
    pub created_at: i64,
    pub score: Option<i64>,
    pub body: String,
    pub replies: Vec<Comment>,
}

impl Comment {
    pub fn count(&self) -> usize {
        1 + self.replies.iter().map(Comment::count).sum::<usize>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortingOption {
    pub value: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourcePrefix {
    Reddit,
    HackerNews,
    Rss,
    YouTube,
    Mastodon,
}

impl SourcePrefix {
    pub const ALL: [SourcePrefix; 5] = [
        SourcePrefix::Reddit,
        SourcePrefix::HackerNews,
        SourcePrefix::Rss,
        SourcePrefix::YouTube,
        SourcePrefix::Mastodon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourcePrefix::Reddit => "r/",
            SourcePrefix::HackerNews => "hn/",
            SourcePrefix::Rss => "rss/",
            SourcePrefix::YouTube => "yt/",
            SourcePrefix::Mastodon => "m/",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourcePrefix::Reddit => "Reddit",
            SourcePrefix::HackerNews => "Hackernews",
            SourcePrefix::Rss => "RSS",
            SourcePrefix::YouTube => "YouTube",
            SourcePrefix::Mastodon => "Mastodon",
        }
    }

    /// Parses the leading route token, without the slash.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|prefix| prefix.as_str().trim_end_matches('/') == token)
    }
}

/// The capability every platform adapter implements.
pub trait Adapter: Send + Sync {
    type Raw: Clone + Send + 'static;

    /// Fetches the page after `cursor`; `None` starts from the beginning.
    fn get_posts(&self, cursor: Option<&str>) -> Result<Page<Post<Self::Raw>>, SourceError>;

    /// The full reply tree of one post.
    fn get_comments(&self, post: &Post<Self::Raw>) -> Result<Vec<Comment>, SourceError>;

    fn feed(&self) -> &str;

    fn prefix(&self) -> SourcePrefix;

    fn sorting_options(&self) -> &'static [SortingOption] {
        &[]
    }

    fn sorting(&self) -> &str {
        ""
    }
}

#[derive(Debug, Clone)]
pub enum RawPost {
    Reddit(reddit::RawPost),
    HackerNews(hackernews::Item),
    Rss(rss::FeedEntry),
    YouTube(youtube::Video),
    Mastodon(mastodon::RawStatus),
}

pub enum Source {
    Reddit(reddit::RedditSource),
    HackerNews(hackernews::HackerNewsSource),
    Rss(rss::RssSource),
    YouTube(youtube::YouTubeSource),
    Mastodon(mastodon::MastodonSource),
}

impl Source {
    pub fn open(route: &Route, fetch: Arc<dyn Fetch>, feeds: &FeedsConfig) -> Self {
        let feed = route.feed.clone();
        let sorting = route.sorting.clone();
        match route.prefix {
            SourcePrefix::Reddit => {
                Source::Reddit(reddit::RedditSource::new(fetch, feed, sorting.as_deref()))
            }
            SourcePrefix::HackerNews => Source::HackerNews(hackernews::HackerNewsSource::new(
                fetch,
                &feed,
                feeds.page_size,
            )),
            SourcePrefix::Rss => Source::Rss(rss::RssSource::new(fetch, feed)),
            SourcePrefix::YouTube => Source::YouTube(youtube::YouTubeSource::new(fetch, feed)),
            SourcePrefix::Mastodon => Source::Mastodon(mastodon::MastodonSource::new(
                fetch,
                feed,
                feeds.mastodon_only_roots,
            )),
        }
    }
}

impl Adapter for Source {
    type Raw = RawPost;

    fn get_posts(&self, cursor: Option<&str>) -> Result<Page<Post<RawPost>>, SourceError> {
        Ok(match self {
            Source::Reddit(s) => s
                .get_posts(cursor)?
                .map(|post| post.map_raw(RawPost::Reddit)),
            Source::HackerNews(s) => s
                .get_posts(cursor)?
                .map(|post| post.map_raw(RawPost::HackerNews)),
            Source::Rss(s) => s.get_posts(cursor)?.map(|post| post.map_raw(RawPost::Rss)),
            Source::YouTube(s) => s
                .get_posts(cursor)?
                .map(|post| post.map_raw(RawPost::YouTube)),
            Source::Mastodon(s) => s
                .get_posts(cursor)?
                .map(|post| post.map_raw(RawPost::Mastodon)),
        })
    }

    fn get_comments(&self, post: &Post<RawPost>) -> Result<Vec<Comment>, SourceError> {
        let post = post.clone();
        match (self, &post.raw) {
            (Source::Reddit(s), RawPost::Reddit(_)) => {
                s.get_comments(&post.map_raw(|raw| match raw {
                    RawPost::Reddit(raw) => raw,
                    _ => unreachable!(),
                }))
            }
            (Source::HackerNews(s), RawPost::HackerNews(_)) => {
                s.get_comments(&post.map_raw(|raw| match raw {
                    RawPost::HackerNews(raw) => raw,
                    _ => unreachable!(),
                }))
            }
            (Source::Rss(s), RawPost::Rss(_)) => s.get_comments(&post.map_raw(|raw| match raw {
                RawPost::Rss(raw) => raw,
                _ => unreachable!(),
            })),
            (Source::YouTube(s), RawPost::YouTube(_)) => {
                s.get_comments(&post.map_raw(|raw| match raw {
                    RawPost::YouTube(raw) => raw,
                    _ => unreachable!(),
                }))
            }
            (Source::Mastodon(s), RawPost::Mastodon(_)) => {
                s.get_comments(&post.map_raw(|raw| match raw {
                    RawPost::Mastodon(raw) => raw,
                    _ => unreachable!(),
                }))
            }
            (source, raw) => unreachable!(
                "{} source handed a post from another platform: {:?}",
                source.prefix().label(),
                std::mem::discriminant(raw)
            ),
        }
    }

    fn feed(&self) -> &str {
        match self {
            Source::Reddit(s) => s.feed(),
            Source::HackerNews(s) => s.feed(),
            Source::Rss(s) => s.feed(),
            Source::YouTube(s) => s.feed(),
            Source::Mastodon(s) => s.feed(),
        }
    }

    fn prefix(&self) -> SourcePrefix {
        match self {
            Source::Reddit(s) => s.prefix(),
            Source::HackerNews(s) => s.prefix(),
            Source::Rss(s) => s.prefix(),
            Source::YouTube(s) => s.prefix(),
            Source::Mastodon(s) => s.prefix(),
        }
    }

    fn sorting_options(&self) -> &'static [SortingOption] {
        match self {
            Source::Reddit(s) => s.sorting_options(),
            Source::HackerNews(s) => s.sorting_options(),
            Source::Rss(s) => s.sorting_options(),
            Source::YouTube(s) => s.sorting_options(),
            Source::Mastodon(s) => s.sorting_options(),
        }
    }

    fn sorting(&self) -> &str {
        match self {
            Source::Reddit(s) => s.sorting(),
            Source::HackerNews(s) => s.sorting(),
            Source::Rss(s) => s.sorting(),
            Source::YouTube(s) => s.sorting(),
            Source::Mastodon(s) => s.sorting(),
        }
    }
}
