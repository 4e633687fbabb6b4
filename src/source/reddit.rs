use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{Adapter, Comment, Page, Post, SortingOption, SourceError, SourcePrefix};
use crate::http::{get_json, Fetch};
use crate::text::html_to_text;

pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com";
const DEFAULT_SORTING: &str = "hot";

pub const SORTING_OPTIONS: [SortingOption; 8] = [
    SortingOption { value: "hot", label: "Hot" },
    SortingOption { value: "new", label: "New" },
    SortingOption { value: "rising", label: "Rising" },
    SortingOption { value: "top-today", label: "Top today" },
    SortingOption { value: "top-week", label: "Top week" },
    SortingOption { value: "top-month", label: "Top month" },
    SortingOption { value: "top-year", label: "Top year" },
    SortingOption { value: "top-alltime", label: "Top all time" },
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing<T> {
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
    pub children: Vec<Thing<T>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thing<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListingEnvelope<T> {
    kind: String,
    data: Listing<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPost {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub selftext_html: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub is_gallery: bool,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub post_hint: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub media_metadata: Option<HashMap<String, MediaMetadata>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MediaMetadata {
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "p")]
    pub preview: Vec<MediaMetadataImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MediaMetadataImage {
    #[serde(default, rename = "u")]
    pub url: String,
    #[serde(default, rename = "x")]
    pub width: i64,
    #[serde(default, rename = "y")]
    pub height: i64,
}

impl RawPost {
    fn gallery_images(&self) -> usize {
        if !self.is_gallery {
            return 0;
        }
        self.media_metadata
            .as_ref()
            .map(|meta| meta.values().filter(|m| !m.preview.is_empty()).count())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RawComment {
    pub id: String,
    pub author: Option<String>,
    pub body_html: String,
    pub score: i64,
    pub permalink: String,
    pub created_utc: f64,
    pub replies: Option<Box<Listing<RawComment>>>,
}

impl<'de> Deserialize<'de> for RawComment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct CommentHelper {
            #[serde(default)]
            id: String,
            #[serde(default)]
            author: Option<String>,
            #[serde(default)]
            body_html: String,
            #[serde(default)]
            score: i64,
            #[serde(default)]
            permalink: String,
            #[serde(default)]
            created_utc: f64,
            #[serde(default)]
            replies: Value,
        }

        let helper = CommentHelper::deserialize(deserializer)?;
        // Leaf comments carry `"replies": ""` instead of an empty listing.
        let replies = if helper.replies.is_null() || helper.replies == "" {
            None
        } else {
            serde_json::from_value::<ListingEnvelope<RawComment>>(helper.replies)
                .ok()
                .map(|listing| Box::new(listing.data))
        };
        Ok(RawComment {
            id: helper.id,
            author: helper.author,
            body_html: helper.body_html,
            score: helper.score,
            permalink: helper.permalink,
            created_utc: helper.created_utc,
            replies,
        })
    }
}

pub struct RedditSource {
    fetch: Arc<dyn Fetch>,
    subreddit: String,
    sorting: String,
    base_url: String,
}

impl RedditSource {
    pub fn new(fetch: Arc<dyn Fetch>, subreddit: String, sorting: Option<&str>) -> Self {
        let subreddit = subreddit.trim().trim_start_matches("r/").to_string();
        let subreddit = if subreddit.is_empty() {
            "all".to_string()
        } else {
            subreddit
        };
        let sorting = sorting
            .filter(|s| SORTING_OPTIONS.iter().any(|option| option.value == *s))
            .unwrap_or(DEFAULT_SORTING)
            .to_string();
        Self {
            fetch,
            subreddit,
            sorting,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `top-week` -> `top`
    fn sorting_fragment(&self) -> &str {
        self.sorting.split('-').next().unwrap_or(DEFAULT_SORTING)
    }

    /// `top-week` -> `Some("week")`
    fn sorting_parameter(&self) -> Option<&str> {
        self.sorting.split_once('-').map(|(_, range)| range)
    }

    fn listing_url(&self, cursor: Option<&str>) -> Result<Url, SourceError> {
        let path = format!(
            "{}/r/{}/{}/.json",
            self.base_url,
            self.subreddit,
            self.sorting_fragment()
        );
        let mut url = Url::parse(&path)
            .map_err(|err| SourceError::NotFound(format!("r/{}: {err}", self.subreddit)))?;
        let mut params = Vec::new();
        if let Some(range) = self.sorting_parameter() {
            params.push(("t", range));
        }
        if let Some(after) = cursor {
            params.push(("after", after));
        }
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn convert_post(raw: RawPost) -> Post<RawPost> {
        let author = raw.author.clone().unwrap_or_default();
        let body = if raw.is_self {
            raw.selftext_html.as_deref().map(html_to_text).unwrap_or_default()
        } else {
            String::new()
        };
        Post {
            url: raw.url.clone(),
            title: html_to_text(&raw.title),
            author_url: format!("https://www.reddit.com/u/{author}"),
            author,
            created_at: raw.created_utc as i64,
            feed: raw.subreddit.clone(),
            domain: raw.domain.clone(),
            score: Some(raw.score),
            num_comments: raw.num_comments,
            is_self: raw.is_self,
            is_gallery: raw.is_gallery,
            num_gallery_images: raw.gallery_images(),
            body,
            raw,
        }
    }

    fn convert_comment(&self, raw: RawComment) -> Option<Comment> {
        let author = raw.author?;
        let replies = raw
            .replies
            .map(|listing| {
                listing
                    .children
                    .into_iter()
                    .filter_map(|thing| self.convert_comment(thing.data))
                    .collect()
            })
            .unwrap_or_default();
        Some(Comment {
            url: format!("{}{}", self.base_url, raw.permalink),
            author_url: format!("https://www.reddit.com/u/{author}"),
            author,
            created_at: raw.created_utc as i64,
            score: Some(raw.score),
            body: html_to_text(&raw.body_html),
            replies,
        })
    }
}

impl Adapter for RedditSource {
    type Raw = RawPost;

    fn get_posts(&self, cursor: Option<&str>) -> Result<Page<Post<RawPost>>, SourceError> {
        let url = self.listing_url(cursor)?;
        debug!(subreddit = %self.subreddit, sorting = %self.sorting, ?cursor, "loading reddit listing");
        let value: Value = get_json(self.fetch.as_ref(), url.as_str(), None).map_err(|err| match err {
            SourceError::NotFound(_) => SourceError::NotFound(format!(
                "could not load subreddit 'r/{}', it may not exist",
                self.subreddit
            )),
            other => other,
        })?;
        let listing: ListingEnvelope<RawPost> = serde_json::from_value(value).map_err(|err| {
            SourceError::MalformedResponse(format!(
                "could not load posts for subreddit r/{}: {err}",
                self.subreddit
            ))
        })?;

        let posts = listing
            .data
            .children
            .into_iter()
            .map(|thing| thing.data)
            .filter(|raw| raw.author.is_some())
            .map(Self::convert_post)
            .collect();
        Ok(Page::new(posts, listing.data.after.filter(|a| !a.is_empty())))
    }

    fn get_comments(&self, post: &Post<RawPost>) -> Result<Vec<Comment>, SourceError> {
        let permalink = post.raw.permalink.trim_end_matches('/');
        let url = format!("{}{}/.json", self.base_url, permalink);
        let payload: Vec<Value> = get_json(self.fetch.as_ref(), &url, None)?;
        if payload.len() < 2 {
            return Err(SourceError::MalformedResponse(format!(
                "could not load comments for {permalink}"
            )));
        }
        let listing: ListingEnvelope<RawComment> = serde_json::from_value(payload[1].clone())
            .map_err(|err| SourceError::MalformedResponse(format!("{permalink}: {err}")))?;
        Ok(listing
            .data
            .children
            .into_iter()
            .filter_map(|thing| self.convert_comment(thing.data))
            .collect())
    }

    fn feed(&self) -> &str {
        &self.subreddit
    }

    fn prefix(&self) -> SourcePrefix {
        SourcePrefix::Reddit
    }

    fn sorting_options(&self) -> &'static [SortingOption] {
        &SORTING_OPTIONS
    }

    fn sorting(&self) -> &str {
        &self.sorting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::StubFetcher;

    const LISTING: &str = r#"{
        "kind": "Listing",
        "data": {
            "after": "t3_b",
            "children": [
                {"kind": "t3", "data": {
                    "id": "a", "title": "Self &amp; text", "subreddit": "rust",
                    "author": "ferris", "is_self": true,
                    "selftext_html": "&lt;div class=\"md\"&gt;&lt;p&gt;body&lt;/p&gt;&lt;/div&gt;",
                    "permalink": "/r/rust/comments/a/self_text/", "score": 10,
                    "num_comments": 2, "created_utc": 1700000000.0
                }},
                {"kind": "t3", "data": {"id": "promo", "title": "no author"}},
                {"kind": "t3", "data": {
                    "id": "b", "title": "Gallery", "subreddit": "rust", "author": "crab",
                    "is_gallery": true, "url": "https://www.reddit.com/gallery/b",
                    "media_metadata": {
                        "x": {"status": "valid", "p": [{"u": "https://i/1", "x": 108, "y": 80}]},
                        "y": {"status": "failed"}
                    }
                }}
            ]
        }
    }"#;

    fn source(stub: StubFetcher, sorting: Option<&str>) -> (Arc<StubFetcher>, RedditSource) {
        let stub = Arc::new(stub);
        let source = RedditSource::new(stub.clone(), "rust".into(), sorting);
        (stub, source)
    }

    #[test]
    fn converts_listing_and_skips_authorless_entries() {
        let (_, source) = source(
            StubFetcher::default().with("https://www.reddit.com/r/rust/hot/.json", LISTING),
            None,
        );
        let page = source.get_posts(None).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next.as_deref(), Some("t3_b"));
        let first = &page.items[0];
        assert_eq!(first.title, "Self & text");
        assert_eq!(first.body, "body");
        assert_eq!(first.author_url, "https://www.reddit.com/u/ferris");
        assert_eq!(page.items[1].num_gallery_images, 1);
    }

    #[test]
    fn sorting_becomes_path_and_range() {
        let (stub, source) = source(StubFetcher::default(), Some("top-week"));
        let _ = source.get_posts(Some("t3_x"));
        assert_eq!(
            stub.requests(),
            vec!["https://www.reddit.com/r/rust/top/.json?t=week&after=t3_x".to_string()]
        );
    }

    #[test]
    fn base_url_override_reaches_listing_and_comment_links() {
        let stub = Arc::new(StubFetcher::default().with(
            "http://127.0.0.1:9/r/rust/hot/.json",
            LISTING,
        ));
        let source =
            RedditSource::new(stub.clone(), "rust".into(), None).with_base_url("http://127.0.0.1:9/");
        let page = source.get_posts(None).unwrap();
        assert_eq!(page.items.len(), 2);
        let _ = source.get_comments(&page.items[0]);
        assert_eq!(
            stub.requests(),
            vec![
                "http://127.0.0.1:9/r/rust/hot/.json".to_string(),
                "http://127.0.0.1:9/r/rust/comments/a/self_text/.json".to_string(),
            ]
        );
    }

    #[test]
    fn unknown_sorting_falls_back_to_hot() {
        let (_, source) = source(StubFetcher::default(), Some("controversial"));
        assert_eq!(source.sorting(), "hot");
    }

    #[test]
    fn missing_subreddit_is_not_found() {
        let (_, source) = source(StubFetcher::default(), None);
        let err = source.get_posts(None).unwrap_err();
        assert!(matches!(err, SourceError::NotFound(msg) if msg.contains("r/rust")));
    }

    #[test]
    fn shape_mismatch_is_malformed() {
        let (_, source) = source(
            StubFetcher::default().with("https://www.reddit.com/r/rust/hot/.json", r#"{"error": 403}"#),
            None,
        );
        assert!(matches!(
            source.get_posts(None),
            Err(SourceError::MalformedResponse(_))
        ));
    }

    #[test]
    fn end_of_listing_is_empty_final_page() {
        let (_, source) = source(
            StubFetcher::default().with(
                "https://www.reddit.com/r/rust/hot/.json?after=t3_z",
                r#"{"kind": "Listing", "data": {"after": null, "children": []}}"#,
            ),
            None,
        );
        let page = source.get_posts(Some("t3_z")).unwrap();
        assert!(page.items.is_empty());
        assert!(page.is_exhausted());
    }

    #[test]
    fn nested_comments_skip_more_stubs() {
        let comments = r#"[
            {"kind": "Listing", "data": {"after": null, "children": []}},
            {"kind": "Listing", "data": {"after": null, "children": [
                {"kind": "t1", "data": {
                    "id": "c1", "author": "ferris", "body_html": "&lt;p&gt;top&lt;/p&gt;",
                    "permalink": "/r/rust/comments/a/x/c1/", "score": 3, "created_utc": 1.0,
                    "replies": {"kind": "Listing", "data": {"after": null, "children": [
                        {"kind": "t1", "data": {"id": "c2", "author": "crab", "body_html": "reply", "replies": ""}},
                        {"kind": "more", "data": {"id": "c3", "count": 4}}
                    ]}}
                }}
            ]}}
        ]"#;
        let (_, source) = source(
            StubFetcher::default()
                .with("https://www.reddit.com/r/rust/hot/.json", LISTING)
                .with("https://www.reddit.com/r/rust/comments/a/self_text/.json", comments),
            None,
        );
        let post = source.get_posts(None).unwrap().items.remove(0);
        let tree = source.get_comments(&post).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].body, "top");
        assert_eq!(tree[0].url, "https://www.reddit.com/r/rust/comments/a/x/c1/");
        assert_eq!(tree[0].replies.len(), 1);
        assert_eq!(tree[0].replies[0].author, "crab");
    }
}
