use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::{Adapter, Comment, Page, Post, SortingOption, SourceError, SourcePrefix};
use crate::http::{get_json, Fetch};
use crate::text::html_to_text;

pub const HN_API_BASE: &str = "https://hacker-news.firebaseio.com/v0";
pub const HN_ITEM_URL: &str = "https://news.ycombinator.com/item";
pub const HN_USER_URL: &str = "https://news.ycombinator.com/user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StoryType {
    Top,
    New,
    Best,
    Ask,
    Show,
    Job,
}

impl StoryType {
    pub fn from_feed(feed: &str) -> Option<Self> {
        match feed.trim().to_ascii_lowercase().as_str() {
            "top" | "news" | "" => Some(StoryType::Top),
            "new" | "newest" => Some(StoryType::New),
            "best" => Some(StoryType::Best),
            "ask" => Some(StoryType::Ask),
            "show" => Some(StoryType::Show),
            "job" | "jobs" => Some(StoryType::Job),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoryType::Top => "topstories",
            StoryType::New => "newstories",
            StoryType::Best => "beststories",
            StoryType::Ask => "askstories",
            StoryType::Show => "showstories",
            StoryType::Job => "jobstories",
        }
    }

    pub fn feed_name(&self) -> &'static str {
        match self {
            StoryType::Top => "top",
            StoryType::New => "new",
            StoryType::Best => "best",
            StoryType::Ask => "ask",
            StoryType::Show => "show",
            StoryType::Job => "jobs",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StoryType::Top => "Top",
            StoryType::New => "New",
            StoryType::Best => "Best",
            StoryType::Ask => "Ask HN",
            StoryType::Show => "Show HN",
            StoryType::Job => "Jobs",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub dead: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub parent: Option<i64>,
    #[serde(default)]
    pub kids: Option<Vec<i64>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub descendants: Option<i64>,
}

impl Item {
    fn is_story(&self) -> bool {
        matches!(self.item_type.as_str(), "story" | "job" | "poll")
    }

    fn is_visible(&self) -> bool {
        !self.dead && !self.deleted
    }

    fn permalink(&self) -> String {
        format!("{}?id={}", HN_ITEM_URL, self.id)
    }

    fn into_post(self, story_type: StoryType) -> Post<Item> {
        let author = self.by.clone().unwrap_or_default();
        let permalink = self.permalink();
        let url = self.url.clone().unwrap_or_else(|| permalink.clone());
        let domain = self
            .url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
            .unwrap_or_else(|| "news.ycombinator.com".to_string());
        Post {
            is_self: self.url.is_none(),
            url,
            title: self.title.clone().unwrap_or_default(),
            author_url: format!("{HN_USER_URL}?id={author}"),
            author,
            created_at: self.time.unwrap_or(0),
            feed: story_type.display_name().to_string(),
            domain,
            score: Some(self.score.unwrap_or(0)),
            num_comments: self.descendants.unwrap_or(0),
            is_gallery: false,
            num_gallery_images: 0,
            body: self.text.as_deref().map(html_to_text).unwrap_or_default(),
            raw: self,
        }
    }
}

pub struct HackerNewsSource {
    fetch: Arc<dyn Fetch>,
    feed: String,
    story_type: Option<StoryType>,
    page_size: usize,
    base_url: String,
}

impl HackerNewsSource {
    pub fn new(fetch: Arc<dyn Fetch>, feed: &str, page_size: usize) -> Self {
        let story_type = StoryType::from_feed(feed);
        Self {
            fetch,
            feed: story_type
                .map(|kind| kind.feed_name().to_string())
                .unwrap_or_else(|| feed.trim().to_string()),
            story_type,
            page_size: page_size.max(1),
            base_url: HN_API_BASE.to_string(),
        }
    }

    /// Points the client at another Firebase-compatible API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn story_type(&self) -> Result<StoryType, SourceError> {
        self.story_type.ok_or_else(|| {
            SourceError::NotFound(format!(
                "hackernews feed {:?} does not exist; try top, new, best, ask, show or jobs",
                self.feed
            ))
        })
    }

    fn item_url(&self, id: i64) -> String {
        format!("{}/item/{}.json", self.base_url, id)
    }

    /// Fetches items concurrently, preserving the order of `ids`. Deleted
    /// items come back as `null` and are skipped.
    fn get_items(&self, ids: &[i64]) -> Vec<Result<Option<Item>, SourceError>> {
        thread::scope(|scope| {
            let handles: Vec<_> = ids
                .iter()
                .map(|id| {
                    let url = self.item_url(*id);
                    scope.spawn(move || get_json::<Option<Item>>(self.fetch.as_ref(), &url, None))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(SourceError::UpstreamUnavailable("item worker panicked".into()))
                    })
                })
                .collect()
        })
    }

    fn comment_tree(&self, ids: &[i64]) -> Vec<Comment> {
        let items = self.get_items(ids);
        let visible: Vec<Item> = items
            .into_iter()
            .filter_map(|result| match result {
                Ok(item) => item,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable comment");
                    None
                }
            })
            .filter(|item| item.item_type == "comment" && item.is_visible())
            .collect();
        visible
            .into_iter()
            .map(|item| {
                let replies = item
                    .kids
                    .as_deref()
                    .map(|kids| self.comment_tree(kids))
                    .unwrap_or_default();
                let author = item.by.clone().unwrap_or_default();
                Comment {
                    url: item.permalink(),
                    author_url: format!("{HN_USER_URL}?id={author}"),
                    author,
                    created_at: item.time.unwrap_or(0),
                    score: None,
                    body: item.text.as_deref().map(html_to_text).unwrap_or_default(),
                    replies,
                }
            })
            .collect()
    }
}

impl Adapter for HackerNewsSource {
    type Raw = Item;

    fn get_posts(&self, cursor: Option<&str>) -> Result<Page<Post<Item>>, SourceError> {
        let story_type = self.story_type()?;
        let start = match cursor {
            None => 0,
            Some(offset) => offset.parse::<usize>().map_err(|_| {
                SourceError::MalformedResponse(format!("hackernews: invalid offset cursor {offset:?}"))
            })?,
        };
        let url = format!("{}/{}.json", self.base_url, story_type.as_str());
        let ids: Vec<i64> = get_json(self.fetch.as_ref(), &url, None)?;

        let start = start.min(ids.len());
        let end = std::cmp::min(start + self.page_size, ids.len());
        debug!(story_type = story_type.as_str(), start, end, total = ids.len(), "loading stories");

        let mut stories = Vec::with_capacity(end - start);
        let mut first_error = None;
        for result in self.get_items(&ids[start..end]) {
            match result {
                Ok(Some(item)) if item.is_story() && item.is_visible() => {
                    stories.push(item.into_post(story_type));
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "skipping unreadable story");
                    first_error.get_or_insert(err);
                }
            }
        }
        if stories.is_empty() {
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        let next = if end < ids.len() {
            Some(end.to_string())
        } else {
            None
        };
        Ok(Page::new(stories, next))
    }

    fn get_comments(&self, post: &Post<Item>) -> Result<Vec<Comment>, SourceError> {
        // The listing copy of the story may be stale, so re-read its kids.
        let item: Option<Item> = get_json(self.fetch.as_ref(), &self.item_url(post.raw.id), None)?;
        let item = item.ok_or_else(|| SourceError::NotFound(post.raw.permalink()))?;
        Ok(item
            .kids
            .as_deref()
            .map(|kids| self.comment_tree(kids))
            .unwrap_or_default())
    }

    fn feed(&self) -> &str {
        &self.feed
    }

    fn prefix(&self) -> SourcePrefix {
        SourcePrefix::HackerNews
    }

    fn sorting_options(&self) -> &'static [SortingOption] {
        &[]
    }
}
