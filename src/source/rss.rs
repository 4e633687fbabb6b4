use std::sync::Arc;

use chrono::DateTime;
use roxmltree::{Document, Node};
use tracing::debug;
use url::Url;

use super::composite::{self, SubCursor, SubPage};
use super::{Adapter, Comment, Page, Post, SourceError, SourcePrefix};
use crate::http::Fetch;
use crate::text::html_to_text;

/// One `<item>` or `<entry>`, whatever dialect it came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub link: String,
    pub author: String,
    pub published: i64,
    pub summary: String,
    pub feed_title: String,
    pub thumbnail: Option<String>,
    /// `yt:videoId`, only present in YouTube feeds.
    pub video_id: Option<String>,
    pub views: Option<i64>,
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_text(node: Node, name: &str) -> String {
    child(node, name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

fn parse_date(value: &str) -> i64 {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}

/// Parses RSS 2.0, RSS 1.0 (RDF) and Atom documents.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, SourceError> {
    let doc = Document::parse(xml).map_err(|err| SourceError::MalformedResponse(err.to_string()))?;
    let root = doc.root_element();
    match root.tag_name().name() {
        "feed" => Ok(parse_atom(root)),
        "rss" => {
            let channel = child(root, "channel")
                .ok_or_else(|| SourceError::MalformedResponse("rss without channel".into()))?;
            let feed_title = child_text(channel, "title");
            Ok(items(channel, &feed_title))
        }
        "RDF" => {
            let feed_title = child(root, "channel")
                .map(|channel| child_text(channel, "title"))
                .unwrap_or_default();
            Ok(items(root, &feed_title))
        }
        other => Err(SourceError::MalformedResponse(format!(
            "unsupported feed root <{other}>"
        ))),
    }
}

fn items(parent: Node, feed_title: &str) -> Vec<FeedEntry> {
    parent
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "item")
        .map(|item| {
            let link = child_text(item, "link");
            let guid = child_text(item, "guid");
            let published = match child_text(item, "pubDate") {
                date if !date.is_empty() => parse_date(&date),
                _ => parse_date(&child_text(item, "date")),
            };
            let author = match child_text(item, "creator") {
                creator if !creator.is_empty() => creator,
                _ => child_text(item, "author"),
            };
            let summary = match child_text(item, "encoded") {
                encoded if !encoded.is_empty() => encoded,
                _ => child_text(item, "description"),
            };
            let thumbnail = item
                .children()
                .find(|n| {
                    n.is_element()
                        && n.tag_name().name() == "enclosure"
                        && n.attribute("type").is_some_and(|t| t.starts_with("image/"))
                })
                .and_then(|n| n.attribute("url"))
                .map(str::to_string);
            FeedEntry {
                id: if guid.is_empty() { link.clone() } else { guid },
                title: child_text(item, "title"),
                link,
                author,
                published,
                summary,
                feed_title: feed_title.to_string(),
                thumbnail,
                ..FeedEntry::default()
            }
        })
        .collect()
}

fn atom_link(entry: Node) -> String {
    entry
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "link")
        .find(|n| matches!(n.attribute("rel"), None | Some("alternate")))
        .and_then(|n| n.attribute("href"))
        .unwrap_or_default()
        .to_string()
}

fn parse_atom(feed: Node) -> Vec<FeedEntry> {
    let feed_title = child_text(feed, "title");
    let feed_author = child(feed, "author")
        .map(|a| child_text(a, "name"))
        .unwrap_or_default();
    feed.children()
        .filter(|n| n.is_element() && n.tag_name().name() == "entry")
        .map(|entry| {
            let published = match child_text(entry, "published") {
                date if !date.is_empty() => parse_date(&date),
                _ => parse_date(&child_text(entry, "updated")),
            };
            let author = child(entry, "author")
                .map(|a| child_text(a, "name"))
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| feed_author.clone());
            let media = child(entry, "group");
            let summary = match child_text(entry, "content") {
                content if !content.is_empty() => content,
                _ => match child_text(entry, "summary") {
                    summary if !summary.is_empty() => summary,
                    _ => media.map(|m| child_text(m, "description")).unwrap_or_default(),
                },
            };
            let thumbnail = media
                .and_then(|m| child(m, "thumbnail"))
                .and_then(|t| t.attribute("url"))
                .map(str::to_string);
            let views = media
                .and_then(|m| child(m, "community"))
                .and_then(|c| child(c, "statistics"))
                .and_then(|s| s.attribute("views"))
                .and_then(|v| v.parse().ok());
            let video_id = Some(child_text(entry, "videoId")).filter(|id| !id.is_empty());
            FeedEntry {
                id: child_text(entry, "id"),
                title: child_text(entry, "title"),
                link: atom_link(entry),
                author,
                published,
                summary,
                feed_title: feed_title.clone(),
                thumbnail,
                video_id,
                views,
            }
        })
        .collect()
}

/// Fetches every feed in `feeds` as one single-shot sub-feed each.
pub(crate) fn fetch_entries<T, F>(
    fetch: &dyn Fetch,
    feeds: &[String],
    cursor: Option<&str>,
    url_for: impl Fn(&str) -> String + Sync,
    convert: F,
) -> Result<Page<T>, SourceError>
where
    T: Send,
    F: Fn(&str, FeedEntry) -> T + Sync,
{
    composite::fan_out(feeds, cursor, |feed, _cursor| {
        let url = url_for(feed);
        let entries = parse_feed(&fetch.get_text(&url, None)?)?;
        debug!(%url, count = entries.len(), "parsed feed");
        Ok(SubPage {
            items: entries.into_iter().map(|entry| convert(feed, entry)).collect(),
            next: SubCursor::Done,
        })
    })
}

pub struct RssSource {
    fetch: Arc<dyn Fetch>,
    feed: String,
    feeds: Vec<String>,
}

impl RssSource {
    pub fn new(fetch: Arc<dyn Fetch>, feed: String) -> Self {
        let feeds = composite::split_feeds(&feed);
        Self { fetch, feed, feeds }
    }
}

fn feed_url(feed: &str) -> String {
    if feed.starts_with("http://") || feed.starts_with("https://") {
        feed.to_string()
    } else {
        format!("https://{feed}")
    }
}

fn to_post(feed: &str, entry: FeedEntry) -> Post<FeedEntry> {
    let domain = Url::parse(&entry.link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();
    Post {
        url: entry.link.clone(),
        title: entry.title.clone(),
        author: if entry.author.is_empty() {
            entry.feed_title.clone()
        } else {
            entry.author.clone()
        },
        author_url: feed_url(feed),
        created_at: entry.published,
        feed: feed.to_string(),
        domain,
        score: None,
        num_comments: 0,
        is_self: false,
        is_gallery: false,
        num_gallery_images: 0,
        body: html_to_text(&entry.summary),
        raw: entry,
    }
}

impl Adapter for RssSource {
    type Raw = FeedEntry;

    fn get_posts(&self, cursor: Option<&str>) -> Result<Page<Post<FeedEntry>>, SourceError> {
        if self.feeds.is_empty() {
            return Err(SourceError::NotFound("no feed urls given".into()));
        }
        let mut page = fetch_entries(self.fetch.as_ref(), &self.feeds, cursor, feed_url, to_post)?;
        page.items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page)
    }

    fn get_comments(&self, _post: &Post<FeedEntry>) -> Result<Vec<Comment>, SourceError> {
        Ok(Vec::new())
    }

    fn feed(&self) -> &str {
        &self.feed
    }

    fn prefix(&self) -> SourcePrefix {
        SourcePrefix::Rss
    }
}
