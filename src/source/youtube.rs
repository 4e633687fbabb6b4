use std::sync::Arc;

use super::composite;
use super::rss::{fetch_entries, FeedEntry};
use super::{Adapter, Comment, Page, Post, SourceError, SourcePrefix};
use crate::http::Fetch;
use crate::text::html_to_text;

const FEED_BASE: &str = "https://www.youtube.com/feeds/videos.xml";

#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub id: String,
    pub channel: String,
    pub thumbnail: Option<String>,
    pub views: Option<i64>,
}

/// Channel ids (`UC...`) and playlist ids (`PL...`) map to their Atom feeds.
/// Anything that already looks like a URL is fetched as is.
pub fn feed_url(id: &str) -> String {
    if id.starts_with("https://") || id.starts_with("http://") {
        id.to_string()
    } else if id.starts_with("PL") {
        format!("{FEED_BASE}?playlist_id={id}")
    } else {
        format!("{FEED_BASE}?channel_id={id}")
    }
}

fn to_post(channel: &str, entry: FeedEntry) -> Post<Video> {
    let id = entry.video_id.clone().unwrap_or_else(|| entry.id.clone());
    let url = if entry.link.is_empty() {
        format!("https://www.youtube.com/watch?v={id}")
    } else {
        entry.link.clone()
    };
    Post {
        url,
        title: entry.title,
        author: entry.author,
        author_url: format!("https://www.youtube.com/channel/{channel}"),
        created_at: entry.published,
        feed: channel.to_string(),
        domain: "youtube.com".into(),
        score: entry.views,
        num_comments: 0,
        is_self: false,
        is_gallery: false,
        num_gallery_images: 0,
        body: html_to_text(&entry.summary),
        raw: Video {
            id,
            channel: channel.to_string(),
            thumbnail: entry.thumbnail,
            views: entry.views,
        },
    }
}

pub struct YouTubeSource {
    fetch: Arc<dyn Fetch>,
    feed: String,
    channels: Vec<String>,
}

impl YouTubeSource {
    pub fn new(fetch: Arc<dyn Fetch>, feed: String) -> Self {
        let channels = composite::split_feeds(&feed);
        Self {
            fetch,
            feed,
            channels,
        }
    }
}

impl Adapter for YouTubeSource {
    type Raw = Video;

    fn get_posts(&self, cursor: Option<&str>) -> Result<Page<Post<Video>>, SourceError> {
        if self.channels.is_empty() {
            return Err(SourceError::NotFound("no youtube channels given".into()));
        }
        let mut page = fetch_entries(self.fetch.as_ref(), &self.channels, cursor, feed_url, to_post)?;
        page.items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page)
    }

    fn get_comments(&self, _post: &Post<Video>) -> Result<Vec<Comment>, SourceError> {
        Ok(Vec::new())
    }

    fn feed(&self) -> &str {
        &self.feed
    }

    fn prefix(&self) -> SourcePrefix {
        SourcePrefix::YouTube
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::StubFetcher;

    fn channel_feed(channel: &str, videos: &[(&str, &str)]) -> String {
        let entries: String = videos
            .iter()
            .map(|(id, published)| {
                format!(
                    r#"<entry>
    <id>yt:video:{id}</id>
    <yt:videoId>{id}</yt:videoId>
    <title>Video {id}</title>
    <link rel="alternate" href="https://www.youtube.com/watch?v={id}"/>
    <author><name>{channel}</name></author>
    <published>{published}</published>
    <media:group>
      <media:thumbnail url="https://i.ytimg.com/vi/{id}/hqdefault.jpg" width="480" height="360"/>
      <media:description>about {id}</media:description>
      <media:community><media:statistics views="1234"/></media:community>
    </media:group>
  </entry>"#
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns:media="http://search.yahoo.com/mrss/" xmlns="http://www.w3.org/2005/Atom">
  <title>{channel}</title>
  {entries}
</feed>"#
        )
    }

    #[test]
    fn builds_feed_urls() {
        assert_eq!(
            feed_url("UCabc"),
            "https://www.youtube.com/feeds/videos.xml?channel_id=UCabc"
        );
        assert_eq!(
            feed_url("PLxyz"),
            "https://www.youtube.com/feeds/videos.xml?playlist_id=PLxyz"
        );
    }

    #[test]
    fn merges_channels_newest_first() {
        let stub = Arc::new(
            StubFetcher::default()
                .with(
                    &feed_url("UCone"),
                    &channel_feed("One", &[("a1", "2024-01-01T00:00:00+00:00")]),
                )
                .with(
                    &feed_url("UCtwo"),
                    &channel_feed(
                        "Two",
                        &[
                            ("b2", "2024-03-01T00:00:00+00:00"),
                            ("b1", "2023-12-01T00:00:00+00:00"),
                        ],
                    ),
                ),
        );
        let source = YouTubeSource::new(stub, "UCone+UCtwo".into());
        let page = source.get_posts(None).unwrap();
        let ids: Vec<&str> = page.items.iter().map(|p| p.raw.id.as_str()).collect();
        assert_eq!(ids, vec!["b2", "a1", "b1"]);
        assert_eq!(page.next, None);

        let newest = &page.items[0];
        assert_eq!(newest.author, "Two");
        assert_eq!(newest.body, "about b2");
        assert_eq!(newest.score, Some(1234));
        assert_eq!(
            newest.raw.thumbnail.as_deref(),
            Some("https://i.ytimg.com/vi/b2/hqdefault.jpg")
        );
        assert!(source.get_comments(newest).unwrap().is_empty());
    }
}
