use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::source::SourcePrefix;

const FEED_ENCODE: &AsciiSet = &CONTROLS.add(b' ').add(b'/').add(b'#').add(b'?').add(b'%');

/// A feed location such as `r/austria/top-week` or `m/user@mastodon.social`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: SourcePrefix,
    pub feed: String,
    pub sorting: Option<String>,
}

impl Route {
    pub fn new(prefix: SourcePrefix, feed: impl Into<String>, sorting: Option<String>) -> Self {
        Self {
            prefix,
            feed: feed.into(),
            sorting,
        }
    }

    /// `None` when the hash names no feed, so the caller can fall back to the
    /// default bookmark. Unknown prefixes are read as Reddit.
    pub fn parse(hash: &str) -> Option<Self> {
        let hash = hash.trim().trim_start_matches('#');
        let mut tokens = hash.splitn(3, '/');
        let prefix = tokens.next()?;
        let feed = tokens.next().filter(|feed| !feed.is_empty())?;
        let sorting = tokens
            .next()
            .map(|s| s.trim_end_matches('/'))
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let prefix = SourcePrefix::from_token(prefix).unwrap_or(SourcePrefix::Reddit);
        let feed = percent_decode_str(feed).decode_utf8_lossy().into_owned();
        // Feeds that are URLs keep their slashes, so only Reddit and Hacker
        // News routes carry a sorting segment.
        let (feed, sorting) = match prefix {
            SourcePrefix::Reddit | SourcePrefix::HackerNews => (feed, sorting),
            _ => match sorting {
                Some(rest) => (format!("{feed}/{rest}"), None),
                None => (feed, None),
            },
        };
        Some(Self {
            prefix,
            feed,
            sorting,
        })
    }

    pub fn with_sorting(&self, sorting: &str) -> Self {
        Self {
            sorting: Some(sorting.to_string()),
            ..self.clone()
        }
    }

    /// The route with Mastodon access tokens masked, for logs.
    pub fn redacted(&self) -> String {
        if self.prefix != SourcePrefix::Mastodon {
            return self.to_string();
        }
        let feed: Vec<String> = self.feed.split('+').map(redact_account).collect();
        Self {
            feed: feed.join("+"),
            ..self.clone()
        }
        .to_string()
    }
}

/// Masks the token in a `user@host:token` account.
pub fn redact_account(account: &str) -> String {
    let Some(at) = account.find('@') else {
        return account.to_string();
    };
    match account[at..].find(':') {
        Some(colon) => format!("{}:***", &account[..at + colon]),
        None => account.to_string(),
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let feed = utf8_percent_encode(&self.feed, FEED_ENCODE);
        match &self.sorting {
            Some(sorting) => write!(f, "{}{}/{}", self.prefix.as_str(), feed, sorting),
            None => write!(f, "{}{}", self.prefix.as_str(), feed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reddit_with_sorting() {
        let route = Route::parse("#r/austria/top-week").unwrap();
        assert_eq!(route.prefix, SourcePrefix::Reddit);
        assert_eq!(route.feed, "austria");
        assert_eq!(route.sorting.as_deref(), Some("top-week"));
        assert_eq!(route.to_string(), "r/austria/top-week");
    }

    #[test]
    fn feed_is_required() {
        assert_eq!(Route::parse(""), None);
        assert_eq!(Route::parse("r"), None);
        assert_eq!(Route::parse("r/"), None);
    }

    #[test]
    fn unknown_prefix_falls_back_to_reddit() {
        let route = Route::parse("zz/rust").unwrap();
        assert_eq!(route.prefix, SourcePrefix::Reddit);
        assert_eq!(route.feed, "rust");
    }

    #[test]
    fn url_feeds_round_trip_encoded() {
        let route = Route::new(
            SourcePrefix::Rss,
            "https://example.com/feed.xml+https://blog.example.org/atom",
            None,
        );
        let hash = route.to_string();
        assert!(!hash["rss/".len()..].contains('/'));
        assert_eq!(Route::parse(&hash), Some(route));
    }

    #[test]
    fn raw_url_feeds_keep_their_slashes() {
        let route = Route::parse("rss/https://example.com/feed.xml").unwrap();
        assert_eq!(route.feed, "https://example.com/feed.xml");
        assert_eq!(route.sorting, None);
    }

    #[test]
    fn mastodon_accounts_with_bearer() {
        let route = Route::parse("m/alice@mastodon.social:tok+bob@fosstodon.org").unwrap();
        assert_eq!(route.prefix, SourcePrefix::Mastodon);
        assert_eq!(route.feed, "alice@mastodon.social:tok+bob@fosstodon.org");
    }

    #[test]
    fn redaction_masks_mastodon_tokens_only() {
        let route = Route::parse("m/alice@mastodon.social:s3cret+bob@fosstodon.org").unwrap();
        let redacted = route.redacted();
        assert!(!redacted.contains("s3cret"));
        assert_eq!(redacted, "m/alice@mastodon.social:***+bob@fosstodon.org");

        let plain = Route::parse("rss/https://user@example.com:8080/feed").unwrap();
        assert_eq!(plain.redacted(), plain.to_string());
    }
}
