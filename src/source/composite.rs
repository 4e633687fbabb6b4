//! Multi-feed paging: several sub-feeds joined with `+`, each with its own
//! cursor, fetched concurrently and merged into one page.

use std::thread;

use tracing::warn;

use super::{Page, SourceError};
use crate::route::redact_account;

pub const SEPARATOR: char = '+';

/// Position inside one sub-feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubCursor {
    Start,
    After(String),
    /// The upstream caps how much history it hands out; nothing more to fetch.
    Capped,
    /// The upstream reported no further items.
    Done,
}

impl SubCursor {
    pub fn parse(token: &str) -> Self {
        match token {
            "" => SubCursor::Start,
            "end" => SubCursor::Capped,
            "done" => SubCursor::Done,
            other => SubCursor::After(other.to_string()),
        }
    }

    pub fn encode(&self) -> &str {
        match self {
            SubCursor::Start => "",
            SubCursor::After(token) => token,
            SubCursor::Capped => "end",
            SubCursor::Done => "done",
        }
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, SubCursor::Capped | SubCursor::Done)
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            SubCursor::After(token) => Some(token),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubPage<T> {
    pub items: Vec<T>,
    pub next: SubCursor,
}

pub fn split_feeds(feed: &str) -> Vec<String> {
    feed.split(SEPARATOR)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Missing positions start from the beginning; surplus positions are dropped.
pub fn split_cursor(cursor: Option<&str>, feeds: usize) -> Vec<SubCursor> {
    let mut cursors: Vec<SubCursor> = cursor
        .map(|c| c.split(SEPARATOR).map(SubCursor::parse).collect())
        .unwrap_or_default();
    cursors.resize(feeds, SubCursor::Start);
    cursors
}

/// `None` once every sub-feed has ended.
pub fn join_cursor(cursors: &[SubCursor]) -> Option<String> {
    if cursors.iter().all(SubCursor::is_ended) {
        return None;
    }
    Some(
        cursors
            .iter()
            .map(SubCursor::encode)
            .collect::<Vec<_>>()
            .join(&SEPARATOR.to_string()),
    )
}

/// Queries every live sub-feed concurrently and waits for all of them.
///
/// Ended sub-feeds are skipped. A failed sub-feed keeps its old cursor so the
/// next call retries it, and its error is reported in `Page::failures`. When
/// every queried sub-feed fails the whole page fails with the first error.
pub fn fan_out<T, F>(feeds: &[String], cursor: Option<&str>, fetch: F) -> Result<Page<T>, SourceError>
where
    T: Send,
    F: Fn(&str, &SubCursor) -> Result<SubPage<T>, SourceError> + Sync,
{
    let cursors = split_cursor(cursor, feeds.len());
    if feeds.is_empty() || cursors.iter().all(SubCursor::is_ended) {
        return Ok(Page::end());
    }

    let fetch = &fetch;
    let results: Vec<Option<Result<SubPage<T>, SourceError>>> = thread::scope(|scope| {
        let handles: Vec<_> = feeds
            .iter()
            .zip(cursors.iter())
            .map(|(feed, cursor)| {
                if cursor.is_ended() {
                    None
                } else {
                    Some(scope.spawn(move || fetch(feed, cursor)))
                }
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(SourceError::UpstreamUnavailable("sub-feed worker panicked".into()))
                    })
                })
            })
            .collect()
    });

    let mut items = Vec::new();
    let mut next = Vec::with_capacity(feeds.len());
    let mut failures = Vec::new();
    let mut queried = 0;
    for ((feed, old), result) in feeds.iter().zip(cursors).zip(results) {
        match result {
            None => next.push(old),
            Some(Ok(page)) => {
                queried += 1;
                items.extend(page.items);
                next.push(page.next);
            }
            Some(Err(err)) => {
                queried += 1;
                warn!(feed = %redact_account(feed), error = %err, "sub-feed failed");
                failures.push(err);
                next.push(old);
            }
        }
    }

    if queried > 0 && failures.len() == queried {
        return Err(failures.swap_remove(0));
    }

    Ok(Page {
        items,
        next: join_cursor(&next),
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn cursor_tags_round_trip() {
        for token in ["", "end", "done", "109876"] {
            assert_eq!(SubCursor::parse(token).encode(), token);
        }
        assert_eq!(
            join_cursor(&[SubCursor::Capped, SubCursor::After("7".into())]),
            Some("end+7".into())
        );
        assert_eq!(join_cursor(&[SubCursor::Capped, SubCursor::Done]), None);
    }

    #[test]
    fn split_pads_and_truncates() {
        assert_eq!(
            split_cursor(Some("end"), 2),
            vec![SubCursor::Capped, SubCursor::Start]
        );
        assert_eq!(split_cursor(Some("1+2+3"), 1).len(), 1);
        assert_eq!(split_cursor(None, 2), vec![SubCursor::Start, SubCursor::Start]);
    }

    #[test]
    fn exhausted_sub_feed_is_not_requeried() {
        let feeds = vec!["capped".to_string(), "paged".to_string()];
        let calls = Mutex::new(Vec::new());
        let fetch = |feed: &str, cursor: &SubCursor| {
            calls.lock().push((feed.to_string(), cursor.clone()));
            Ok(match (feed, cursor) {
                ("capped", _) => SubPage {
                    items: vec!["c1"],
                    next: SubCursor::Capped,
                },
                (_, SubCursor::Start) => SubPage {
                    items: vec!["p1"],
                    next: SubCursor::After("1".into()),
                },
                (_, SubCursor::After(_)) => SubPage {
                    items: vec!["p2"],
                    next: SubCursor::Done,
                },
                _ => unreachable!(),
            })
        };

        let first = fan_out(&feeds, None, fetch).unwrap();
        assert_eq!(first.items, vec!["c1", "p1"]);
        assert_eq!(first.next.as_deref(), Some("end+1"));

        calls.lock().clear();
        let second = fan_out(&feeds, first.next.as_deref(), fetch).unwrap();
        assert_eq!(second.items, vec!["p2"]);
        assert_eq!(second.next, None);
        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "paged");
    }

    #[test]
    fn partial_failure_keeps_cursor_and_flags_error() {
        let feeds = vec!["ok".to_string(), "down".to_string()];
        let fetch = |feed: &str, _cursor: &SubCursor| {
            if feed == "down" {
                Err(SourceError::UpstreamUnavailable("503".into()))
            } else {
                Ok(SubPage {
                    items: vec![1],
                    next: SubCursor::Capped,
                })
            }
        };
        let page = fan_out(&feeds, Some("+42"), fetch).unwrap();
        assert_eq!(page.items, vec![1]);
        assert_eq!(page.next.as_deref(), Some("end+42"));
        assert_eq!(page.failures.len(), 1);
    }

    #[test]
    fn total_failure_fails_the_page() {
        let feeds = vec!["a".to_string(), "b".to_string()];
        let fetch = |feed: &str, _cursor: &SubCursor| -> Result<SubPage<i32>, SourceError> {
            Err(SourceError::NotFound(feed.to_string()))
        };
        let err = fan_out(&feeds, None, fetch).unwrap_err();
        assert_eq!(err, SourceError::NotFound("a".into()));
    }

    #[test]
    fn fully_ended_cursor_is_an_empty_final_page() {
        let feeds = vec!["a".to_string()];
        let fetch = |_: &str, _: &SubCursor| -> Result<SubPage<i32>, SourceError> {
            panic!("must not fetch")
        };
        let page = fan_out(&feeds, Some("end"), fetch).unwrap();
        assert!(page.items.is_empty());
        assert!(page.is_exhausted());
    }
}
