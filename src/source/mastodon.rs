use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::composite::{self, SubCursor, SubPage};
use super::tree::{self, FlatComment};
use super::{Adapter, Comment, Page, Post, SourceError, SourcePrefix};
use crate::http::{get_json, Fetch};
use crate::route::redact_account;
use crate::text::html_to_text;

/// `/api/v1/accounts/:id/statuses` hands out at most this many statuses.
pub const STATUS_LIMIT: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub username: String,
    pub host: String,
    pub bearer: Option<String>,
}

impl AccountSpec {
    /// Accepts `user@host`, `@user@host`, `user@host:token` and
    /// `https://host/users/user`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.starts_with("https://") {
            let url = Url::parse(input).ok()?;
            let username = url.path().strip_prefix("/users/")?.trim_end_matches('/');
            let host = url.host_str()?;
            if username.is_empty() || username.contains('/') {
                return None;
            }
            return Some(Self {
                username: username.to_string(),
                host: host.to_string(),
                bearer: None,
            });
        }

        let input = input.strip_prefix('@').unwrap_or(input);
        let (username, host) = input.split_once('@')?;
        if username.is_empty() || host.is_empty() || host.contains('@') {
            return None;
        }
        let (host, bearer) = match host.split_once(':') {
            Some((host, bearer)) => (host, Some(bearer.to_string())),
            None => (host, None),
        };
        Some(Self {
            username: username.to_string(),
            host: host.to_string(),
            bearer,
        })
    }

    fn label(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub acct: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub avatar_static: Option<String>,
}

impl Account {
    fn name(&self) -> String {
        match &self.display_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => self.username.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    pub account: Account,
    #[serde(default)]
    pub content: String,
    pub created_at: String,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub in_reply_to_account_id: Option<String>,
    #[serde(default)]
    pub media_attachments: Vec<MediaAttachment>,
    #[serde(default)]
    pub reblog: Option<Box<Status>>,
    #[serde(default)]
    pub reblogs_count: i64,
    #[serde(default)]
    pub favourites_count: i64,
    #[serde(default)]
    pub replies_count: i64,
    #[serde(default)]
    pub spoiler_text: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl Status {
    /// The status to show: the boosted one for reblogs.
    pub fn shown(&self) -> &Status {
        self.reblog.as_deref().unwrap_or(self)
    }

    fn created_at(&self) -> i64 {
        DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.timestamp())
            .unwrap_or(0)
    }

    fn origin_host(&self) -> Option<String> {
        Url::parse(&self.uri)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    fn account_host(&self) -> Option<String> {
        Url::parse(&self.account.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// Rewrites links to point at the viewer's own instance, so replies and
    /// boosts open where the token is logged in.
    fn localize(&mut self, home: &str) {
        if let Some(remote) = self.account_host() {
            self.url = Some(format!(
                "https://{home}/@{}@{remote}/{}",
                self.account.username, self.id
            ));
            self.account.url = format!("https://{home}/@{}@{remote}/", self.account.username);
        }
        if let Some(reblog) = self.reblog.as_deref_mut() {
            reblog.localize(home);
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawStatus {
    pub status: Status,
    pub account: AccountSpec,
}

#[derive(Debug, Deserialize)]
struct Context {
    #[serde(default)]
    descendants: Vec<Status>,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    #[serde(default)]
    id: Option<String>,
}

pub struct MastodonSource {
    fetch: Arc<dyn Fetch>,
    feed: String,
    accounts: Vec<String>,
    only_roots: bool,
    account_ids: RwLock<HashMap<String, String>>,
}

impl MastodonSource {
    pub fn new(fetch: Arc<dyn Fetch>, feed: String, only_roots: bool) -> Self {
        let accounts = composite::split_feeds(&feed);
        Self {
            fetch,
            feed,
            accounts,
            only_roots,
            account_ids: RwLock::new(HashMap::new()),
        }
    }

    fn account_id(&self, spec: &AccountSpec) -> Result<String, SourceError> {
        let key = spec.label();
        if let Some(id) = self.account_ids.read().get(&key) {
            return Ok(id.clone());
        }
        let url = format!(
            "https://{}/api/v1/accounts/lookup?acct={}",
            spec.host, spec.username
        );
        let found: LookupResult = get_json(self.fetch.as_ref(), &url, None)?;
        let id = found
            .id
            .ok_or_else(|| SourceError::NotFound(format!("mastodon account {key}")))?;
        self.account_ids.write().insert(key, id.clone());
        Ok(id)
    }

    fn account_posts(&self, input: &str, cursor: &SubCursor) -> Result<SubPage<Post<RawStatus>>, SourceError> {
        let spec = AccountSpec::parse(input)
            .ok_or_else(|| {
                SourceError::NotFound(format!("invalid mastodon account {:?}", redact_account(input)))
            })?;

        let (statuses, next) = match &spec.bearer {
            None => {
                let id = self.account_id(&spec)?;
                let url = format!(
                    "https://{}/api/v1/accounts/{}/statuses?limit={}",
                    spec.host, id, STATUS_LIMIT
                );
                let statuses: Vec<Status> = get_json(self.fetch.as_ref(), &url, None)?;
                (statuses, SubCursor::Capped)
            }
            Some(bearer) => {
                let mut url = format!(
                    "https://{}/api/v1/timelines/home?limit={}",
                    spec.host, STATUS_LIMIT
                );
                if let Some(max_id) = cursor.token() {
                    url.push_str(&format!("&max_id={max_id}"));
                }
                let mut statuses: Vec<Status> = get_json(self.fetch.as_ref(), &url, Some(bearer))?;
                for status in statuses.iter_mut() {
                    status.localize(&spec.host);
                }
                let next = statuses
                    .last()
                    .map(|last| SubCursor::After(last.id.clone()))
                    .unwrap_or(SubCursor::Done);
                (statuses, next)
            }
        };
        debug!(account = %spec.label(), count = statuses.len(), ?next, "loaded mastodon statuses");

        let items = statuses
            .into_iter()
            .filter(|status| !(self.only_roots && status.shown().in_reply_to_account_id.is_some()))
            .map(|status| self.convert(status, &spec))
            .collect();
        Ok(SubPage { items, next })
    }

    fn convert(&self, status: Status, spec: &AccountSpec) -> Post<RawStatus> {
        let shown = status.shown();
        let origin = shown.origin_host().unwrap_or_else(|| spec.host.clone());
        let mut body = String::new();
        if status.reblog.is_some() {
            body.push_str(&format!("Boosted by {}\n\n", status.account.name()));
        }
        if !shown.spoiler_text.is_empty() {
            body.push_str(&format!("CW: {}\n\n", shown.spoiler_text));
        }
        body.push_str(&html_to_text(&shown.content));
        let images = shown
            .media_attachments
            .iter()
            .filter(|media| media.kind == "image")
            .count();
        Post {
            url: shown.url.clone().unwrap_or_else(|| shown.uri.clone()),
            title: String::new(),
            author: shown.account.name(),
            author_url: shown.account.url.clone(),
            created_at: shown.created_at(),
            feed: spec.label(),
            domain: format!("{}@{}", shown.account.username, origin),
            score: Some(shown.favourites_count),
            num_comments: shown.replies_count,
            is_self: true,
            is_gallery: images > 1,
            num_gallery_images: images,
            body,
            raw: RawStatus {
                status: status.clone(),
                account: spec.clone(),
            },
        }
    }
}

impl Adapter for MastodonSource {
    type Raw = RawStatus;

    fn get_posts(&self, cursor: Option<&str>) -> Result<Page<Post<RawStatus>>, SourceError> {
        if self.accounts.is_empty() {
            return Err(SourceError::NotFound("no mastodon accounts given".into()));
        }
        composite::fan_out(&self.accounts, cursor, |account, sub| {
            self.account_posts(account, sub)
        })
    }

    fn get_comments(&self, post: &Post<RawStatus>) -> Result<Vec<Comment>, SourceError> {
        let shown = post.raw.status.shown();
        let (host, status_id) = match &post.raw.account.bearer {
            Some(_) => (post.raw.account.host.clone(), shown.id.clone()),
            None => {
                let host = shown
                    .origin_host()
                    .ok_or_else(|| SourceError::MalformedResponse(format!("status uri {:?}", shown.uri)))?;
                let id = shown
                    .uri
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                (host, id)
            }
        };
        let url = format!("https://{host}/api/v1/statuses/{status_id}/context");
        let context: Context = get_json(self.fetch.as_ref(), &url, None)?;

        let flat = context
            .descendants
            .into_iter()
            .map(|mut reply| {
                if post.raw.account.bearer.is_some() {
                    reply.localize(&post.raw.account.host);
                }
                FlatComment {
                    id: reply.id.clone(),
                    parent: reply.in_reply_to_id.clone(),
                    comment: Comment {
                        url: reply.url.clone().unwrap_or_else(|| reply.uri.clone()),
                        author: reply.account.name(),
                        author_url: reply.account.url.clone(),
                        created_at: reply.created_at(),
                        score: None,
                        body: html_to_text(&reply.content),
                        replies: Vec::new(),
                    },
                }
            })
            .collect();
        Ok(tree::build(&status_id, flat))
    }

    fn feed(&self) -> &str {
        &self.feed
    }

    fn prefix(&self) -> SourcePrefix {
        SourcePrefix::Mastodon
    }
}
