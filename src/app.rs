use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config;
use crate::guard;
use crate::history::SessionHistory;
use crate::http::{Fetch, HttpFetcher};
use crate::logging;
use crate::route::Route;
use crate::source::SourcePrefix;
use crate::ui;

/// Picks the feed to open: the argument, else the default bookmark, else `r/all`.
pub fn resolve_route(argument: Option<&str>, cfg: &config::Config) -> Route {
    argument
        .and_then(Route::parse)
        .or_else(|| Route::parse(&cfg.default_route()))
        .unwrap_or_else(|| Route::new(SourcePrefix::Reddit, "all", None))
}

pub fn run(route: Option<String>) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;

    if let Some(path) = logging::default_log_path() {
        if let Err(err) = logging::init(&path) {
            eprintln!("warning: logging disabled: {err:?}");
        }
    }

    let fetch: Arc<dyn Fetch> =
        Arc::new(HttpFetcher::new(&cfg.http).context("create http client")?);

    let resolved = resolve_route(route.as_deref(), &cfg);
    if let Some(argument) = route.as_deref() {
        if Route::parse(argument).is_none() {
            warn!(%argument, fallback = %resolved.redacted(), "route names no feed");
        }
    }
    info!(route = %resolved.redacted(), version = crate::VERSION, "starting ledit");

    let guard = guard::install(SessionHistory::new(&resolved.to_string()))
        .context("install navigation guard")?
        .clone();

    let options = ui::Options {
        guard,
        fetch,
        route: resolved,
        feeds: cfg.feeds.clone(),
        bookmarks: cfg.bookmarks.clone(),
        config_path: config::default_path(),
        theme: cfg.ui.theme.clone(),
    };

    let mut model = ui::Model::new(options);
    model.run()
}
