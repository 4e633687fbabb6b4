use std::collections::HashSet;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use tracing::{debug, info, warn};
use unicode_width::UnicodeWidthStr;

use crate::config::{self, Bookmark, FeedsConfig};
use crate::guard::{BackHandle, BackOutcome, EscapeHandle, FrameId, Guard};
use crate::http::Fetch;
use crate::paging::{Completion, Loader, PagingState, Pager};
use crate::route::Route;
use crate::source::{Adapter, Comment, Page, Post, RawPost, Source, SourceError};
use crate::text::{add_commas, date_to_text};

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
/// Start fetching the next page once the selection is this close to the end.
const LOAD_MORE_THRESHOLD: usize = 5;
const PAGE_JUMP: isize = 10;

const COMMENT_DEPTH_COLORS: [Color; 6] = [
    Color::Rgb(250, 179, 135),
    Color::Rgb(166, 227, 161),
    Color::Rgb(203, 166, 247),
    Color::Rgb(245, 194, 231),
    Color::Rgb(137, 220, 235),
    Color::Rgb(249, 226, 175),
];

fn comment_depth_color(depth: usize) -> Color {
    COMMENT_DEPTH_COLORS[depth % COMMENT_DEPTH_COLORS.len()]
}

#[derive(Debug, Clone, Copy)]
struct Theme {
    bg: Color,
    panel_bg: Color,
    selected_bg: Color,
    border: Color,
    text: Color,
    text_dim: Color,
    accent: Color,
    error: Color,
}

impl Theme {
    fn named(name: &str) -> Self {
        match name {
            "light" => Self {
                bg: Color::Rgb(239, 241, 245),
                panel_bg: Color::Rgb(230, 233, 239),
                selected_bg: Color::Rgb(204, 208, 218),
                border: Color::Rgb(30, 102, 245),
                text: Color::Rgb(76, 79, 105),
                text_dim: Color::Rgb(108, 111, 133),
                accent: Color::Rgb(30, 102, 245),
                error: Color::Rgb(210, 15, 57),
            },
            _ => Self {
                bg: Color::Rgb(30, 30, 46),
                panel_bg: Color::Rgb(24, 24, 36),
                selected_bg: Color::Rgb(69, 71, 90),
                border: Color::Rgb(137, 180, 250),
                text: Color::Rgb(205, 214, 244),
                text_dim: Color::Rgb(166, 173, 200),
                accent: Color::Rgb(137, 180, 250),
                error: Color::Rgb(243, 139, 168),
            },
        }
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

/// A comment flattened for display, depth-first.
#[derive(Debug, Clone, PartialEq)]
struct CommentEntry {
    depth: usize,
    author: String,
    created_at: i64,
    score: Option<i64>,
    body: String,
    url: String,
    descendants: usize,
}

fn flatten_comments(tree: &[Comment]) -> Vec<CommentEntry> {
    fn walk(comments: &[Comment], depth: usize, out: &mut Vec<CommentEntry>) {
        for comment in comments {
            out.push(CommentEntry {
                depth,
                author: comment.author.clone(),
                created_at: comment.created_at,
                score: comment.score,
                body: comment.body.clone(),
                url: comment.url.clone(),
                descendants: comment.count() - 1,
            });
            walk(&comment.replies, depth + 1, out);
        }
    }
    let mut out = Vec::new();
    walk(tree, 0, &mut out);
    out
}

/// Indices of entries not hidden under a collapsed ancestor.
fn visible_comments(entries: &[CommentEntry], collapsed: &HashSet<usize>) -> Vec<usize> {
    let mut visible = Vec::with_capacity(entries.len());
    let mut hidden_depths: Vec<usize> = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        while hidden_depths
            .last()
            .is_some_and(|depth| *depth >= entry.depth)
        {
            hidden_depths.pop();
        }
        if !hidden_depths.is_empty() {
            continue;
        }
        visible.push(index);
        if collapsed.contains(&index) {
            hidden_depths.push(entry.depth);
        }
    }
    visible
}

fn post_title<R>(post: &Post<R>) -> String {
    if !post.title.trim().is_empty() {
        return post.title.clone();
    }
    let first = post.body.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let mut title: String = first.chars().take(120).collect();
    if first.chars().count() > 120 {
        title.push('…');
    }
    title
}

fn post_meta<R>(post: &Post<R>, now: DateTime<Utc>) -> String {
    let mut parts = Vec::new();
    if let Some(score) = post.score {
        parts.push(format!("{} pts", add_commas(score)));
    }
    if post.num_comments > 0 {
        let noun = if post.num_comments == 1 { "comment" } else { "comments" };
        parts.push(format!("{} {noun}", add_commas(post.num_comments)));
    }
    if !post.author.is_empty() {
        parts.push(post.author.clone());
    }
    if post.created_at > 0 {
        parts.push(date_to_text(post.created_at, now));
    }
    if !post.domain.is_empty() {
        parts.push(post.domain.clone());
    }
    if post.is_gallery {
        parts.push(format!("{} images", post.num_gallery_images));
    }
    parts.join(" · ")
}

fn wrap_with_prefixes(
    text: &str,
    width: usize,
    first_prefix: &str,
    rest_prefix: &str,
    style: Style,
) -> Vec<Line<'static>> {
    if text.trim().is_empty() {
        return vec![Line::from(Span::styled(String::new(), style))];
    }
    if width == 0 {
        return vec![Line::from(Span::styled(format!("{first_prefix}{text}"), style))];
    }
    let min_width = first_prefix
        .chars()
        .count()
        .max(rest_prefix.chars().count())
        .saturating_add(1);
    let options = WrapOptions::new(width.max(min_width))
        .break_words(false)
        .initial_indent(first_prefix)
        .subsequent_indent(rest_prefix);
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        if paragraph.trim().is_empty() {
            lines.push(Line::from(Span::styled(rest_prefix.to_string(), style)));
            continue;
        }
        let options = if lines.is_empty() {
            options.clone()
        } else {
            options.clone().initial_indent(rest_prefix)
        };
        lines.extend(
            wrap(paragraph, options)
                .into_iter()
                .map(|cow| Line::from(Span::styled(cow.into_owned(), style))),
        );
    }
    lines
}

fn pad_lines_to_width(lines: &mut [Line<'static>], width: u16) {
    let width = width as usize;
    if width == 0 {
        return;
    }
    for line in lines {
        let current: usize = line
            .spans
            .iter()
            .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
            .sum();
        if current >= width {
            continue;
        }
        let pad_style = line.spans.last().map(|span| span.style).unwrap_or_default();
        line.spans.push(Span::styled(" ".repeat(width - current), pad_style));
    }
}

fn comment_lines(
    entry: &CommentEntry,
    width: usize,
    collapsed: bool,
    now: DateTime<Utc>,
    meta_style: Style,
    body_style: Style,
) -> Vec<Line<'static>> {
    let indent = "  ".repeat(entry.depth);
    let indicator = if collapsed { "[+]" } else { "[-]" };
    let author = if entry.author.trim().is_empty() {
        "[deleted]"
    } else {
        entry.author.as_str()
    };
    let mut header = format!("{indent}{indicator} {author}");
    if let Some(score) = entry.score {
        header.push_str(&format!(" · {} points", add_commas(score)));
    }
    if entry.created_at > 0 {
        header.push_str(&format!(" · {}", date_to_text(entry.created_at, now)));
    }
    if collapsed && entry.descendants > 0 {
        let noun = if entry.descendants == 1 { "reply" } else { "replies" };
        header.push_str(&format!(" · {} hidden {noun}", entry.descendants));
    }

    let mut lines = vec![Line::from(Span::styled(header, meta_style))];
    if collapsed {
        return lines;
    }
    let body_prefix = format!("{indent}    ");
    let body = if entry.body.trim().is_empty() {
        "(no comment body)"
    } else {
        entry.body.as_str()
    };
    lines.extend(wrap_with_prefixes(
        body,
        width,
        &body_prefix,
        &body_prefix,
        body_style,
    ));
    lines
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

enum AsyncResponse {
    Comments {
        request_id: u64,
        result: Result<Vec<Comment>, SourceError>,
    },
}

/// The comment view stacked over the post list. It owns one guard frame.
struct CommentsOverlay {
    frame: FrameId,
    back: BackHandle,
    escape: EscapeHandle,
    escape_pressed: Arc<AtomicBool>,
    post: Post<RawPost>,
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
    loading: bool,
    status: String,
    entries: Vec<CommentEntry>,
    collapsed: HashSet<usize>,
    visible: Vec<usize>,
    selected: usize,
}

impl CommentsOverlay {
    fn rebuild_visible(&mut self, preferred: Option<usize>) {
        self.visible = visible_comments(&self.entries, &self.collapsed);
        self.selected = preferred
            .and_then(|index| self.visible.iter().position(|v| *v == index))
            .unwrap_or_else(|| self.selected.min(self.visible.len().saturating_sub(1)));
    }

    fn move_selection(&mut self, delta: isize) {
        if self.visible.is_empty() {
            return;
        }
        let max = self.visible.len() as isize - 1;
        self.selected = (self.selected as isize + delta).clamp(0, max) as usize;
    }

    fn toggle_selected(&mut self) {
        let Some(&index) = self.visible.get(self.selected) else {
            return;
        };
        if !self.collapsed.remove(&index) {
            self.collapsed.insert(index);
        }
        self.rebuild_visible(Some(index));
    }

    fn selected_url(&self) -> &str {
        self.visible
            .get(self.selected)
            .and_then(|index| self.entries.get(*index))
            .map(|entry| entry.url.as_str())
            .filter(|url| !url.is_empty())
            .unwrap_or(self.post.url.as_str())
    }
}

pub struct Options {
    pub guard: Guard,
    pub fetch: Arc<dyn Fetch>,
    pub route: Route,
    pub feeds: FeedsConfig,
    pub bookmarks: Vec<Bookmark>,
    pub config_path: Option<PathBuf>,
    pub theme: String,
}

pub struct Model {
    guard: Guard,
    fetch: Arc<dyn Fetch>,
    feeds: FeedsConfig,
    bookmarks: Vec<Bookmark>,
    config_path: Option<PathBuf>,
    theme: Theme,
    route: Route,
    loader: Loader<Source>,
    pager: Pager,
    posts: Vec<Post<RawPost>>,
    list_state: ListState,
    status_message: String,
    spinner: Spinner,
    overlay: Option<CommentsOverlay>,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
    needs_redraw: bool,
}

impl Model {
    pub fn new(options: Options) -> Self {
        let source = Source::open(&options.route, options.fetch.clone(), &options.feeds);
        let (response_tx, response_rx) = unbounded();
        Self {
            guard: options.guard,
            fetch: options.fetch,
            feeds: options.feeds,
            bookmarks: options.bookmarks,
            config_path: options.config_path,
            theme: Theme::named(&options.theme),
            route: options.route,
            loader: Loader::new(Arc::new(source)),
            pager: Pager::new(),
            posts: Vec::new(),
            list_state: ListState::default(),
            status_message: String::new(),
            spinner: Spinner::new(),
            overlay: None,
            response_tx,
            response_rx,
            next_request_id: 1,
            needs_redraw: true,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        self.load_more();
        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let tick_rate = Duration::from_millis(120);
        let mut last_tick = Instant::now();

        loop {
            if self.poll_async() {
                self.needs_redraw = true;
            }
            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));
            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => self.status_message = format!("Error: {err}"),
                        }
                        self.needs_redraw = true;
                    }
                    Event::Resize(_, _) => self.needs_redraw = true,
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.needs_redraw = true;
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }
        Ok(())
    }

    fn is_loading(&self) -> bool {
        self.pager.is_loading() || self.overlay.as_ref().is_some_and(|o| o.loading)
    }

    /// Returns `Ok(true)` when the session should end.
    pub fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Ok(true);
        }
        if key.code == KeyCode::Esc {
            self.guard.handle_key(&key);
            self.close_overlay_on_escape();
            return Ok(false);
        }

        if let Some(overlay) = self.overlay.as_mut() {
            match key.code {
                KeyCode::Char('j') | KeyCode::Down => overlay.move_selection(1),
                KeyCode::Char('k') | KeyCode::Up => overlay.move_selection(-1),
                KeyCode::PageDown => overlay.move_selection(PAGE_JUMP),
                KeyCode::PageUp => overlay.move_selection(-PAGE_JUMP),
                KeyCode::Char(' ') => overlay.toggle_selected(),
                KeyCode::Char('o') => {
                    let url = overlay.selected_url().to_string();
                    self.open_url(&url);
                }
                KeyCode::Char('r') => self.retry_comments(),
                KeyCode::Char('b') | KeyCode::Backspace | KeyCode::Left => return Ok(self.back()),
                KeyCode::Char('q') => return Ok(true),
                _ => {}
            }
            return Ok(false);
        }

        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(PAGE_JUMP),
            KeyCode::PageUp => self.move_selection(-PAGE_JUMP),
            KeyCode::Home | KeyCode::Char('g') => self.select(0),
            KeyCode::End | KeyCode::Char('G') => self.select(self.posts.len().saturating_sub(1)),
            KeyCode::Enter | KeyCode::Char('c') => self.open_comments(),
            KeyCode::Char('o') => {
                if let Some(url) = self.selected_post().map(|post| post.url.clone()) {
                    self.open_url(&url);
                }
            }
            KeyCode::Char('r') => self.retry(),
            KeyCode::Char('s') => self.cycle_sorting(),
            KeyCode::Char('b') | KeyCode::Backspace | KeyCode::Left => return Ok(self.back()),
            KeyCode::Char('B') => self.save_bookmark()?,
            KeyCode::Char(digit @ '1'..='9') => {
                let index = digit as usize - '1' as usize;
                self.open_bookmark(index);
            }
            _ => {}
        }
        Ok(false)
    }

    fn selected_post(&self) -> Option<&Post<RawPost>> {
        self.list_state.selected().and_then(|index| self.posts.get(index))
    }

    fn select(&mut self, index: usize) {
        if self.posts.is_empty() {
            self.list_state.select(None);
            return;
        }
        self.list_state.select(Some(index.min(self.posts.len() - 1)));
        self.maybe_load_more();
    }

    fn move_selection(&mut self, delta: isize) {
        let current = self.list_state.selected().unwrap_or(0) as isize;
        self.select((current + delta).max(0) as usize);
    }

    fn maybe_load_more(&mut self) {
        if *self.pager.state() != PagingState::Idle {
            return;
        }
        let selected = self.list_state.selected().unwrap_or(0);
        if self.posts.len().saturating_sub(selected + 1) < LOAD_MORE_THRESHOLD {
            self.load_more();
        }
    }

    fn load_more(&mut self) {
        if let Some(request) = self.pager.begin() {
            debug!(route = %self.route.redacted(), id = request.id, cursor = ?request.cursor, "requesting page");
            self.status_message = format!("Loading {}...", self.route);
            self.loader.spawn(request);
        }
    }

    fn retry(&mut self) {
        if matches!(self.pager.state(), PagingState::Failed(_)) {
            self.load_more();
        }
    }

    fn switch_route(&mut self, route: Route, push: bool) {
        if push {
            self.guard.navigate(&route.to_string());
        }
        info!(route = %route.redacted(), "opening feed");
        let source = Source::open(&route, self.fetch.clone(), &self.feeds);
        self.loader = Loader::new(Arc::new(source));
        self.pager.reset();
        self.posts.clear();
        self.list_state.select(None);
        self.route = route;
        self.load_more();
    }

    fn cycle_sorting(&mut self) {
        let source = self.loader.source();
        let options = source.sorting_options();
        if options.is_empty() {
            self.status_message = format!("{} feeds have no sorting options.", source.prefix().label());
            return;
        }
        let next = options
            .iter()
            .position(|option| option.value == source.sorting())
            .map(|index| (index + 1) % options.len())
            .unwrap_or(0);
        let option = options[next];
        self.switch_route(self.route.with_sorting(option.value), true);
        self.status_message = format!("Sorting by {}...", option.label);
    }

    fn open_bookmark(&mut self, index: usize) {
        let Some(bookmark) = self.bookmarks.get(index) else {
            self.status_message = format!("No bookmark {}.", index + 1);
            return;
        };
        match Route::parse(&bookmark.route) {
            Some(route) => self.switch_route(route, true),
            None => self.status_message = format!("Bookmark {:?} has no feed.", bookmark.label),
        }
    }

    fn save_bookmark(&mut self) -> Result<()> {
        let bookmark = Bookmark {
            label: self.route.feed.clone(),
            route: self.route.to_string(),
            default: false,
        };
        let path = config::save_bookmark(self.config_path.clone(), bookmark.clone())?;
        match self.bookmarks.iter_mut().find(|b| b.route == bookmark.route) {
            Some(existing) => *existing = bookmark,
            None => self.bookmarks.push(bookmark),
        }
        self.status_message = format!("Bookmarked {} in {}", self.route, path.display());
        Ok(())
    }

    fn open_url(&mut self, url: &str) {
        if url.is_empty() {
            return;
        }
        match webbrowser::open(url) {
            Ok(_) => self.status_message = format!("Opened {url}"),
            Err(err) => self.status_message = format!("Failed to open browser: {err}"),
        }
    }

    fn open_comments(&mut self) {
        let Some(index) = self.list_state.selected() else {
            return;
        };
        let Some(post) = self.posts.get(index).cloned() else {
            return;
        };

        let frame = self.guard.push_frame();
        // Removing this handle on an Esc close takes the sentinel entry back off the history.
        let back = self.guard.register_back(|| true);
        let escape_pressed = Arc::new(AtomicBool::new(false));
        let flag = escape_pressed.clone();
        let escape = self
            .guard
            .register_escape(move || flag.store(true, Ordering::SeqCst));
        self.guard
            .push_hash(&format!("{}/comments/{}", self.route, index));

        self.overlay = Some(CommentsOverlay {
            frame,
            back,
            escape,
            escape_pressed,
            post,
            request_id: 0,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            loading: false,
            status: String::new(),
            entries: Vec::new(),
            collapsed: HashSet::new(),
            visible: Vec::new(),
            selected: 0,
        });
        self.request_comments();
    }

    fn request_comments(&mut self) {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let Some(overlay) = self.overlay.as_mut() else {
            return;
        };
        overlay.cancel_flag.store(true, Ordering::SeqCst);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        overlay.cancel_flag = cancel_flag.clone();
        overlay.request_id = request_id;
        overlay.loading = true;
        overlay.status = "Loading comments...".into();

        let source = self.loader.source().clone();
        let post = overlay.post.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = source.get_comments(&post);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Comments { request_id, result });
        });
    }

    fn retry_comments(&mut self) {
        if self.overlay.as_ref().is_some_and(|o| !o.loading) {
            self.request_comments();
        }
    }

    fn close_overlay_on_escape(&mut self) {
        let pressed = self
            .overlay
            .as_ref()
            .is_some_and(|overlay| overlay.escape_pressed.load(Ordering::SeqCst));
        if !pressed {
            return;
        }
        let Some(overlay) = self.overlay.take() else {
            return;
        };
        overlay.cancel_flag.store(true, Ordering::SeqCst);
        self.guard.remove_back(overlay.back);
        self.guard.remove_escape(overlay.escape);
        self.guard.close_frame(overlay.frame);
        self.guard.pop_hash(&self.route.to_string());
        let outcomes = self.guard.dispatch_pending();
        self.apply_outcomes(outcomes);
    }

    /// The back gesture. Returns true when it left the first history entry.
    fn back(&mut self) -> bool {
        let outcomes = self.guard.press_back();
        self.apply_outcomes(outcomes)
    }

    fn apply_outcomes(&mut self, outcomes: Vec<BackOutcome>) -> bool {
        for outcome in outcomes {
            debug!(?outcome, "navigation outcome");
            match outcome {
                BackOutcome::Exited => return true,
                BackOutcome::Navigated {
                    popped: Some(frame),
                    ..
                } => {
                    if self.overlay.as_ref().is_some_and(|o| o.frame == frame) {
                        if let Some(overlay) = self.overlay.take() {
                            overlay.cancel_flag.store(true, Ordering::SeqCst);
                        }
                        self.guard.pop_hash(&self.route.to_string());
                    }
                }
                BackOutcome::Navigated { popped: None, hash } => match Route::parse(&hash) {
                    Some(route) if route != self.route => self.switch_route(route, false),
                    _ => {}
                },
                BackOutcome::Vetoed | BackOutcome::Restored | BackOutcome::Programmatic => {}
            }
        }
        false
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Some(response) = self.loader.try_recv() {
            self.handle_page(response.id, response.result);
            changed = true;
        }
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn handle_page(&mut self, id: u64, result: Result<Page<Post<RawPost>>, SourceError>) {
        match self.pager.complete(id, result) {
            Completion::Stale => {}
            Completion::Page(Page {
                items,
                next,
                failures,
            }) => {
                self.posts.extend(items);
                if self.list_state.selected().is_none() && !self.posts.is_empty() {
                    self.list_state.select(Some(0));
                }
                self.status_message = if let Some(first) = failures.first() {
                    format!("{} of the feeds failed: {first}", failures.len())
                } else if self.posts.is_empty() {
                    "No posts.".to_string()
                } else if next.is_none() {
                    format!("{} posts, end of feed.", self.posts.len())
                } else {
                    format!("{} posts", self.posts.len())
                };
                self.maybe_load_more();
            }
            Completion::Failed(err) => {
                warn!(route = %self.route.redacted(), error = %err, "page failed");
                self.status_message = if err.is_retryable() {
                    format!("Failed to load {}: {err}. Press r to retry.", self.route)
                } else {
                    format!("Failed to load {}: {err}", self.route)
                };
            }
        }
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Comments { request_id, result } => {
                let Some(overlay) = self.overlay.as_mut() else {
                    return;
                };
                if overlay.request_id != request_id || overlay.cancel_flag.load(Ordering::SeqCst) {
                    return;
                }
                overlay.loading = false;
                match result {
                    Ok(tree) => {
                        overlay.entries = flatten_comments(&tree);
                        overlay.collapsed.clear();
                        overlay.selected = 0;
                        overlay.rebuild_visible(None);
                        overlay.status = match overlay.entries.len() {
                            0 => "No comments yet.".to_string(),
                            1 => "1 comment".to_string(),
                            n => format!("{n} comments"),
                        };
                    }
                    Err(err) => {
                        warn!(error = %err, "comments failed");
                        overlay.status = format!("Failed to load comments: {err}. Press r to retry.");
                    }
                }
            }
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(self.theme.bg)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
        } else {
            self.status_message.clone()
        };
        let status_color = if matches!(self.pager.state(), PagingState::Failed(_)) {
            self.theme.error
        } else {
            self.theme.text
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(status_color)
                .bg(self.theme.selected_bg)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        self.draw_posts(frame, layout[1]);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(self.theme.text_dim)
                    .bg(self.theme.panel_bg)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[2]);

        if self.overlay.is_some() {
            self.draw_comments(frame, centered_rect(92, 92, layout[1]));
        }
    }

    fn footer_text(&self) -> String {
        if self.overlay.is_some() {
            "j/k move · space collapse · o open · r retry · Esc close · b back · q quit".into()
        } else {
            "j/k move · Enter comments · o open · s sort · r retry · 1-9 bookmarks · B bookmark · b back · q quit".into()
        }
    }

    fn draw_posts(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let now = Utc::now();
        let title = format!(" {} · {} ", self.route.prefix.label(), self.route);
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.border))
            .title(Span::styled(
                title,
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ))
            .style(Style::default().bg(self.theme.panel_bg));
        let width = block.inner(area).width.saturating_sub(1) as usize;

        let title_style = Style::default()
            .fg(self.theme.text)
            .add_modifier(Modifier::BOLD);
        let meta_style = Style::default().fg(self.theme.text_dim);
        let mut items: Vec<ListItem> = self
            .posts
            .iter()
            .map(|post| {
                let mut lines = wrap_with_prefixes(&post_title(post), width, "", "", title_style);
                lines.push(Line::from(Span::styled(post_meta(post, now), meta_style)));
                lines.push(Line::from(""));
                ListItem::new(lines)
            })
            .collect();
        match self.pager.state() {
            PagingState::Exhausted if !self.posts.is_empty() => {
                items.push(ListItem::new(Span::styled("· end of feed ·", meta_style)));
            }
            PagingState::Failed(err) => {
                items.push(ListItem::new(Span::styled(
                    format!("Failed: {err} (r to retry)"),
                    Style::default().fg(self.theme.error),
                )));
            }
            _ => {}
        }

        let list = List::new(items)
            .block(block)
            .highlight_style(Style::default().bg(self.theme.selected_bg));
        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn draw_comments(&self, frame: &mut Frame<'_>, area: Rect) {
        let Some(overlay) = self.overlay.as_ref() else {
            return;
        };
        let now = Utc::now();
        frame.render_widget(Clear, area);
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.accent))
            .title(Span::styled(
                format!(" {} ", post_title(&overlay.post)),
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ))
            .style(Style::default().bg(self.theme.panel_bg));
        let inner = block.inner(area);
        let width = inner.width.saturating_sub(1) as usize;

        let text_style = Style::default().fg(self.theme.text);
        let dim_style = Style::default().fg(self.theme.text_dim);
        let mut lines: Vec<Line<'static>> = Vec::new();
        lines.push(Line::from(Span::styled(post_meta(&overlay.post, now), dim_style)));
        if !overlay.post.body.trim().is_empty() {
            lines.push(Line::from(""));
            lines.extend(wrap_with_prefixes(&overlay.post.body, width, "", "", text_style));
        }
        lines.push(Line::from(""));
        let status = if overlay.loading {
            format!("{} {}", self.spinner.frame(), overlay.status)
        } else {
            overlay.status.clone()
        };
        lines.push(Line::from(Span::styled(
            status,
            dim_style.add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(""));

        let mut selected_line = 0usize;
        for (visible_index, entry_index) in overlay.visible.iter().enumerate() {
            let Some(entry) = overlay.entries.get(*entry_index) else {
                continue;
            };
            let selected = visible_index == overlay.selected;
            let background = if selected {
                self.theme.selected_bg
            } else {
                self.theme.panel_bg
            };
            let mut meta_style = Style::default()
                .fg(comment_depth_color(entry.depth))
                .bg(background);
            if selected {
                meta_style = meta_style.add_modifier(Modifier::BOLD);
                selected_line = lines.len();
            }
            let body_style = Style::default().fg(self.theme.text).bg(background);
            let collapsed = overlay.collapsed.contains(entry_index);
            let mut entry_lines =
                comment_lines(entry, width, collapsed, now, meta_style, body_style);
            if selected {
                pad_lines_to_width(&mut entry_lines, inner.width);
            }
            lines.extend(entry_lines);
            lines.push(Line::from(""));
        }

        let scroll = selected_line.saturating_sub(inner.height as usize / 3);
        let paragraph = Paragraph::new(Text::from(lines))
            .block(block)
            .scroll((scroll.min(u16::MAX as usize) as u16, 0));
        frame.render_widget(paragraph, area);
    }
}
