//! Cursor bookkeeping for infinite scroll and the worker that fetches pages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::source::{Adapter, Page, Post, SourceError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagingState {
    Idle,
    Loading,
    Exhausted,
    Failed(SourceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub id: u64,
    pub cursor: Option<String>,
}

#[derive(Debug)]
pub enum Completion<T> {
    /// The response belongs to a request that was reset or superseded.
    Stale,
    Page(Page<T>),
    Failed(SourceError),
}

/// `Idle -> Loading -> {Idle, Exhausted, Failed}`. Failed retries the same
/// cursor; Exhausted only leaves through `reset`.
#[derive(Debug)]
pub struct Pager {
    state: PagingState,
    cursor: Option<String>,
    next_id: u64,
    in_flight: Option<u64>,
}

impl Default for Pager {
    fn default() -> Self {
        Self::new()
    }
}

impl Pager {
    pub fn new() -> Self {
        Self {
            state: PagingState::Idle,
            cursor: None,
            next_id: 1,
            in_flight: None,
        }
    }

    pub fn state(&self) -> &PagingState {
        &self.state
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.state == PagingState::Loading
    }

    pub fn begin(&mut self) -> Option<PageRequest> {
        match self.state {
            PagingState::Idle | PagingState::Failed(_) => {}
            PagingState::Loading | PagingState::Exhausted => return None,
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.in_flight = Some(id);
        self.state = PagingState::Loading;
        Some(PageRequest {
            id,
            cursor: self.cursor.clone(),
        })
    }

    pub fn complete<T>(&mut self, id: u64, result: Result<Page<T>, SourceError>) -> Completion<T> {
        if self.in_flight != Some(id) {
            debug!(id, "dropping stale page");
            return Completion::Stale;
        }
        self.in_flight = None;
        match result {
            Ok(page) => {
                self.state = if page.next.is_none() {
                    PagingState::Exhausted
                } else {
                    PagingState::Idle
                };
                self.cursor = page.next.clone();
                Completion::Page(page)
            }
            Err(err) => {
                self.state = PagingState::Failed(err.clone());
                Completion::Failed(err)
            }
        }
    }

    /// Starts over from the first page. Responses still in flight become stale.
    pub fn reset(&mut self) {
        self.state = PagingState::Idle;
        self.cursor = None;
        self.in_flight = None;
    }

    pub fn cancel(&mut self) {
        self.in_flight = None;
        if self.state == PagingState::Loading {
            self.state = PagingState::Idle;
        }
    }
}

#[derive(Debug)]
pub struct PageResponse<T> {
    pub id: u64,
    pub result: Result<Page<T>, SourceError>,
}

/// Runs page requests for one source on worker threads.
pub struct Loader<S: Adapter> {
    source: Arc<S>,
    tx: Sender<PageResponse<Post<S::Raw>>>,
    rx: Receiver<PageResponse<Post<S::Raw>>>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl<S: Adapter + 'static> Loader<S> {
    pub fn new(source: Arc<S>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            source,
            tx,
            rx,
            cancel_flag: None,
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn spawn(&mut self, request: PageRequest) {
        self.cancel();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.cancel_flag = Some(cancel_flag.clone());
        let source = self.source.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = source.get_posts(request.cursor.as_deref());
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(PageResponse {
                id: request.id,
                result,
            });
        });
    }

    pub fn try_recv(&self) -> Option<PageResponse<Post<S::Raw>>> {
        self.rx.try_recv().ok()
    }

    pub fn cancel(&mut self) {
        if let Some(flag) = self.cancel_flag.take() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

impl<S: Adapter> Drop for Loader<S> {
    fn drop(&mut self) {
        if let Some(flag) = self.cancel_flag.take() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}
