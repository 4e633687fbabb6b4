//! Back and escape interception for nested overlays.
//!
//! There is one back gesture and one escape key per session, so a single
//! [`Guard`] multiplexes them across a stack of frames. Only the callbacks of
//! the topmost frame are ever consulted.

use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::history::{History, HistoryEvent, Marker};

pub type BackCallback = Arc<dyn Fn() -> bool + Send + Sync>;
pub type EscapeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EscapeHandle(u64);

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("navigation guard already installed")]
    AlreadyInstalled,
}

/// What a single pop-state did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackOutcome {
    /// A back callback on the top frame said no; history was pushed forward again.
    Vetoed,
    /// The back gesture went through. `popped` is the frame it closed, if any.
    Navigated { popped: Option<FrameId>, hash: String },
    /// The balancing back issued by `remove_back`.
    Programmatic,
    /// Arrived back on the sentinel after a veto.
    Restored,
    /// Went back past the first entry.
    Exited,
}

struct Frame {
    id: FrameId,
    back: Vec<(BackHandle, BackCallback)>,
    escape: Vec<(EscapeHandle, EscapeCallback)>,
}

impl Frame {
    fn new(id: FrameId) -> Self {
        Self {
            id,
            back: Vec::new(),
            escape: Vec::new(),
        }
    }
}

struct State {
    history: Box<dyn History>,
    frames: Vec<Frame>,
    next_id: u64,
    in_pop_state: bool,
    suppressed: usize,
    hashes: Vec<String>,
    pending_hash: Option<String>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn arm_sentinel(&mut self) {
        if self.history.state() == Some(Marker::Sentinel) {
            return;
        }
        trace!(len = self.history.len(), "installing history sentinel");
        self.history.replace_state(Some(Marker::Base), None);
        self.history.push_state(Some(Marker::Sentinel), None);
    }

    fn push_frame(&mut self) -> FrameId {
        self.pending_hash = None;
        let id = FrameId(self.next_id());
        self.frames.push(Frame::new(id));
        self.arm_sentinel();
        debug!(frame = id.0, depth = self.frames.len(), "pushed navigation frame");
        id
    }

    fn top_frame_mut(&mut self) -> &mut Frame {
        if self.frames.is_empty() {
            self.push_frame();
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}

/// The navigation and escape guard. Cheap to clone; clones share one stack.
#[derive(Clone)]
pub struct Guard {
    inner: Arc<Mutex<State>>,
}

static GLOBAL: OnceCell<Guard> = OnceCell::new();

/// Installs the process-wide guard. Only the first call succeeds.
pub fn install<H: History + 'static>(history: H) -> Result<&'static Guard, GuardError> {
    let mut installed = false;
    let guard = GLOBAL.get_or_init(|| {
        installed = true;
        Guard::new(history)
    });
    if installed {
        Ok(guard)
    } else {
        Err(GuardError::AlreadyInstalled)
    }
}

pub fn global() -> Option<&'static Guard> {
    GLOBAL.get()
}

impl Guard {
    pub fn new<H: History + 'static>(history: H) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State {
                history: Box::new(history),
                frames: Vec::new(),
                next_id: 0,
                in_pop_state: false,
                suppressed: 0,
                hashes: Vec::new(),
                pending_hash: None,
            })),
        }
    }

    pub fn push_frame(&self) -> FrameId {
        self.inner.lock().push_frame()
    }

    /// Pops the top frame, dropping its callbacks.
    pub fn pop_frame(&self) -> Option<FrameId> {
        let mut state = self.inner.lock();
        let frame = state.frames.pop()?;
        debug!(frame = frame.id.0, depth = state.frames.len(), "popped navigation frame");
        Some(frame.id)
    }

    /// Pops `id` if it is still on the stack. Closing a frame that a back
    /// gesture already popped is a no-op; closing one that still has children
    /// above it breaks the nesting invariant and panics.
    pub fn close_frame(&self, id: FrameId) -> bool {
        let mut state = self.inner.lock();
        let Some(position) = state.frames.iter().position(|frame| frame.id == id) else {
            return false;
        };
        assert_eq!(
            position,
            state.frames.len() - 1,
            "navigation frame closed before its children"
        );
        state.frames.pop();
        debug!(frame = id.0, depth = state.frames.len(), "closed navigation frame");
        true
    }

    pub fn depth(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn top_frame(&self) -> Option<FrameId> {
        self.inner.lock().frames.last().map(|frame| frame.id)
    }

    /// Registers on the top frame, creating a root frame if the stack is empty.
    pub fn register_back<F>(&self, callback: F) -> BackHandle
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.register_back_arc(Arc::new(callback))
    }

    pub fn register_back_arc(&self, callback: BackCallback) -> BackHandle {
        let mut state = self.inner.lock();
        let handle = BackHandle(state.next_id());
        state.top_frame_mut().back.push((handle, callback));
        handle
    }

    /// Removes the registration wherever it lives. Unknown handles are ignored.
    ///
    /// A removal outside a pop-state steps back off the sentinel so the history
    /// does not collect phantom entries; the resulting pop-state is swallowed.
    /// A frame owns one sentinel, so only the first removal while it is the
    /// current entry moves history.
    pub fn remove_back(&self, handle: BackHandle) {
        let mut state = self.inner.lock();
        let mut removed = false;
        for frame in state.frames.iter_mut().rev() {
            if let Some(position) = frame.back.iter().position(|(h, _)| *h == handle) {
                frame.back.remove(position);
                removed = true;
                break;
            }
        }
        if !removed {
            return;
        }
        let on_sentinel = state.history.state() == Some(Marker::Sentinel);
        if !state.in_pop_state && on_sentinel && state.suppressed == 0 {
            trace!(handle = handle.0, "balancing history after back callback removal");
            state.suppressed += 1;
            state.history.back();
        }
    }

    pub fn register_escape<F>(&self, callback: F) -> EscapeHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.inner.lock();
        let handle = EscapeHandle(state.next_id());
        state.top_frame_mut().escape.push((handle, Arc::new(callback)));
        handle
    }

    pub fn remove_escape(&self, handle: EscapeHandle) {
        let mut state = self.inner.lock();
        for frame in state.frames.iter_mut().rev() {
            if let Some(position) = frame.escape.iter().position(|(h, _)| *h == handle) {
                frame.escape.remove(position);
                return;
            }
        }
    }

    /// Every back callback on the top frame runs; any single `false` vetoes.
    pub fn can_navigate_back(&self) -> bool {
        let callbacks = self.top_back_callbacks();
        evaluate(&callbacks)
    }

    fn top_back_callbacks(&self) -> Vec<BackCallback> {
        let state = self.inner.lock();
        state
            .frames
            .last()
            .map(|frame| frame.back.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    /// Fires every escape callback on the top frame. Returns how many ran.
    pub fn escape(&self) -> usize {
        let callbacks: Vec<EscapeCallback> = {
            let state = self.inner.lock();
            state
                .frames
                .last()
                .map(|frame| frame.escape.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for callback in &callbacks {
            callback();
        }
        callbacks.len()
    }

    pub fn handle_key(&self, key: &KeyEvent) -> usize {
        if key.code == KeyCode::Esc {
            self.escape()
        } else {
            0
        }
    }

    /// The physical back gesture: step history back and handle what it produced.
    pub fn press_back(&self) -> Vec<BackOutcome> {
        self.inner.lock().history.back();
        self.dispatch_pending()
    }

    /// Drains queued history events in order.
    pub fn dispatch_pending(&self) -> Vec<BackOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let event = self.inner.lock().history.next_event();
            let Some(event) = event else {
                break;
            };
            outcomes.push(self.handle_event(event));
        }
        outcomes
    }

    pub fn handle_event(&self, event: HistoryEvent) -> BackOutcome {
        let (marker, hash) = match event {
            HistoryEvent::Exit => {
                let mut state = self.inner.lock();
                state.suppressed = state.suppressed.saturating_sub(1);
                state.pending_hash = None;
                return BackOutcome::Exited;
            }
            HistoryEvent::PopState { marker, hash } => (marker, hash),
        };

        let (frame, callbacks) = {
            let mut state = self.inner.lock();
            let pending = state.pending_hash.take();
            if state.suppressed > 0 {
                state.suppressed -= 1;
                // The hash popped while this back was in flight belongs on the
                // entry it landed on.
                if let Some(pending) = pending {
                    let marker = state.history.state();
                    state.history.replace_state(marker, Some(&pending));
                }
                if !state.frames.is_empty() {
                    state.arm_sentinel();
                }
                return BackOutcome::Programmatic;
            }
            if marker == Some(Marker::Sentinel) {
                return BackOutcome::Restored;
            }
            let Some(top) = state.frames.last() else {
                return BackOutcome::Navigated { popped: None, hash };
            };
            let frame = top.id;
            let callbacks: Vec<BackCallback> = top.back.iter().map(|(_, cb)| cb.clone()).collect();
            state.in_pop_state = true;
            (frame, callbacks)
        };

        let allowed = evaluate(&callbacks);

        let mut state = self.inner.lock();
        state.in_pop_state = false;
        if !allowed {
            debug!(frame = frame.0, "back navigation vetoed");
            state.history.go(1);
            return BackOutcome::Vetoed;
        }

        let popped = if state.frames.last().map(|f| f.id) == Some(frame) {
            state.frames.pop();
            Some(frame)
        } else {
            None
        };
        if !state.frames.is_empty() {
            state.arm_sentinel();
        }
        debug!(frame = frame.0, depth = state.frames.len(), "back navigation allowed");
        BackOutcome::Navigated {
            popped,
            hash: state.history.hash(),
        }
    }

    pub fn hash(&self) -> String {
        self.inner.lock().history.hash()
    }

    /// Pushes a plain route entry.
    pub fn navigate(&self, hash: &str) {
        let mut state = self.inner.lock();
        state.pending_hash = None;
        state.history.push_state(None, Some(hash));
        if !state.frames.is_empty() {
            state.arm_sentinel();
        }
    }

    /// Rewrites the current entry's hash, remembering the previous one.
    pub fn push_hash(&self, hash: &str) {
        let mut state = self.inner.lock();
        let current = state.history.hash();
        if current == hash {
            return;
        }
        debug!(from = %current, to = %hash, "pushing hash");
        state.hashes.push(current);
        let marker = state.history.state();
        state.history.replace_state(marker, Some(hash));
    }

    /// Restores the hash saved by the matching `push_hash`, or `fallback`.
    ///
    /// With a balancing back still undelivered, the hash is also kept until
    /// that pop-state lands so it ends up on the entry history settles on.
    pub fn pop_hash(&self, fallback: &str) -> String {
        let mut state = self.inner.lock();
        let hash = state.hashes.pop().unwrap_or_else(|| fallback.to_string());
        debug!(to = %hash, "popping hash");
        let marker = state.history.state();
        state.history.replace_state(marker, Some(&hash));
        state.pending_hash = if state.suppressed > 0 {
            Some(hash.clone())
        } else {
            None
        };
        hash
    }
}

fn evaluate(callbacks: &[BackCallback]) -> bool {
    let mut allowed = true;
    for callback in callbacks {
        if !callback() {
            allowed = false;
        }
    }
    allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::SessionHistory;
    use crossterm::event::KeyModifiers;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn guard() -> Guard {
        Guard::new(SessionHistory::new("r/all"))
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = count.clone();
        (count, move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn only_top_frame_is_consulted() {
        let guard = guard();
        guard.push_frame();
        guard.register_back(|| false);
        guard.push_frame();
        assert!(guard.can_navigate_back());
        guard.pop_frame();
        assert!(!guard.can_navigate_back());
        guard.pop_frame();
        assert!(guard.can_navigate_back());
    }

    #[test]
    fn single_veto_blocks_regardless_of_position() {
        for veto_at in 0..4 {
            let guard = guard();
            guard.push_frame();
            let (calls, _) = counter();
            for i in 0..4 {
                let calls = calls.clone();
                guard.register_back(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    i != veto_at
                });
            }
            assert!(!guard.can_navigate_back(), "veto at {veto_at}");
            assert_eq!(calls.load(Ordering::SeqCst), 4);
        }
    }

    #[test]
    fn removal_is_idempotent() {
        let guard = guard();
        guard.push_frame();
        let handle = guard.register_back(|| false);
        guard.remove_back(handle);
        assert!(guard.can_navigate_back());
        guard.remove_back(handle);
        assert_eq!(guard.dispatch_pending(), vec![BackOutcome::Programmatic]);
    }

    #[test]
    fn removal_searches_every_frame() {
        let guard = guard();
        guard.push_frame();
        let lower = guard.register_back(|| false);
        guard.push_frame();
        guard.remove_back(lower);
        guard.dispatch_pending();
        guard.pop_frame();
        assert!(guard.can_navigate_back());
    }

    #[test]
    fn duplicate_registrations_have_distinct_handles() {
        let guard = guard();
        let veto: BackCallback = Arc::new(|| false);
        guard.push_frame();
        let first = guard.register_back_arc(veto.clone());
        guard.push_frame();
        let second = guard.register_back_arc(veto);
        assert_ne!(first, second);
        guard.remove_back(second);
        guard.dispatch_pending();
        assert!(guard.can_navigate_back());
        guard.pop_frame();
        assert!(!guard.can_navigate_back());
    }

    #[test]
    fn removing_every_callback_of_a_frame_steps_back_once() {
        let guard = guard();
        guard.navigate("r/rust");
        let frame = guard.push_frame();
        let first = guard.register_back(|| true);
        let second = guard.register_back(|| true);
        guard.remove_back(first);
        guard.remove_back(second);
        guard.close_frame(frame);
        assert_eq!(guard.dispatch_pending(), vec![BackOutcome::Programmatic]);
        assert_eq!(guard.hash(), "r/rust");
        assert_eq!(guard.inner.lock().history.len(), 3);
        assert_eq!(
            guard.press_back(),
            vec![BackOutcome::Navigated {
                popped: None,
                hash: "r/all".into()
            }]
        );
    }

    #[test]
    fn removals_on_a_fresh_history_never_exit() {
        let guard = guard();
        guard.push_frame();
        let first = guard.register_back(|| true);
        let second = guard.register_back(|| true);
        guard.remove_back(first);
        guard.remove_back(second);
        assert_eq!(guard.dispatch_pending(), vec![BackOutcome::Programmatic]);
        assert_eq!(guard.inner.lock().history.state(), Some(Marker::Sentinel));
    }

    #[test]
    fn exit_consumes_an_outstanding_balancing_back() {
        let guard = guard();
        guard.push_frame();
        let handle = guard.register_back(|| true);
        guard.remove_back(handle);
        assert_eq!(guard.handle_event(HistoryEvent::Exit), BackOutcome::Exited);
        assert_eq!(guard.inner.lock().suppressed, 0);
    }

    #[test]
    fn popped_hash_follows_the_balancing_back() {
        let guard = guard();
        let frame = guard.push_frame();
        let handle = guard.register_back(|| true);
        guard.push_hash("r/all/comments/0");
        guard.remove_back(handle);
        guard.close_frame(frame);
        assert_eq!(guard.pop_hash("r/all"), "r/all");
        assert_eq!(guard.dispatch_pending(), vec![BackOutcome::Programmatic]);
        assert_eq!(guard.hash(), "r/all");
        assert!(guard.inner.lock().pending_hash.is_none());
    }

    #[test]
    fn vetoed_back_keeps_the_current_route_after_an_earlier_overlay() {
        let guard = guard();
        guard.push_frame();
        guard.push_hash("r/all/comments/0");
        guard.pop_frame();
        guard.pop_hash("r/all");
        guard.navigate("r/rust");
        guard.push_frame();
        guard.register_back(|| false);
        assert_eq!(guard.press_back(), vec![BackOutcome::Vetoed, BackOutcome::Restored]);
        assert_eq!(guard.hash(), "r/rust");
    }

    #[test]
    fn removing_from_popped_frame_is_silent() {
        let guard = guard();
        guard.push_frame();
        let handle = guard.register_back(|| true);
        let escape = guard.register_escape(|| {});
        guard.pop_frame();
        let before = guard.inner.lock().history.len();
        guard.remove_back(handle);
        guard.remove_escape(escape);
        assert!(guard.dispatch_pending().is_empty());
        assert_eq!(guard.inner.lock().history.len(), before);
    }

    #[test]
    fn escape_fires_top_frame_once_each() {
        let guard = guard();
        guard.push_frame();
        let (lower, lower_cb) = counter();
        guard.register_escape(lower_cb);
        guard.push_frame();
        let (a, a_cb) = counter();
        let (b, b_cb) = counter();
        guard.register_escape(a_cb);
        guard.register_escape(b_cb);

        let esc = KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE);
        assert_eq!(guard.handle_key(&esc), 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(lower.load(Ordering::SeqCst), 0);

        let other = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert_eq!(guard.handle_key(&other), 0);
    }

    #[test]
    fn escape_callback_may_pop_its_own_frame() {
        let guard = guard();
        guard.push_frame();
        guard.push_frame();
        let inner = guard.clone();
        guard.register_escape(move || {
            inner.pop_frame();
        });
        assert_eq!(guard.escape(), 1);
        assert_eq!(guard.depth(), 1);
    }

    #[test]
    fn vetoed_back_restores_then_next_frame_navigates() {
        let guard = guard();
        guard.push_frame();
        guard.register_back(|| false);
        let outcomes = guard.press_back();
        assert_eq!(outcomes, vec![BackOutcome::Vetoed, BackOutcome::Restored]);
        assert_eq!(guard.hash(), "r/all");
        assert_eq!(guard.inner.lock().history.state(), Some(Marker::Sentinel));

        guard.pop_frame();
        let b = guard.push_frame();
        let outcomes = guard.press_back();
        assert_eq!(
            outcomes,
            vec![BackOutcome::Navigated {
                popped: Some(b),
                hash: "r/all".into()
            }]
        );
        assert_eq!(guard.depth(), 0);
    }

    #[test]
    fn sentinel_is_reused_when_already_present() {
        let guard = guard();
        guard.push_frame();
        let len = guard.inner.lock().history.len();
        guard.push_frame();
        assert_eq!(guard.inner.lock().history.len(), len);
    }

    #[test]
    fn navigation_rearms_sentinel_for_remaining_frames() {
        let guard = guard();
        let outer = guard.push_frame();
        guard.register_back(|| false);
        guard.push_frame();
        guard.press_back();
        assert_eq!(guard.top_frame(), Some(outer));
        assert_eq!(guard.inner.lock().history.state(), Some(Marker::Sentinel));
        assert_eq!(guard.press_back(), vec![BackOutcome::Vetoed, BackOutcome::Restored]);
    }

    #[test]
    fn back_without_frames_is_plain_navigation() {
        let guard = guard();
        guard.navigate("r/rust");
        assert_eq!(
            guard.press_back(),
            vec![BackOutcome::Navigated {
                popped: None,
                hash: "r/all".into()
            }]
        );
        assert_eq!(guard.press_back(), vec![BackOutcome::Exited]);
    }

    #[test]
    fn callbacks_can_remove_themselves_during_pop_state() {
        let guard = guard();
        guard.push_frame();
        let slot: Arc<Mutex<Option<BackHandle>>> = Arc::new(Mutex::new(None));
        let inner = guard.clone();
        let own = slot.clone();
        let handle = guard.register_back(move || {
            if let Some(handle) = *own.lock() {
                inner.remove_back(handle);
            }
            true
        });
        *slot.lock() = Some(handle);
        let outcomes = guard.press_back();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], BackOutcome::Navigated { .. }));
    }

    #[test]
    fn hash_stack_round_trips() {
        let guard = guard();
        guard.push_frame();
        guard.push_hash("r/rust/comments/abc");
        assert_eq!(guard.hash(), "r/rust/comments/abc");
        assert_eq!(guard.pop_hash("r/all"), "r/all");
        assert_eq!(guard.hash(), "r/all");
        assert_eq!(guard.pop_hash("hn/top"), "hn/top");
    }

    #[test]
    #[should_panic(expected = "closed before its children")]
    fn closing_parent_before_child_panics() {
        let guard = guard();
        let parent = guard.push_frame();
        guard.push_frame();
        guard.close_frame(parent);
    }

    #[test]
    fn closing_already_popped_frame_is_noop() {
        let guard = guard();
        let frame = guard.push_frame();
        guard.press_back();
        assert!(!guard.close_frame(frame));
    }

    #[test]
    fn install_succeeds_once() {
        let first = install(SessionHistory::new("r/all"));
        let second = install(SessionHistory::new("r/all"));
        assert!(first.is_ok() || global().is_some());
        assert!(matches!(second, Err(GuardError::AlreadyInstalled)));
        assert!(global().is_some());
    }
}
