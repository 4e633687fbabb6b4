use std::collections::VecDeque;

/// Marker stored on history entries owned by the navigation guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// The entry directly below the sentinel. Arriving here means the user went back.
    Base,
    /// The synthetic entry pushed so a back press stays interceptable.
    Sentinel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    PopState { marker: Option<Marker>, hash: String },
    /// Navigation moved before the first entry; the session is over.
    Exit,
}

/// The subset of a browser's History API the guard relies on.
///
/// `go` never dispatches synchronously. The resulting pop-state is queued and
/// handed out by `next_event`, mirroring how a browser delivers `popstate`
/// through its event loop.
pub trait History: Send {
    fn state(&self) -> Option<Marker>;
    fn hash(&self) -> String;
    fn push_state(&mut self, marker: Option<Marker>, hash: Option<&str>);
    fn replace_state(&mut self, marker: Option<Marker>, hash: Option<&str>);
    fn go(&mut self, delta: isize);
    fn len(&self) -> usize;
    fn next_event(&mut self) -> Option<HistoryEvent>;

    fn back(&mut self) {
        self.go(-1);
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    marker: Option<Marker>,
    hash: String,
}

/// In-memory session history.
#[derive(Debug, Clone)]
pub struct SessionHistory {
    entries: Vec<Entry>,
    index: usize,
    events: VecDeque<HistoryEvent>,
}

impl SessionHistory {
    pub fn new(initial_hash: &str) -> Self {
        Self {
            entries: vec![Entry {
                marker: None,
                hash: initial_hash.to_string(),
            }],
            index: 0,
            events: VecDeque::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }
}

impl History for SessionHistory {
    fn state(&self) -> Option<Marker> {
        self.entries[self.index].marker
    }

    fn hash(&self) -> String {
        self.entries[self.index].hash.clone()
    }

    fn push_state(&mut self, marker: Option<Marker>, hash: Option<&str>) {
        let hash = hash
            .map(str::to_string)
            .unwrap_or_else(|| self.entries[self.index].hash.clone());
        self.entries.truncate(self.index + 1);
        self.entries.push(Entry { marker, hash });
        self.index = self.entries.len() - 1;
    }

    fn replace_state(&mut self, marker: Option<Marker>, hash: Option<&str>) {
        let entry = &mut self.entries[self.index];
        entry.marker = marker;
        if let Some(hash) = hash {
            entry.hash = hash.to_string();
        }
    }

    fn go(&mut self, delta: isize) {
        if delta == 0 {
            return;
        }
        let target = self.index as isize + delta;
        if target < 0 {
            self.events.push_back(HistoryEvent::Exit);
            return;
        }
        let target = target as usize;
        if target >= self.entries.len() {
            return;
        }
        self.index = target;
        let entry = &self.entries[target];
        self.events.push_back(HistoryEvent::PopState {
            marker: entry.marker,
            hash: entry.hash.clone(),
        });
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn next_event(&mut self) -> Option<HistoryEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_truncates_forward_entries() {
        let mut history = SessionHistory::new("r/all");
        history.push_state(None, Some("r/rust"));
        history.push_state(None, Some("r/linux"));
        history.go(-2);
        history.push_state(None, Some("hn/top"));
        assert_eq!(history.len(), 2);
        assert_eq!(history.hash(), "hn/top");
    }

    #[test]
    fn go_queues_pop_state_instead_of_dispatching() {
        let mut history = SessionHistory::new("r/all");
        history.push_state(Some(Marker::Sentinel), None);
        history.back();
        assert_eq!(history.state(), None);
        assert_eq!(
            history.next_event(),
            Some(HistoryEvent::PopState {
                marker: None,
                hash: "r/all".into()
            })
        );
        assert_eq!(history.next_event(), None);
    }

    #[test]
    fn going_before_first_entry_exits() {
        let mut history = SessionHistory::new("r/all");
        history.back();
        assert_eq!(history.next_event(), Some(HistoryEvent::Exit));
        assert_eq!(history.index(), 0);
    }

    #[test]
    fn going_past_last_entry_is_ignored() {
        let mut history = SessionHistory::new("r/all");
        history.go(1);
        assert_eq!(history.pending_events(), 0);
    }
}
