use loopshare::{ReceivedFile, ServerEvent, ServerState};

const HISTORY_LEN: usize = 50;

/// Fixed-size ring of the most recent request lines.
pub struct History {
    history: Vec<Option<String>>,
    history_idx: usize,
}

impl History {
    pub fn new() -> History {
        History::with_capacity(HISTORY_LEN)
    }

    pub fn with_capacity(capacity: usize) -> History {
        History {
            history: vec![None; capacity.max(1)],
            history_idx: 0,
        }
    }

    pub fn push(&mut self, s: String) {
        self.history[self.history_idx] = Some(s);
        self.history_idx = (self.history_idx + 1) % self.capacity();
    }

    /// Newest first.
    pub fn iter(&self) -> HistoryIterator<'_> {
        HistoryIterator::new(self)
    }

    fn newest_idx(&self) -> usize {
        if self.history_idx == 0 {
            self.capacity() - 1
        } else {
            self.history_idx - 1
        }
    }

    pub fn capacity(&self) -> usize {
        self.history.len()
    }
}

pub struct HistoryIterator<'a> {
    data: &'a History,
    curr_idx: usize,
    remaining: usize,
}

impl HistoryIterator<'_> {
    fn new(hist: &History) -> HistoryIterator<'_> {
        HistoryIterator {
            data: hist,
            curr_idx: hist.newest_idx(),
            remaining: hist.capacity(),
        }
    }
}

impl<'a> Iterator for HistoryIterator<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let s = self.data.history[self.curr_idx].as_deref()?;
        self.curr_idx = if self.curr_idx == 0 {
            self.data.capacity() - 1
        } else {
            self.curr_idx - 1
        };
        Some(s)
    }
}

/// What the dashboard shows, folded from server events.
pub struct Dashboard {
    pub state: ServerState,
    pub last_file: Option<ReceivedFile>,
    pub history: History,
}

impl Dashboard {
    pub fn new() -> Dashboard {
        Dashboard {
            state: ServerState::default(),
            last_file: None,
            history: History::new(),
        }
    }

    pub fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::State(state) => self.state = state,
            ServerEvent::FileReceived(file) => self.last_file = Some(file),
            ServerEvent::Request(line) => self.history.push(line),
        }
    }
}

pub enum ControlEvent {
    Quit,
    /// Stop a running server, or start a stopped one.
    Toggle,
}
