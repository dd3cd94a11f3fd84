//! Output pane contents and the per-tick drain of the event queue.

use crate::model::{Channel, DisplayEvent};
use crate::queue::EventReceiver;

/// Display lines kept before the oldest are dropped. The raw text is kept whole.
const MAX_LINES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedLine {
    pub text: String,
    pub channel: Channel,
}

/// Rendered engine output, in arrival order.
#[derive(Debug)]
pub struct OutputFeed {
    lines: Vec<FeedLine>,
    raw: String,
    tab_width: usize,
}

impl OutputFeed {
    pub fn new(tab_width: usize) -> Self {
        Self {
            lines: Vec::new(),
            raw: String::new(),
            tab_width: tab_width.max(1),
        }
    }

    /// Append an event. Multi-line payloads become one line each.
    pub fn push(&mut self, ev: DisplayEvent) {
        self.raw.push_str(&ev.payload);
        self.raw.push('\n');
        for line in ev.payload.split('\n') {
            self.lines.push(FeedLine {
                text: expand_tabs(line, self.tab_width),
                channel: ev.channel,
            });
        }
        if self.lines.len() > MAX_LINES {
            let _ = self.lines.drain(0..(self.lines.len() - MAX_LINES));
        }
    }

    pub fn lines(&self) -> &[FeedLine] {
        &self.lines
    }

    pub fn tab_width(&self) -> usize {
        self.tab_width
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.raw.clear();
    }

    /// Everything received since the last clear, as the engine wrote it.
    pub fn text(&self) -> &str {
        &self.raw
    }
}

/// Take at most `budget` events without waiting. Returns how many were taken.
pub fn poll_tick(rx: &mut EventReceiver, feed: &mut OutputFeed, budget: usize) -> usize {
    let mut taken = 0;
    while taken < budget {
        let Some(ev) = rx.try_take() else {
            break;
        };
        feed.push(ev);
        taken += 1;
    }
    taken
}

pub(super) fn expand_tabs(line: &str, width: usize) -> String {
    if !line.contains('\t') {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + width * 4);
    let mut col = 0;
    for c in line.chars() {
        if c == '\t' {
            let pad = width - col % width;
            out.extend(std::iter::repeat(' ').take(pad));
            col += pad;
        } else {
            out.push(c);
            col += 1;
        }
    }
    out
}
