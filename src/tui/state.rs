use super::feed::OutputFeed;
use crate::cli::RunInputs;
use crate::model::{DisplayEvent, EngineOptions, RunNotice};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::path::PathBuf;

/// Dump mode used when the toggle is switched on without one given on the command line.
pub const DEFAULT_DUMP_MODE: &str = "error";

/// The run the controller last reported as started and not yet finished.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub run: u64,
    pub pid: Option<u32>,
    pub workspace: PathBuf,
    pub started_at: String,
    pub keep: bool,
}

pub struct UiState {
    pub inputs: RunInputs,
    pub options: EngineOptions,
    pub dump_mode: String,
    pub keep: bool,
    pub feed: OutputFeed,
    /// Lines scrolled up from the bottom of the output pane.
    pub scroll: usize,
    pub info: String,
    pub info_is_error: bool,
    pub active: Option<ActiveRun>,
    pub show_help: bool,
}

impl UiState {
    pub fn new(inputs: RunInputs, options: EngineOptions, keep: bool, tab_width: usize) -> Self {
        let dump_mode = options
            .dump
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_DUMP_MODE.to_string());
        Self {
            inputs,
            options,
            dump_mode,
            keep,
            feed: OutputFeed::new(tab_width),
            scroll: 0,
            info: "Press r to run, ? for help".into(),
            info_is_error: false,
            active: None,
            show_help: false,
        }
    }

    pub fn set_info(&mut self, msg: impl Into<String>) {
        self.info = msg.into();
        self.info_is_error = false;
    }

    pub fn toggle_dump(&mut self) {
        self.options.dump = match self.options.dump {
            Some(_) => None,
            None => Some(self.dump_mode.clone()),
        };
    }

    pub fn apply_notice(&mut self, notice: RunNotice) {
        match notice {
            RunNotice::Started {
                run,
                pid,
                workspace,
            } => {
                let started_at = clock_now();
                self.set_info(format!("Run {run} started at {started_at}"));
                self.active = Some(ActiveRun {
                    run,
                    pid,
                    workspace,
                    started_at,
                    keep: self.keep,
                });
            }
            RunNotice::Finished { run } => {
                let finished = match self.active.take() {
                    Some(a) if a.run == run => a,
                    // A newer run is already active; this one was replaced.
                    other => {
                        self.active = other;
                        return;
                    }
                };
                if finished.keep {
                    self.set_info(format!(
                        "Run {run} finished, kept {}",
                        finished.workspace.display()
                    ));
                } else {
                    self.set_info(format!("Run {run} finished"));
                }
            }
            RunNotice::Failed(msg) => {
                self.info = msg.lines().next().unwrap_or_default().to_string();
                self.info_is_error = true;
                self.feed.push(DisplayEvent::error(msg));
            }
            RunNotice::Info(msg) => self.set_info(msg),
            RunNotice::Formatted { program, data } => {
                if let Some(p) = program {
                    self.inputs.program = p;
                }
                if let Some(d) = data {
                    self.inputs.data = d;
                }
                self.set_info("Formatted");
            }
        }
    }

    pub fn scroll_up(&mut self, n: usize) {
        let max = self.feed.lines().len().saturating_sub(1);
        self.scroll = (self.scroll + n).min(max);
    }

    pub fn scroll_down(&mut self, n: usize) {
        self.scroll = self.scroll.saturating_sub(n);
    }
}

fn clock_now() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(time::macros::format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    status_area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Borders take two columns on each side.
    let usable_width = status_area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}
