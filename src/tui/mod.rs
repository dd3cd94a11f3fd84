mod export;
mod feed;
mod help;
mod state;

use crate::cli::{self, Cli, RunInputs};
use crate::engine::Supervisor;
use crate::model::{Channel, RunNotice};
use crate::orchestrator::{self, UiCommand};
use crate::queue::{event_queue, EventReceiver};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use state::{push_wrapped_status_kv, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const PAGE: usize = 10;

pub async fn run(args: Cli) -> Result<()> {
    let inputs = RunInputs::load(&args)?;

    let (events_tx, events_rx) = event_queue();
    let (notice_tx, notice_rx) = mpsc::unbounded_channel::<RunNotice>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let supervisor = Supervisor::new(cli::build_config(&args), events_tx);

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let ui_handle = std::thread::Builder::new()
        .name("miko-ui".into())
        .spawn(move || run_threaded(ui_args, inputs, events_rx, notice_rx, cmd_tx))
        .context("spawn UI thread")?;

    let res =
        orchestrator::run_controller(supervisor, args.celfmt.clone(), notice_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
///
/// The event receiver lives here; dropping it on exit ends any stream readers
/// still pushing output so the controller can reap the run.
fn run_threaded(
    args: Cli,
    inputs: RunInputs,
    mut events_rx: EventReceiver,
    mut notice_rx: UnboundedReceiver<RunNotice>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = match Terminal::new(backend).context("create terminal") {
        Ok(t) => t,
        Err(e) => {
            restore_terminal();
            return Err(e);
        }
    };
    terminal.clear().ok();

    let mut state = UiState::new(inputs, args.engine_options(), args.keep, args.tab_width);
    let tick_rate = Duration::from(args.poll);
    let mut last_tick = Instant::now();
    let mut dirty = true;

    loop {
        let taken = feed::poll_tick(&mut events_rx, &mut state.feed, args.max_events_per_tick);
        if taken > 0 {
            dirty = true;
        }
        while let Ok(notice) = notice_rx.try_recv() {
            state.apply_notice(notice);
            dirty = true;
        }

        if dirty && last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
            dirty = false;
        }

        if event::poll(tick_rate).unwrap_or(false) {
            match event::read() {
                Ok(Event::Key(k)) => {
                    if k.kind != KeyEventKind::Press {
                        continue;
                    }
                    dirty = true;
                    if handle_key(&args, &mut state, &cmd_tx, k) {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break;
                    }
                }
                Ok(Event::Resize(..)) => dirty = true,
                _ => {}
            }
        }
    }

    restore_terminal();
    Ok(())
}

fn restore_terminal() {
    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
}

/// Apply one key press. Returns true when the user asked to quit.
fn handle_key(
    args: &Cli,
    state: &mut UiState,
    cmd_tx: &UnboundedSender<UiCommand>,
    k: KeyEvent,
) -> bool {
    match (k.modifiers, k.code) {
        (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => return true,
        (_, KeyCode::Char('r')) => {
            state.scroll = 0;
            let req = state.inputs.request(state.options.clone(), state.keep);
            let _ = cmd_tx.send(UiCommand::Run(req));
        }
        (_, KeyCode::Char('x')) => {
            let _ = cmd_tx.send(UiCommand::Cancel);
        }
        (_, KeyCode::Char('f')) => {
            state.set_info("Formatting…");
            let _ = cmd_tx.send(UiCommand::Format {
                program: state.inputs.program.clone(),
                data: state.inputs.data.clone(),
            });
        }
        (_, KeyCode::Char('s')) => match export::copy_to_clipboard(&export::snarf(state)) {
            Ok(()) => state.set_info("✓ Copied txtar to clipboard"),
            Err(e) => {
                state.info = format!("Clipboard copy failed: {e:#}");
                state.info_is_error = true;
            }
        },
        (_, KeyCode::Char('l')) => {
            state.feed.clear();
            state.scroll = 0;
        }
        (_, KeyCode::Char('e')) => match RunInputs::load(args) {
            Ok(inputs) => {
                state.inputs = inputs;
                state.set_info("Reloaded inputs");
            }
            Err(e) => {
                state.info = format!("Reload failed: {e:#}");
                state.info_is_error = true;
            }
        },
        (_, KeyCode::Char('i')) => state.options.insecure = !state.options.insecure,
        (_, KeyCode::Char('g')) => state.options.log_requests = !state.options.log_requests,
        (_, KeyCode::Char('d')) => state.toggle_dump(),
        (_, KeyCode::Char('k')) => state.keep = !state.keep,
        (_, KeyCode::Char('?')) => state.show_help = !state.show_help,
        (_, KeyCode::Up) => state.scroll_up(1),
        (_, KeyCode::Down) => state.scroll_down(1),
        (_, KeyCode::PageUp) => state.scroll_up(PAGE),
        (_, KeyCode::PageDown) => state.scroll_down(PAGE),
        (_, KeyCode::End) => state.scroll = 0,
        _ => {}
    }
    false
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(6)].as_ref())
        .split(area);

    if state.show_help {
        help::draw_help(rows[0], f);
    } else {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)].as_ref())
            .split(rows[0]);
        draw_inputs(cols[0], f, state);
        draw_output(cols[1], f, state);
    }
    draw_status(rows[1], f, state);
}

fn draw_inputs(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let panes = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage(50),
                Constraint::Percentage(30),
                Constraint::Percentage(20),
            ]
            .as_ref(),
        )
        .split(area);

    let tab_width = state.feed.tab_width();
    for (rect, title, text) in [
        (panes[0], "Program", &state.inputs.program),
        (panes[1], "Data", &state.inputs.data),
        (panes[2], "Config", &state.inputs.config),
    ] {
        let lines: Vec<Line> = text
            .lines()
            .map(|l| Line::from(feed::expand_tabs(l, tab_width)))
            .collect();
        let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(p, rect);
    }
}

fn draw_output(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let lines = state.feed.lines();
    let height = area.height.saturating_sub(2) as usize;
    let end = lines.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(height);

    let visible: Vec<Line> = lines[start..end]
        .iter()
        .map(|l| match l.channel {
            Channel::Output => Line::from(l.text.clone()),
            Channel::Error => Line::from(Span::styled(
                l.text.clone(),
                Style::default().fg(Color::Red),
            )),
        })
        .collect();

    let title = if state.scroll > 0 {
        format!("Output (scrolled {} lines)", state.scroll)
    } else {
        "Output".to_string()
    };
    let p = Paragraph::new(visible).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn toggle_span(label: &str, on: bool) -> Span<'static> {
    let style = if on {
        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Span::styled(format!("[{label}]"), style)
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines: Vec<Line<'static>> = Vec::new();

    let info_style = if state.info_is_error {
        Style::default().fg(Color::Red)
    } else {
        Style::default()
    };
    lines.push(Line::from(Span::styled(state.info.clone(), info_style)));

    let dump_label = match state.options.dump.as_deref() {
        Some(mode) => format!("dump {mode}"),
        None => "dump".to_string(),
    };
    lines.push(Line::from(vec![
        toggle_span("insecure", state.options.insecure),
        Span::raw(" "),
        toggle_span("log requests", state.options.log_requests),
        Span::raw(" "),
        toggle_span(&dump_label, state.options.dump.is_some()),
        Span::raw(" "),
        toggle_span("keep", state.keep),
    ]));

    match &state.active {
        Some(a) => {
            let pid = a.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into());
            push_wrapped_status_kv(
                &mut lines,
                "Running",
                &format!("run {} (pid {pid}) since {}", a.run, a.started_at),
                area.width,
            );
            push_wrapped_status_kv(
                &mut lines,
                "Workspace",
                &a.workspace.display().to_string(),
                area.width,
            );
        }
        None => lines.push(Line::from(Span::styled(
            "Idle",
            Style::default().fg(Color::Gray),
        ))),
    }

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("miko"));
    f.render_widget(p, area);
}
