use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

const KEYS: &[(&str, &str)] = &[
    ("r", "Run the program"),
    ("x", "Cancel the active run"),
    ("f", "Format program and data"),
    ("s", "Copy inputs and output to the clipboard as txtar"),
    ("l", "Clear output"),
    ("e", "Reload inputs from disk"),
    ("i", "Toggle -insecure"),
    ("g", "Toggle -log_requests"),
    ("d", "Toggle -dump"),
    ("k", "Toggle keeping run workspaces"),
    ("↑/↓", "Scroll output"),
    ("PgUp/PgDn", "Scroll output by page"),
    ("End", "Follow output"),
    ("?", "Show/hide this help"),
];

fn key_line(key: &str, what: &str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(format!("{key:<12}"), Style::default().fg(Color::Magenta)),
        Span::raw(what.to_string()),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let mut lines = vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit"),
        ]),
    ];
    lines.extend(KEYS.iter().map(|(k, what)| key_line(k, what)));
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::raw("Logs: "),
        Span::styled(
            crate::logging::log_dir().display().to_string(),
            Style::default().fg(Color::Cyan),
        ),
    ]));

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
