use super::state::UiState;
use crate::txtar;
use anyhow::Result;
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Bundle the current inputs and output into a txtar archive.
pub fn snarf(state: &UiState) -> String {
    let mut archive = txtar::Archive::default();
    archive.push_non_empty(txtar::PROGRAM_FILE, &state.inputs.program);
    archive.push_non_empty(txtar::DATA_FILE, &state.inputs.data);
    archive.push_non_empty(txtar::CONFIG_FILE, &state.inputs.config);
    archive.push_non_empty(txtar::OUTPUT_FILE, state.feed.text());
    txtar::format(&archive)
}

/// Start the clipboard thread on first use.
///
/// Each copy holds its clipboard instance for a while so that clipboard
/// managers on Linux get a chance to read the contents.
fn init_clipboard_manager() -> &'static std_mpsc::Sender<String> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();
        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                match Clipboard::new() {
                    Ok(mut clipboard) => match clipboard.set_text(&text) {
                        Ok(()) => std::thread::sleep(Duration::from_secs(2)),
                        Err(e) => tracing::warn!(error = %e, "clipboard write failed"),
                    },
                    Err(e) => tracing::warn!(error = %e, "clipboard unavailable"),
                }
            }
        });
        tx
    })
}

/// Queue `text` for the clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    init_clipboard_manager()
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("clipboard manager channel closed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::RunInputs;
    use crate::model::{DisplayEvent, EngineOptions};

    #[test]
    fn snarf_skips_empty_inputs_and_includes_output() {
        let inputs = RunInputs {
            program: "state".into(),
            data: String::new(),
            config: "x: 1".into(),
        };
        let mut state = UiState::new(inputs, EngineOptions::default(), false, 4);
        state.feed.push(DisplayEvent::output("{\n\t\"a\": 1\n}"));

        let text = snarf(&state);
        assert_eq!(
            text,
            "-- src.cel --\nstate\n-- cfg.yaml --\nx: 1\n-- out.json --\n{\n\t\"a\": 1\n}\n"
        );
        let archive = txtar::parse(&text);
        assert_eq!(archive.file(txtar::DATA_FILE), None);
    }
}
