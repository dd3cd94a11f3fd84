//! Source formatting for the program and data inputs.

use anyhow::{bail, Context, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Run the external CEL formatter over `text`. `None` when there is nothing to format.
pub async fn format_program(formatter: &str, text: &str) -> Result<Option<String>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let mut child = Command::new(formatter)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start {formatter}"))?;

    let mut stdin = child.stdin.take().context("formatter stdin not captured")?;
    let input = text.to_owned();
    // Feed stdin concurrently so a chatty formatter cannot deadlock on a full pipe.
    let writer = tokio::spawn(async move {
        let res = stdin.write_all(input.as_bytes()).await;
        drop(stdin);
        res
    });

    let output = child
        .wait_with_output()
        .await
        .with_context(|| format!("failed to wait for {formatter}"))?;
    let write_res = writer.await;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim_end();
        if stderr.is_empty() {
            bail!("{formatter}: {}", output.status);
        }
        bail!("{formatter}: {stderr}");
    }
    if let Ok(Err(e)) = write_res {
        return Err(e).with_context(|| format!("failed to write to {formatter}"));
    }
    Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
}

/// Re-indent JSON data with tabs. `None` when there is nothing to format.
pub fn format_data(text: &str) -> Result<Option<String>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let indented = indent_json(text).context("data is not valid JSON")?;
    Ok(Some(indented.trim().to_string()))
}

/// Indent a single JSON value without reordering keys or touching literals.
pub fn indent_json(text: &str) -> Result<String, serde_json::Error> {
    serde_json::from_str::<serde::de::IgnoredAny>(text)?;

    let mut out = String::with_capacity(text.len() * 2);
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    // An opener was just written; its newline waits in case the container is empty.
    let mut opened = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if matches!(c, ' ' | '\t' | '\n' | '\r') {
            continue;
        }
        if opened {
            opened = false;
            if c == '}' || c == ']' {
                depth = depth.saturating_sub(1);
                out.push(c);
                continue;
            }
            newline(&mut out, depth);
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' | '[' => {
                out.push(c);
                depth += 1;
                opened = true;
            }
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                newline(&mut out, depth);
                out.push(c);
            }
            ',' => {
                out.push(c);
                newline(&mut out, depth);
            }
            ':' => out.push_str(": "),
            _ => out.push(c),
        }
    }
    Ok(out)
}

fn newline(out: &mut String, depth: usize) {
    out.push('\n');
    for _ in 0..depth {
        out.push('\t');
    }
}
