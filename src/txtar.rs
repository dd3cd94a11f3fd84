//! Minimal txtar archive support for loading and sharing playground inputs.
//!
//! An archive is a free-form comment followed by files, each introduced by a
//! `-- name --` marker line.

pub const PROGRAM_FILE: &str = "src.cel";
pub const DATA_FILE: &str = "data.json";
pub const CONFIG_FILE: &str = "cfg.yaml";
pub const OUTPUT_FILE: &str = "out.json";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Archive {
    pub comment: String,
    pub files: Vec<File>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub name: String,
    pub data: String,
}

impl Archive {
    pub fn file(&self, name: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.data.as_str())
    }

    /// Append a file unless its contents are empty.
    pub fn push_non_empty(&mut self, name: &str, data: &str) {
        if !data.is_empty() {
            self.files.push(File {
                name: name.to_string(),
                data: data.to_string(),
            });
        }
    }
}

/// Marker name if `line` (without its newline) is a file marker.
fn marker_name(line: &str) -> Option<&str> {
    let name = line.strip_prefix("-- ")?.strip_suffix(" --")?.trim();
    (!name.is_empty()).then_some(name)
}

pub fn parse(text: &str) -> Archive {
    let mut archive = Archive::default();
    let mut current: Option<File> = None;
    let mut body = String::new();

    for line in text.split_inclusive('\n') {
        let bare = line.strip_suffix('\n').unwrap_or(line);
        if let Some(name) = marker_name(bare) {
            match current.take() {
                Some(mut f) => {
                    f.data = std::mem::take(&mut body);
                    archive.files.push(f);
                }
                None => archive.comment = std::mem::take(&mut body),
            }
            current = Some(File {
                name: name.to_string(),
                data: String::new(),
            });
            continue;
        }
        body.push_str(line);
    }

    match current {
        Some(mut f) => {
            f.data = body;
            archive.files.push(f);
        }
        None => archive.comment = body,
    }
    archive
}

pub fn format(archive: &Archive) -> String {
    let mut out = String::new();
    push_with_newline(&mut out, &archive.comment);
    for f in &archive.files {
        out.push_str("-- ");
        out.push_str(&f.name);
        out.push_str(" --\n");
        push_with_newline(&mut out, &f.data);
    }
    out
}

fn push_with_newline(out: &mut String, data: &str) {
    out.push_str(data);
    if !data.is_empty() && !data.ends_with('\n') {
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comment_and_files() {
        let a = parse("a comment\n-- src.cel --\nstate.x\n-- data.json --\n{\"x\":1}\n");
        assert_eq!(a.comment, "a comment\n");
        assert_eq!(a.file(PROGRAM_FILE), Some("state.x\n"));
        assert_eq!(a.file(DATA_FILE), Some("{\"x\":1}\n"));
        assert_eq!(a.file(CONFIG_FILE), None);
    }

    #[test]
    fn file_without_trailing_newline_and_empty_file() {
        let a = parse("-- cfg.yaml --\n-- src.cel --\n1");
        assert_eq!(a.comment, "");
        assert_eq!(a.file(CONFIG_FILE), Some(""));
        assert_eq!(a.file(PROGRAM_FILE), Some("1"));
    }

    #[test]
    fn lines_that_only_look_like_markers_are_content() {
        let a = parse("-- src.cel --\n--  --\n-- x\n");
        assert_eq!(a.files.len(), 1);
        assert_eq!(a.file(PROGRAM_FILE), Some("--  --\n-- x\n"));
    }

    #[test]
    fn format_adds_missing_newlines() {
        let mut a = Archive::default();
        a.push_non_empty(PROGRAM_FILE, "1 + 1");
        a.push_non_empty(DATA_FILE, "");
        a.push_non_empty(OUTPUT_FILE, "2\n");
        assert_eq!(format(&a), "-- src.cel --\n1 + 1\n-- out.json --\n2\n");
        assert_eq!(parse(&format(&a)).files.len(), 2);
    }
}
