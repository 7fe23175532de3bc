//! Rendering a `Patch` back into unified diff text (spec §6.4), the inverse of
//! `parser::parse_unified_diff`. The History Rewriter applies patches directly to
//! trees via `write_tree`/`hash-object` and persists them as `serde_json`, so this
//! round-trip is exercised by its own tests rather than by a production call site.

use crate::model::{DiffLine, FileStatus, Hunk, ModeChange, Patch};

/// Render `patch` as a standalone unified diff (`diff --git` header through the last
/// hunk body), suitable for `git apply --cached`.
pub fn write_patch(patch: &Patch) -> String {
    let mut out = String::new();
    let path = patch.target_file.display();

    out.push_str(&format!("diff --git a/{path} b/{path}\n"));

    match patch.status {
        FileStatus::Added => {
            if let Some(ModeChange::NewFile(mode)) = patch.mode_change {
                out.push_str(&format!("new file mode {mode:o}\n"));
            }
            out.push_str("--- /dev/null\n");
            out.push_str(&format!("+++ b/{path}\n"));
        }
        FileStatus::Deleted => {
            if let Some(ModeChange::DeletedFile(mode)) = patch.mode_change {
                out.push_str(&format!("deleted file mode {mode:o}\n"));
            }
            out.push_str(&format!("--- a/{path}\n"));
            out.push_str("+++ /dev/null\n");
        }
        _ => {
            if let Some(ModeChange::ModeChange(old, new)) = patch.mode_change {
                out.push_str(&format!("old mode {old:o}\n"));
                out.push_str(&format!("new mode {new:o}\n"));
            }
            out.push_str(&format!("--- a/{path}\n"));
            out.push_str(&format!("+++ b/{path}\n"));
        }
    }

    for hunk in &patch.hunks {
        write_hunk_body(&mut out, hunk);
    }

    out
}

fn write_hunk_body(out: &mut String, hunk: &Hunk) {
    out.push_str(&format!(
        "@@ -{},{} +{},{} @@\n",
        hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
    ));

    let last_old_index = hunk
        .lines
        .iter()
        .rposition(|l| matches!(l, DiffLine::Context(_) | DiffLine::Deletion(_)));
    let last_new_index = hunk
        .lines
        .iter()
        .rposition(|l| matches!(l, DiffLine::Context(_) | DiffLine::Addition(_)));

    for (index, line) in hunk.lines.iter().enumerate() {
        let (sigil, text) = match line {
            DiffLine::Context(s) => (' ', s.as_str()),
            DiffLine::Addition(s) => ('+', s.as_str()),
            DiffLine::Deletion(s) => ('-', s.as_str()),
        };
        out.push(sigil);
        out.push_str(text);
        out.push('\n');

        let is_last_old = Some(index) == last_old_index
            && matches!(line, DiffLine::Context(_) | DiffLine::Deletion(_));
        let is_last_new = Some(index) == last_new_index
            && matches!(line, DiffLine::Context(_) | DiffLine::Addition(_));

        if (is_last_old && hunk.old_missing_newline) || (is_last_new && hunk.new_missing_newline) {
            out.push_str("\\ No newline at end of file\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommitId, PatchId};
    use std::path::PathBuf;

    #[test]
    fn writes_modification_header_and_hunk() {
        let source = CommitId::new("c1");
        let patch = Patch {
            id: PatchId::new(&source, &PathBuf::from("f.txt")),
            source_commit: source,
            target_file: PathBuf::from("f.txt"),
            hunks: vec![Hunk {
                old_start: 1,
                old_lines: 3,
                new_start: 1,
                new_lines: 3,
                lines: vec![
                    DiffLine::Context("a".into()),
                    DiffLine::Deletion("b".into()),
                    DiffLine::Addition("B".into()),
                    DiffLine::Context("c".into()),
                ],
                context: "@@ -1,3 +1,3 @@".into(),
                old_missing_newline: false,
                new_missing_newline: false,
            }],
            mode_change: None,
            status: FileStatus::Modified,
            binary: false,
        };

        let text = write_patch(&patch);
        assert!(text.contains("--- a/f.txt"));
        assert!(text.contains("+++ b/f.txt"));
        assert!(text.contains("@@ -1,3 +1,3 @@"));
        assert!(text.contains("-b\n"));
        assert!(text.contains("+B\n"));
    }

    #[test]
    fn writes_new_file_header() {
        let source = CommitId::new("c1");
        let patch = Patch {
            id: PatchId::new(&source, &PathBuf::from("new.txt")),
            source_commit: source,
            target_file: PathBuf::from("new.txt"),
            hunks: vec![Hunk {
                old_start: 0,
                old_lines: 0,
                new_start: 1,
                new_lines: 1,
                lines: vec![DiffLine::Addition("hi".into())],
                context: "@@ -0,0 +1,1 @@".into(),
                old_missing_newline: false,
                new_missing_newline: false,
            }],
            mode_change: Some(ModeChange::NewFile(0o100644)),
            status: FileStatus::Added,
            binary: false,
        };

        let text = write_patch(&patch);
        assert!(text.contains("new file mode 100644"));
        assert!(text.contains("--- /dev/null"));
    }

    #[test]
    fn preserves_missing_newline_sentinel() {
        let source = CommitId::new("c1");
        let patch = Patch {
            id: PatchId::new(&source, &PathBuf::from("f.txt")),
            source_commit: source,
            target_file: PathBuf::from("f.txt"),
            hunks: vec![Hunk {
                old_start: 1,
                old_lines: 1,
                new_start: 1,
                new_lines: 1,
                lines: vec![DiffLine::Context("only line".into())],
                context: "@@ -1,1 +1,1 @@".into(),
                old_missing_newline: true,
                new_missing_newline: true,
            }],
            mode_change: None,
            status: FileStatus::Modified,
            binary: false,
        };

        let text = write_patch(&patch);
        assert!(text.contains("\\ No newline at end of file"));
    }
}
