//! Parsing standard unified diff text into structured `Patch` values (spec §4.1, §6.4).

use std::path::PathBuf;

use crate::error::DiffParseError;
use crate::model::{CommitId, DiffLine, FileStatus, Hunk, ModeChange, Patch, PatchId};

#[derive(Default)]
struct FileState {
    old_path: Option<PathBuf>,
    new_path: Option<PathBuf>,
    is_new: bool,
    is_deleted: bool,
    old_mode: Option<u32>,
    new_mode: Option<u32>,
    similarity: Option<u8>,
    is_rename: bool,
    is_copy: bool,
    is_binary: bool,
    hunks: Vec<Hunk>,
}

struct HunkBuilder {
    old_start: u32,
    old_lines: u32,
    new_start: u32,
    new_lines: u32,
    context: String,
    lines: Vec<DiffLine>,
    old_missing_newline: bool,
    new_missing_newline: bool,
}

impl HunkBuilder {
    fn build(self) -> Hunk {
        Hunk {
            old_start: self.old_start,
            old_lines: self.old_lines,
            new_start: self.new_start,
            new_lines: self.new_lines,
            lines: self.lines,
            context: self.context,
            old_missing_newline: self.old_missing_newline,
            new_missing_newline: self.new_missing_newline,
        }
    }
}

fn parse_mode(s: &str) -> Option<u32> {
    u32::from_str_radix(s.trim(), 8).ok()
}

fn parse_hunk_header(line: &str) -> Result<(u32, u32, u32, u32, String), DiffParseError> {
    // "@@ -a,b +c,d @@ optional trailing context"
    let rest = line
        .strip_prefix("@@ ")
        .ok_or_else(|| DiffParseError::InvalidHunkHeader(line.to_string()))?;
    let close = rest
        .find(" @@")
        .ok_or_else(|| DiffParseError::InvalidHunkHeader(line.to_string()))?;
    let ranges = &rest[..close];
    let mut parts = ranges.split_whitespace();
    let old_range = parts
        .next()
        .ok_or_else(|| DiffParseError::InvalidHunkHeader(line.to_string()))?;
    let new_range = parts
        .next()
        .ok_or_else(|| DiffParseError::InvalidHunkHeader(line.to_string()))?;

    let (old_start, old_lines) = parse_range(old_range, '-')?;
    let (new_start, new_lines) = parse_range(new_range, '+')?;
    Ok((old_start, old_lines, new_start, new_lines, line.to_string()))
}

fn parse_range(spec: &str, sigil: char) -> Result<(u32, u32), DiffParseError> {
    let spec = spec
        .strip_prefix(sigil)
        .ok_or_else(|| DiffParseError::InvalidHunkHeader(spec.to_string()))?;
    let mut pieces = spec.splitn(2, ',');
    let start: u32 = pieces
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| DiffParseError::InvalidHunkHeader(spec.to_string()))?;
    let count: u32 = match pieces.next() {
        Some(c) => c
            .parse()
            .map_err(|_| DiffParseError::InvalidHunkHeader(spec.to_string()))?,
        None => 1,
    };
    Ok((start, count))
}

/// Parse the raw unified diff produced by `Repository::tree_to_tree_diff` into
/// structured, per-file `Patch` values attributed to `source_commit`.
pub fn parse_unified_diff(
    text: &str,
    source_commit: &CommitId,
) -> Result<Vec<Patch>, DiffParseError> {
    let mut files: Vec<FileState> = Vec::new();
    let mut current: Option<FileState> = None;
    let mut current_hunk: Option<HunkBuilder> = None;
    let mut last_line_side: Option<LineSide> = None;

    let finish_hunk = |state: &mut Option<FileState>, hunk: Option<HunkBuilder>| {
        if let (Some(state), Some(builder)) = (state.as_mut(), hunk) {
            state.hunks.push(builder.build());
        }
    };

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            finish_hunk(&mut current, current_hunk.take());
            if let Some(done) = current.take() {
                files.push(done);
            }
            let mut state = FileState::default();
            if let Some((old, new)) = split_diff_header(rest) {
                state.old_path = Some(PathBuf::from(old));
                state.new_path = Some(PathBuf::from(new));
            }
            current = Some(state);
            last_line_side = None;
            continue;
        }
        let Some(state) = current.as_mut() else {
            continue;
        };

        if let Some(rest) = line.strip_prefix("new file mode ") {
            state.is_new = true;
            state.new_mode = parse_mode(rest);
            continue;
        }
        if line.starts_with("new file") {
            state.is_new = true;
            continue;
        }
        if let Some(rest) = line.strip_prefix("deleted file mode ") {
            state.is_deleted = true;
            state.old_mode = parse_mode(rest);
            continue;
        }
        if line.starts_with("deleted file") {
            state.is_deleted = true;
            continue;
        }
        if let Some(rest) = line.strip_prefix("old mode ") {
            state.old_mode = parse_mode(rest);
            continue;
        }
        if let Some(rest) = line.strip_prefix("new mode ") {
            state.new_mode = parse_mode(rest);
            continue;
        }
        if let Some(rest) = line.strip_prefix("similarity index ") {
            let pct = rest.trim_end_matches('%').parse::<u8>().ok();
            state.similarity = pct;
            continue;
        }
        if line.starts_with("rename from") {
            state.is_rename = true;
            continue;
        }
        if line.starts_with("rename to") {
            state.is_rename = true;
            continue;
        }
        if line.starts_with("copy from") || line.starts_with("copy to") {
            state.is_copy = true;
            continue;
        }
        if line.starts_with("Binary files") || line.starts_with("GIT binary patch") {
            state.is_binary = true;
            continue;
        }
        if line.starts_with("index ") {
            continue;
        }
        if let Some(path) = line.strip_prefix("--- a/") {
            state.old_path = Some(PathBuf::from(path));
            continue;
        }
        if line.starts_with("--- /dev/null") {
            continue;
        }
        if line.starts_with("--- ") {
            continue;
        }
        if let Some(path) = line.strip_prefix("+++ b/") {
            state.new_path = Some(PathBuf::from(path));
            continue;
        }
        if line.starts_with("+++ /dev/null") || line.starts_with("+++ ") {
            continue;
        }
        if line.starts_with("@@ ") {
            finish_hunk(&mut current, current_hunk.take());
            let (old_start, old_lines, new_start, new_lines, header) = parse_hunk_header(line)?;
            current_hunk = Some(HunkBuilder {
                old_start,
                old_lines,
                new_start,
                new_lines,
                context: header,
                lines: Vec::new(),
                old_missing_newline: false,
                new_missing_newline: false,
            });
            last_line_side = None;
            continue;
        }
        if line == r"\ No newline at end of file" {
            if let Some(builder) = current_hunk.as_mut() {
                apply_missing_newline(builder, last_line_side);
            }
            continue;
        }
        if let Some(builder) = current_hunk.as_mut() {
            if let Some(rest) = line.strip_prefix('+') {
                builder.lines.push(DiffLine::Addition(rest.to_string()));
                last_line_side = Some(LineSide::New);
            } else if let Some(rest) = line.strip_prefix('-') {
                builder.lines.push(DiffLine::Deletion(rest.to_string()));
                last_line_side = Some(LineSide::Old);
            } else {
                let rest = line.strip_prefix(' ').unwrap_or(line);
                builder.lines.push(DiffLine::Context(rest.to_string()));
                last_line_side = Some(LineSide::Both);
            }
        }
    }
    finish_hunk(&mut current, current_hunk.take());
    if let Some(done) = current.take() {
        files.push(done);
    }

    let mut patches = Vec::with_capacity(files.len());
    for state in files {
        patches.push(build_patch(state, source_commit)?);
    }
    Ok(patches)
}

#[derive(Clone, Copy)]
enum LineSide {
    Old,
    New,
    Both,
}

fn apply_missing_newline(builder: &mut HunkBuilder, side: Option<LineSide>) {
    builder.old_missing_newline |= matches!(side, Some(LineSide::Old) | Some(LineSide::Both));
    builder.new_missing_newline |= matches!(side, Some(LineSide::New) | Some(LineSide::Both));
}

fn build_patch(state: FileState, source_commit: &CommitId) -> Result<Patch, DiffParseError> {
    let status = if state.is_new {
        FileStatus::Added
    } else if state.is_deleted {
        FileStatus::Deleted
    } else if state.is_rename {
        FileStatus::Renamed(state.similarity.unwrap_or(100))
    } else if state.is_copy {
        FileStatus::Copied(state.similarity.unwrap_or(100))
    } else if state.old_mode.is_some() && state.new_mode.is_some() && state.hunks.is_empty() {
        FileStatus::Typechange
    } else {
        FileStatus::Modified
    };

    let target_file = state
        .new_path
        .clone()
        .or_else(|| state.old_path.clone())
        .ok_or_else(|| DiffParseError::UnexpectedFormat("diff entry missing both paths".into()))?;

    let mode_change = if state.is_new {
        state.new_mode.map(ModeChange::NewFile)
    } else if state.is_deleted {
        state.old_mode.map(ModeChange::DeletedFile)
    } else {
        match (state.old_mode, state.new_mode) {
            (Some(old), Some(new)) if old != new => Some(ModeChange::ModeChange(old, new)),
            _ => None,
        }
    };

    let id = PatchId::new(source_commit, &target_file);
    Ok(Patch {
        id,
        source_commit: source_commit.clone(),
        target_file,
        hunks: state.hunks,
        mode_change,
        status,
        binary: state.is_binary,
    })
}

fn split_diff_header(rest: &str) -> Option<(&str, &str)> {
    // "a/old/path b/new/path" — paths may contain spaces so split on " b/" from the
    // right edge of a known "a/" prefix is unreliable in general; git always quotes
    // paths containing spaces, so a plain split on the literal " b/" marker is safe
    // for the common unquoted case this engine targets.
    let rest = rest.strip_prefix("a/")?;
    let marker = " b/";
    let idx = rest.find(marker)?;
    Some((&rest[..idx], &rest[idx + marker.len()..]))
}
