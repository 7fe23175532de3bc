//! Applying a `Patch` to an explicit text buffer (spec §4.1).

use crate::error::ApplyError;
use crate::model::{DiffLine, Hunk, Patch};

const CONFIDENCE_THRESHOLD: i32 = 50;
const MAX_CONTEXT_MISMATCHES: usize = 3;

/// Apply `patch` to `original`, returning the resulting text. Pure and side-effect
/// free: no repository access, no partial writes on failure.
pub fn apply_patch(original: &str, patch: &Patch) -> Result<String, ApplyError> {
    if patch.binary {
        return Err(ApplyError::BinaryPatchUnsupported);
    }
    if patch.hunks.is_empty() {
        return Ok(original.to_string());
    }

    let trailing_newline = original.ends_with('\n');
    let mut lines: Vec<&str> = if original.is_empty() {
        Vec::new()
    } else {
        original.split('\n').collect()
    };
    // `split('\n')` on a trailing-newline string yields a spurious trailing "".
    if trailing_newline && lines.last() == Some(&"") {
        lines.pop();
    }

    // Apply hunks back-to-front so earlier offsets in the file are unaffected by the
    // line-count shift of hunks applied after them.
    let mut ordered: Vec<(usize, &Hunk)> = patch.hunks.iter().enumerate().collect();
    ordered.sort_by_key(|(_, h)| std::cmp::Reverse(h.old_start));

    let mut result_lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();

    for (index, hunk) in ordered {
        let old_window: Vec<String> = hunk
            .lines
            .iter()
            .filter_map(|l| match l {
                DiffLine::Context(s) | DiffLine::Deletion(s) => Some(s.clone()),
                DiffLine::Addition(_) => None,
            })
            .collect();
        let new_window: Vec<String> = hunk
            .lines
            .iter()
            .filter_map(|l| match l {
                DiffLine::Context(s) | DiffLine::Addition(s) => Some(s.clone()),
                DiffLine::Deletion(_) => None,
            })
            .collect();

        let start = locate_hunk(&result_lines, hunk, &old_window, index)?;
        result_lines.splice(start..start + old_window.len(), new_window);
    }

    let mut joined = result_lines.join("\n");
    let want_trailing_newline = patch
        .hunks
        .iter()
        .map(|h| !h.new_missing_newline)
        .last()
        .unwrap_or(trailing_newline);
    if want_trailing_newline {
        joined.push('\n');
    }
    Ok(joined)
}

/// Find where `old_window` sits in `lines`, trying an exact match at the hunk's
/// declared position first, then a fuzzy search over the whole file.
fn locate_hunk(
    lines: &[String],
    hunk: &Hunk,
    old_window: &[String],
    hunk_index: usize,
) -> Result<usize, ApplyError> {
    if old_window.is_empty() {
        // Pure insertion hunk: anchor at old_start - 1 with no window to match.
        let pos = (hunk.old_start.saturating_sub(1)) as usize;
        return Ok(pos.min(lines.len()));
    }

    let exact_pos = (hunk.old_start.saturating_sub(1)) as usize;
    if matches_at(lines, exact_pos, old_window) {
        return Ok(exact_pos);
    }

    let mut best: Option<(usize, i32)> = None;
    let window_len = old_window.len();
    if window_len <= lines.len() {
        for pos in 0..=(lines.len() - window_len) {
            let confidence = score_match(lines, pos, old_window);
            if confidence < CONFIDENCE_THRESHOLD {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_pos, best_conf)) => {
                    confidence > best_conf
                        || (confidence == best_conf
                            && distance(pos, exact_pos) < distance(best_pos, exact_pos))
                }
            };
            if better {
                best = Some((pos, confidence));
            }
        }
    }

    best.map(|(pos, _)| pos).ok_or_else(|| ApplyError::HunkApplicationFailed {
        hunk_index,
        reason: format!(
            "no location scored >= {CONFIDENCE_THRESHOLD} confidence for hunk at old_start {}",
            hunk.old_start
        ),
    })
}

fn matches_at(lines: &[String], pos: usize, window: &[String]) -> bool {
    if pos + window.len() > lines.len() {
        return false;
    }
    lines[pos..pos + window.len()] == *window
}

/// +10 per matching context line, -5 per mismatch, saturating at 100.
fn score_match(lines: &[String], pos: usize, window: &[String]) -> i32 {
    if pos + window.len() > lines.len() {
        return 0;
    }
    let mut score: i32 = 0;
    let mut mismatches = 0usize;
    for (offset, expected) in window.iter().enumerate() {
        if &lines[pos + offset] == expected {
            score += 10;
        } else {
            mismatches += 1;
            score -= 5;
        }
        if mismatches > MAX_CONTEXT_MISMATCHES {
            return 0;
        }
    }
    score.clamp(0, 100)
}

fn distance(a: usize, b: usize) -> usize {
    a.abs_diff(b)
}
