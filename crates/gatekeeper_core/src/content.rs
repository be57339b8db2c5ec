//! Line-based three-way merge over page contents.
//!
//! The tagged base commit provides the common ancestor, the server topic is
//! "theirs" and the local file is "ours". Semantics follow the git merge
//! algorithm: changes to disjoint line regions combine cleanly, overlapping
//! regions are conflicts.

use crate::error::{GatekeeperError, Result};

/// One edit against the base: base lines `[base_start, base_end)` are
/// replaced by derived lines `[other_start, other_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hunk {
    base_start: usize,
    base_end: usize,
    other_start: usize,
    other_end: usize,
}

impl Hunk {
    fn is_insertion(&self) -> bool {
        self.base_start == self.base_end
    }
}

/// Compute the merged content.
///
/// Returns `GatekeeperError::Content` carrying the conflict-marked content
/// when the changes overlap.
pub fn merge(base: &str, theirs: &str, ours: &str) -> Result<String> {
    if theirs == base {
        return Ok(ours.to_string());
    }
    if ours == base || theirs == ours {
        return Ok(theirs.to_string());
    }

    let base_lines: Vec<&str> = base.lines().collect();
    let their_lines: Vec<&str> = theirs.lines().collect();
    let our_lines: Vec<&str> = ours.lines().collect();

    let their_hunks = hunks(&base_lines, &their_lines);
    let our_hunks = hunks(&base_lines, &our_lines);

    let mut merged: Vec<String> = Vec::new();
    let mut conflicted = false;
    let mut base_at = 0usize;
    let (mut their_index, mut our_index) = (0usize, 0usize);

    while their_index < their_hunks.len() || our_index < our_hunks.len() {
        let their_next = their_hunks.get(their_index);
        let our_next = our_hunks.get(our_index);

        if let (Some(their_hunk), Some(our_hunk)) = (their_next, our_next) {
            if overlaps(their_hunk, our_hunk)
                || (their_hunk.base_start == our_hunk.base_start
                    && their_hunk.is_insertion()
                    && our_hunk.is_insertion())
            {
                let (group_start, group_end, their_until, our_until) =
                    collect_group(&their_hunks, &our_hunks, their_index, our_index);
                copy_base(&base_lines, base_at, group_start, &mut merged);

                let their_version = apply_side(
                    &base_lines,
                    &their_lines,
                    &their_hunks[their_index..their_until],
                    group_start,
                    group_end,
                );
                let our_version = apply_side(
                    &base_lines,
                    &our_lines,
                    &our_hunks[our_index..our_until],
                    group_start,
                    group_end,
                );

                if their_version == our_version {
                    merged.extend(their_version);
                } else {
                    conflicted = true;
                    merged.push("<<<<<<< local".to_string());
                    merged.extend(our_version);
                    merged.push("=======".to_string());
                    merged.extend(their_version);
                    merged.push(">>>>>>> server".to_string());
                }

                base_at = group_end;
                their_index = their_until;
                our_index = our_until;
                continue;
            }
        }

        // The earliest remaining hunk is disjoint from the other side. At
        // equal positions one side is an insertion (equal non-insertions
        // overlap) and goes first, before the lines it inserts ahead of.
        let take_theirs = match (their_next, our_next) {
            (Some(their_hunk), Some(our_hunk)) => {
                their_hunk.base_start < our_hunk.base_start
                    || (their_hunk.base_start == our_hunk.base_start
                        && their_hunk.is_insertion())
            }
            (Some(_), None) => true,
            _ => false,
        };
        let (hunk, lines) = if take_theirs {
            their_index += 1;
            (their_hunks[their_index - 1], &their_lines)
        } else {
            our_index += 1;
            (our_hunks[our_index - 1], &our_lines)
        };
        copy_base(&base_lines, base_at, hunk.base_start, &mut merged);
        merged.extend(
            lines[hunk.other_start..hunk.other_end]
                .iter()
                .map(|line| (*line).to_string()),
        );
        base_at = hunk.base_end;
    }
    copy_base(&base_lines, base_at, base_lines.len(), &mut merged);

    let mut output = merged.join("\n");
    if theirs.ends_with('\n') || ours.ends_with('\n') {
        output.push('\n');
    }

    if conflicted {
        return Err(GatekeeperError::Content(format!(
            "could not automatically merge, conflicts:\n{output}"
        )));
    }
    Ok(output)
}

/// Describe the merge conflicts, or `None` when the merge is clean.
///
/// A missing base is treated as equal to ours when theirs and ours already
/// agree; otherwise the absence itself is the conflict.
pub fn conflicts(base: Option<&str>, theirs: &str, ours: &str) -> Option<String> {
    if theirs == ours {
        return None;
    }
    let Some(base) = base else {
        return Some(format!(
            "no tagged base content to merge from and the server and local contents differ, \
             diff: {}",
            diff(theirs, ours)
        ));
    };
    if theirs == base || ours == base {
        return None;
    }
    match merge(base, theirs, ours) {
        Ok(_) => None,
        Err(_) => Some(format!("diff: {}", diff(theirs, ours))),
    }
}

/// Render the line difference between two strings.
///
/// Common lines are prefixed with two spaces, lines only in `first` with
/// `- ` and lines only in `second` with `+ `.
pub fn diff(first: &str, second: &str) -> String {
    let first_lines: Vec<&str> = first.lines().collect();
    let second_lines: Vec<&str> = second.lines().collect();
    let pairs = lcs_pairs(&first_lines, &second_lines);

    let mut output = Vec::new();
    let (mut first_at, mut second_at) = (0usize, 0usize);
    for (first_index, second_index) in pairs {
        for line in &first_lines[first_at..first_index] {
            output.push(format!("- {line}"));
        }
        for line in &second_lines[second_at..second_index] {
            output.push(format!("+ {line}"));
        }
        output.push(format!("  {}", first_lines[first_index]));
        first_at = first_index + 1;
        second_at = second_index + 1;
    }
    for line in &first_lines[first_at..] {
        output.push(format!("- {line}"));
    }
    for line in &second_lines[second_at..] {
        output.push(format!("+ {line}"));
    }
    output.join("\n")
}

/// Whether two hunks share at least one base line.
fn overlaps(first: &Hunk, second: &Hunk) -> bool {
    first.base_start < second.base_end && second.base_start < first.base_end
}

/// Extend a pair of overlapping hunks into the maximal chain of hunks whose
/// base ranges intersect, returning the covered base range and the exclusive
/// end indices into both hunk lists.
fn collect_group(
    their_hunks: &[Hunk],
    our_hunks: &[Hunk],
    their_index: usize,
    our_index: usize,
) -> (usize, usize, usize, usize) {
    let mut group_start = their_hunks[their_index]
        .base_start
        .min(our_hunks[our_index].base_start);
    let mut group_end = their_hunks[their_index]
        .base_end
        .max(our_hunks[our_index].base_end);
    let (mut their_until, mut our_until) = (their_index + 1, our_index + 1);

    loop {
        let mut expanded = false;
        while their_until < their_hunks.len()
            && their_hunks[their_until].base_start < group_end
        {
            group_start = group_start.min(their_hunks[their_until].base_start);
            group_end = group_end.max(their_hunks[their_until].base_end);
            their_until += 1;
            expanded = true;
        }
        while our_until < our_hunks.len() && our_hunks[our_until].base_start < group_end {
            group_start = group_start.min(our_hunks[our_until].base_start);
            group_end = group_end.max(our_hunks[our_until].base_end);
            our_until += 1;
            expanded = true;
        }
        if !expanded {
            break;
        }
    }
    (group_start, group_end, their_until, our_until)
}

/// Render one side's version of the base region `[start, end)` by applying
/// its hunks within the region.
fn apply_side(
    base_lines: &[&str],
    side_lines: &[&str],
    side_hunks: &[Hunk],
    start: usize,
    end: usize,
) -> Vec<String> {
    let mut output = Vec::new();
    let mut base_at = start;
    for hunk in side_hunks {
        for line in &base_lines[base_at..hunk.base_start] {
            output.push((*line).to_string());
        }
        for line in &side_lines[hunk.other_start..hunk.other_end] {
            output.push((*line).to_string());
        }
        base_at = hunk.base_end;
    }
    for line in &base_lines[base_at..end] {
        output.push((*line).to_string());
    }
    output
}

fn copy_base(base_lines: &[&str], from: usize, to: usize, merged: &mut Vec<String>) {
    for line in &base_lines[from..to] {
        merged.push((*line).to_string());
    }
}

/// Edit hunks of `other` against `base`, derived from the gaps between
/// longest-common-subsequence matches.
fn hunks(base: &[&str], other: &[&str]) -> Vec<Hunk> {
    let pairs = lcs_pairs(base, other);
    let mut output = Vec::new();
    let (mut base_at, mut other_at) = (0usize, 0usize);
    for (base_index, other_index) in pairs {
        if base_index > base_at || other_index > other_at {
            output.push(Hunk {
                base_start: base_at,
                base_end: base_index,
                other_start: other_at,
                other_end: other_index,
            });
        }
        base_at = base_index + 1;
        other_at = other_index + 1;
    }
    if base.len() > base_at || other.len() > other_at {
        output.push(Hunk {
            base_start: base_at,
            base_end: base.len(),
            other_start: other_at,
            other_end: other.len(),
        });
    }
    output
}

/// Longest common subsequence as matched index pairs, strictly increasing on
/// both sides.
fn lcs_pairs(first: &[&str], second: &[&str]) -> Vec<(usize, usize)> {
    let rows = first.len();
    let columns = second.len();
    let mut lengths = vec![0usize; (rows + 1) * (columns + 1)];
    let at = |row: usize, column: usize| row * (columns + 1) + column;

    for row in (0..rows).rev() {
        for column in (0..columns).rev() {
            lengths[at(row, column)] = if first[row] == second[column] {
                lengths[at(row + 1, column + 1)] + 1
            } else {
                lengths[at(row + 1, column)].max(lengths[at(row, column + 1)])
            };
        }
    }

    let mut pairs = Vec::new();
    let (mut row, mut column) = (0usize, 0usize);
    while row < rows && column < columns {
        if first[row] == second[column] {
            pairs.push((row, column));
            row += 1;
            column += 1;
        } else if lengths[at(row + 1, column)] >= lengths[at(row, column + 1)] {
            row += 1;
        } else {
            column += 1;
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_of_identical_inputs_is_identity() {
        let content = "line 1\nline 2\n";
        assert_eq!(merge(content, content, content).unwrap(), content);
    }

    #[test]
    fn merge_takes_local_when_server_unchanged() {
        let base = "a\nb\n";
        let local = "a\nb\nc\n";
        assert_eq!(merge(base, base, local).unwrap(), local);
    }

    #[test]
    fn merge_takes_server_when_local_unchanged() {
        let base = "a\nb\n";
        let server = "a\nserver\nb\n";
        assert_eq!(merge(base, server, base).unwrap(), server);
    }

    #[test]
    fn merge_combines_changes_on_adjacent_lines() {
        let merged = merge("A\nB\nC\n", "A\nB2\nC\n", "A\nB\nC2\n").unwrap();
        assert_eq!(merged, "A\nB2\nC2\n");
    }

    #[test]
    fn merge_combines_changes_at_opposite_ends() {
        let merged = merge(
            "start\nmiddle\nend\n",
            "changed start\nmiddle\nend\n",
            "start\nmiddle\nchanged end\n",
        )
        .unwrap();
        assert_eq!(merged, "changed start\nmiddle\nchanged end\n");
    }

    #[test]
    fn merge_combines_insertions_in_different_regions() {
        let merged = merge(
            "one\ntwo\nthree\nfour\n",
            "zero\none\ntwo\nthree\nfour\n",
            "one\ntwo\nthree\nfour\nfive\n",
        )
        .unwrap();
        assert_eq!(merged, "zero\none\ntwo\nthree\nfour\nfive\n");
    }

    #[test]
    fn merge_accepts_identical_changes_on_both_sides() {
        let merged = merge("a\nold\nz\n", "a\nnew\nz\n", "a\nnew\nz\n").unwrap();
        assert_eq!(merged, "a\nnew\nz\n");
    }

    #[test]
    fn merge_reports_overlapping_changes_as_conflict() {
        let error = merge("A\n", "B\n", "C\n").unwrap_err();
        let message = error.to_string();
        assert!(message.contains("could not automatically merge"));
        assert!(message.contains("<<<<<<< local"));
        assert!(message.contains("C"));
        assert!(message.contains("B"));
    }

    #[test]
    fn merge_conflicts_on_same_line_edits() {
        let error = merge("a\nshared\nz\n", "a\ntheirs\nz\n", "a\nours\nz\n").unwrap_err();
        let message = error.to_string();
        assert!(message.contains("ours"));
        assert!(message.contains("theirs"));
        // The unchanged surroundings stay outside the conflict markers.
        assert!(message.contains("conflicts:\na\n"));
    }

    #[test]
    fn conflicts_is_none_for_clean_cases() {
        assert!(conflicts(Some("a\n"), "a\n", "a\n").is_none());
        assert!(conflicts(Some("a\n"), "b\n", "a\n").is_none());
        assert!(conflicts(Some("a\n"), "a\n", "b\n").is_none());
        assert!(conflicts(Some("a\n"), "b\n", "b\n").is_none());
    }

    #[test]
    fn conflicts_is_none_for_mergeable_adjacent_changes() {
        assert!(conflicts(Some("A\nB\nC\n"), "A\nB2\nC\n", "A\nB\nC2\n").is_none());
    }

    #[test]
    fn conflicts_describes_overlapping_changes() {
        let description = conflicts(Some("A\n"), "B\n", "C\n").unwrap();
        assert!(description.contains("diff:"));
        assert!(description.contains("- B"));
        assert!(description.contains("+ C"));
    }

    #[test]
    fn conflicts_without_base_requires_agreement() {
        assert!(conflicts(None, "same\n", "same\n").is_none());
        let description = conflicts(None, "server\n", "local\n").unwrap();
        assert!(description.contains("no tagged base content"));
    }

    #[test]
    fn diff_marks_both_sides() {
        let rendered = diff("a\nb\n", "a\nc\n");
        assert_eq!(rendered, "  a\n- b\n+ c");
    }
}
