//! Parsing and rendering the navigation table of the index topic.
//!
//! The table grammar is fixed for compatibility with existing portals:
//!
//! ```text
//! # Navigation
//! | level | path | navlink |
//! | --- | --- | --- |
//! | <int> | <slug> | [<title>](<link-or-empty>) |
//! ```
//!
//! Header comparison is case-insensitive; the slug uses only `[a-z0-9-]`.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{GatekeeperError, Result};
use crate::types::{Navlink, TableRow};

pub const NAVIGATION_TABLE_HEADER: &str = "| level | path | navlink |";
pub const NAVIGATION_TABLE_SEPARATOR: &str = "| --- | --- | --- |";

static HEADING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^#+\s+navigation\s*$").expect("invalid heading regex"));
static NAVLINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(.*)\]\((.*)\)$").expect("invalid navlink regex"));
static HIDDEN_NAVLINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[details=(.*)\]\((.*)\)\[/details\]$").expect("invalid hidden navlink regex")
});
static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("invalid slug regex"));

/// Parse the navigation table out of an index topic.
///
/// The table follows the last heading named "Navigation"; a page without one
/// has no rows yet.
pub fn from_page(page: &str) -> Result<Vec<TableRow>> {
    let lines: Vec<&str> = page.lines().collect();
    let Some(heading_at) = lines
        .iter()
        .rposition(|line| HEADING_PATTERN.is_match(line.trim()))
    else {
        return Ok(Vec::new());
    };

    let mut remaining = lines[heading_at + 1..]
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty());

    let header = remaining.next().ok_or_else(|| {
        GatekeeperError::NavigationTableParse(
            "navigation heading is not followed by a table".to_string(),
        )
    })?;
    expect_header(header)?;
    let separator = remaining.next().ok_or_else(|| {
        GatekeeperError::NavigationTableParse(
            "navigation table is missing the separator row".to_string(),
        )
    })?;
    expect_separator(separator)?;

    let mut rows = Vec::new();
    for line in remaining {
        if !line.starts_with('|') {
            break;
        }
        rows.push(parse_row(line)?);
    }
    Ok(rows)
}

/// Render rows back to the table markdown, the exact inverse of [`from_page`].
pub fn render(rows: &[TableRow], host: &str) -> String {
    let mut output = String::new();
    output.push_str("# Navigation\n");
    output.push_str(NAVIGATION_TABLE_HEADER);
    output.push('\n');
    output.push_str(NAVIGATION_TABLE_SEPARATOR);
    output.push('\n');
    for row in rows {
        output.push_str(&row.to_markdown(host));
        output.push('\n');
    }
    output
}

fn expect_header(line: &str) -> Result<()> {
    let cells = split_row(line)?;
    let normalized: Vec<String> = cells.iter().map(|cell| cell.to_lowercase()).collect();
    if normalized != ["level", "path", "navlink"] {
        return Err(GatekeeperError::NavigationTableParse(format!(
            "unexpected navigation table header: {line}"
        )));
    }
    Ok(())
}

fn expect_separator(line: &str) -> Result<()> {
    let cells = split_row(line)?;
    let all_dashes = cells.iter().all(|cell| {
        let trimmed = cell.trim_matches(':');
        trimmed.len() >= 2 && trimmed.chars().all(|character| character == '-')
    });
    if !all_dashes {
        return Err(GatekeeperError::NavigationTableParse(format!(
            "unexpected navigation table separator: {line}"
        )));
    }
    Ok(())
}

fn parse_row(line: &str) -> Result<TableRow> {
    let cells = split_row(line)?;

    let level: usize = cells[0].parse().map_err(|_| {
        GatekeeperError::NavigationTableParse(format!(
            "level is not a positive integer in row: {line}"
        ))
    })?;
    if level == 0 {
        return Err(GatekeeperError::NavigationTableParse(format!(
            "level must be positive in row: {line}"
        )));
    }

    let path = cells[1].clone();
    if !SLUG_PATTERN.is_match(&path) {
        return Err(GatekeeperError::NavigationTableParse(format!(
            "path is not a valid slug in row: {line}"
        )));
    }

    let navlink = parse_navlink(&cells[2]).ok_or_else(|| {
        GatekeeperError::NavigationTableParse(format!("malformed navlink in row: {line}"))
    })?;

    Ok(TableRow {
        level,
        path,
        navlink,
    })
}

fn parse_navlink(cell: &str) -> Option<Navlink> {
    let (captures, hidden) = match HIDDEN_NAVLINK_PATTERN.captures(cell) {
        Some(captures) => (captures, true),
        None => (NAVLINK_PATTERN.captures(cell)?, false),
    };
    let title = captures.get(1)?.as_str().trim().to_string();
    let link = captures.get(2)?.as_str().trim();
    Some(Navlink {
        title,
        link: (!link.is_empty()).then(|| link.to_string()),
        hidden,
    })
}

fn split_row(line: &str) -> Result<Vec<String>> {
    let trimmed = line.trim();
    let inner = trimmed
        .strip_prefix('|')
        .and_then(|rest| rest.strip_suffix('|'))
        .ok_or_else(|| {
            GatekeeperError::NavigationTableParse(format!("line is not a table row: {line}"))
        })?;
    let cells: Vec<String> = inner.split('|').map(|cell| cell.trim().to_string()).collect();
    if cells.len() != 3 {
        return Err(GatekeeperError::NavigationTableParse(format!(
            "expected exactly three columns in row: {line}"
        )));
    }
    Ok(cells)
}
