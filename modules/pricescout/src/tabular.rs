//! Delimited-text input and output: the query list in, the summary and
//! ledger tables out.
//!
//! Quoting follows RFC 4180 closely enough for spreadsheet exports: fields
//! containing the separator, a quote or a line break are quoted, embedded
//! quotes are doubled, CRLF is tolerated on input.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::mem::take;
use std::path::Path;

use clap::ValueEnum;
use tracing::{info, warn};

use pricescout_common::{PriceScoutError, Query};

use crate::scout::QueryOutcome;

/// Cells a spreadsheet pivot export leaves in the product column.
const PLACEHOLDER_CELLS: &[&str] = &["(vazio)", "Total Geral"];

pub const SUMMARY_HEADER: [&str; 3] = ["query", "min_price", "max_price"];
pub const LEDGER_HEADER: [&str; 7] = [
    "query",
    "candidate_name",
    "price",
    "similarity",
    "link",
    "status",
    "rejection_reason",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Delim {
    #[default]
    Csv,
    Tsv,
}

impl Delim {
    pub fn sep(self) -> char {
        match self {
            Delim::Csv => ',',
            Delim::Tsv => '\t',
        }
    }
}

/* ---------------- Parsing ---------------- */

/// Split delimited text into rows of fields. Blank lines are skipped.
pub fn parse_rows(text: &str, sep: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            c if c == sep && !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(ch),
        }
    }

    // Last line without a trailing newline; unterminated quotes keep what was read.
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows
}

/// Guess the separator from the header line.
fn sniff_separator(first_line: &str) -> char {
    if first_line.contains('\t') {
        '\t'
    } else if first_line.contains(';') && !first_line.contains(',') {
        ';'
    } else {
        ','
    }
}

fn is_placeholder(cell: &str) -> bool {
    PLACEHOLDER_CELLS
        .iter()
        .any(|p| cell.eq_ignore_ascii_case(p))
}

/// Load the queries in `column` of a delimited file with a header row.
///
/// A file whose header has a single cell that is not `column` is read as a
/// plain list, one query per line, header line included.
pub fn load_queries(path: &Path, column: &str) -> Result<Vec<Query>, PriceScoutError> {
    let text = fs::read_to_string(path)?;
    let text = text.trim_start_matches('\u{feff}');
    let sep = sniff_separator(text.lines().next().unwrap_or_default());
    let rows = parse_rows(text, sep);

    let Some(header) = rows.first() else {
        return Err(PriceScoutError::Input(format!(
            "{} has no rows",
            path.display()
        )));
    };

    let cells: Vec<&str> = match header
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(column.trim()))
    {
        Some(idx) => rows[1..]
            .iter()
            .filter_map(|r| r.get(idx))
            .map(String::as_str)
            .collect(),
        None if header.len() == 1 => {
            warn!(
                path = %path.display(),
                column,
                "Column not found, reading file as a plain query list"
            );
            rows.iter().filter_map(|r| r.first()).map(String::as_str).collect()
        }
        None => {
            return Err(PriceScoutError::Input(format!(
                "column '{column}' not found in {} (have: {})",
                path.display(),
                header.join(", ")
            )));
        }
    };

    let mut skipped = 0usize;
    let queries: Vec<Query> = cells
        .into_iter()
        .map(str::trim)
        .filter(|c| {
            let keep = !c.is_empty() && !is_placeholder(c);
            if !keep {
                skipped += 1;
            }
            keep
        })
        .map(Query::new)
        .collect();

    info!(
        path = %path.display(),
        queries = queries.len(),
        skipped,
        "Loaded queries"
    );
    Ok(queries)
}

/* ---------------- Writing ---------------- */

fn needs_quotes(field: &str, sep: char) -> bool {
    field.contains(sep) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write one row, quoting where needed.
pub fn write_row<W: Write, S: AsRef<str>>(mut w: W, row: &[S], sep: char) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            write!(w, "{sep}")?;
        }
        let cell = cell.as_ref();
        if needs_quotes(cell, sep) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    writeln!(w)
}

fn summary_row(outcome: &QueryOutcome) -> [String; 3] {
    let s = &outcome.summary;
    [
        s.query.clone(),
        s.min_price.to_string(),
        s.max_price.to_string(),
    ]
}

/// One row per query: the query and its min/max price or sentinel.
pub fn write_summary(
    path: &Path,
    outcomes: &[QueryOutcome],
    delim: Delim,
) -> Result<(), PriceScoutError> {
    let mut w = BufWriter::new(fs::File::create(path)?);
    write_row(&mut w, &SUMMARY_HEADER, delim.sep())?;
    for outcome in outcomes {
        write_row(&mut w, &summary_row(outcome), delim.sep())?;
    }
    w.flush()?;
    info!(path = %path.display(), rows = outcomes.len(), "Summary written");
    Ok(())
}

/// One row per evaluation across every query, rejected ones included.
pub fn write_ledger(
    path: &Path,
    outcomes: &[QueryOutcome],
    delim: Delim,
) -> Result<(), PriceScoutError> {
    let mut w = BufWriter::new(fs::File::create(path)?);
    write_row(&mut w, &LEDGER_HEADER, delim.sep())?;

    let mut rows = 0usize;
    for outcome in outcomes {
        for e in outcome.ledger.entries() {
            let row = [
                outcome.summary.query.clone(),
                e.candidate.name.clone(),
                format!("{:.2}", e.candidate.price),
                e.similarity_percent(),
                e.candidate.link.clone().unwrap_or_default(),
                e.status.to_string(),
                e.rejection_reason.clone().unwrap_or_default(),
            ];
            write_row(&mut w, &row, delim.sep())?;
            rows += 1;
        }
    }
    w.flush()?;
    info!(path = %path.display(), rows, "Ledger written");
    Ok(())
}
