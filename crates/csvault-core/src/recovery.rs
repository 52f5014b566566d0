//! Fault-tolerant file parser built on the [row normalizer](crate::normalize).
//!
//! [`parse`] turns the raw bytes of one CSV file into a [`ParsedFile`]:
//! the header (if any), the column count, every row that could be
//! normalized, a diagnostic for every row that could not, and a file-level
//! [`Outcome`]. A bad row never aborts the file.
//!
//! # Malformed-row policy
//!
//! The column count is the header's field count, or, without a header, the
//! most common field count over the first [`SAMPLE_ROWS`] records (ties go
//! to the earliest). Each record is then [reconciled](crate::normalize::reconcile)
//! with `column_tolerance`:
//!
//! | Record | Result |
//! |--------|--------|
//! | short by ≤ tolerance | padded with empty fields, imported |
//! | long by ≤ tolerance | truncated, imported, [`DiagnosticKind::Truncated`] lists the dropped values |
//! | off by more | skipped, [`DiagnosticKind::ColumnMismatch`] |
//! | blank line | ignored |
//! | quoted field never closed | its first line skipped, [`DiagnosticKind::UnterminatedQuote`] or [`DiagnosticKind::TruncatedTail`] |
//!
//! A stray opening quote costs only the line it sits on: the parser drops
//! that line and resumes reading at the next one. A quoted field may span
//! at most [`MAX_RECORD_LINES`] physical lines.
//!
//! # Outcomes
//!
//! - [`Outcome::Partial`] when input ended early: the read failed, the last
//!   input ends inside a quoted field, or the last record has no line
//!   terminator and fewer fields than the column count. Every other row is
//!   kept; only the truncated record is dropped.
//! - [`Outcome::Empty`] when no data rows exist (zero bytes, or a header
//!   only) and nothing was truncated.
//! - [`Outcome::Complete`] otherwise, even if some rows were skipped.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::hash::row_hash;
use crate::models::NormalizedRow;
use crate::normalize::{reconcile, AnomalyReason, Dialect, LineParse, RecordReader, Row};

/// Records inspected when sniffing the header and the column count.
pub const SAMPLE_ROWS: usize = 20;

/// Physical lines a quoted field may span before its opening quote is
/// treated as stray.
pub const MAX_RECORD_LINES: usize = 1000;

/// Physical lines inspected when sniffing the delimiter.
const DELIMITER_SAMPLE_LINES: usize = 10;

const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

/// How to decide whether the first record is a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HeaderMode {
    #[default]
    Auto,
    Present,
    Absent,
}

/// Parser configuration for one import run.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Field separator; sniffed per file when `None`.
    pub delimiter: Option<u8>,
    pub quote: u8,
    pub trim: bool,
    pub header: HeaderMode,
    pub column_tolerance: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            quote: b'"',
            trim: true,
            header: HeaderMode::Auto,
            column_tolerance: 1,
        }
    }
}

/// File-level result of a parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Complete,
    Partial,
    Empty,
}

/// What went wrong on one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Row skipped: field count too far from the column count.
    ColumnMismatch { expected: usize, found: usize },
    /// Row kept, but these trailing values did not fit and were dropped.
    Truncated { dropped: Vec<String> },
    /// Input ended inside this record; it was not imported.
    TruncatedTail,
    /// A quoted field opened on this line was still open after
    /// [`MAX_RECORD_LINES`] lines; the line was not imported.
    UnterminatedQuote,
    /// Reading the file failed after this many lines.
    ReadError(String),
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::ColumnMismatch { expected, found } => {
                write!(f, "expected {} fields, found {}", expected, found)
            }
            DiagnosticKind::Truncated { dropped } => {
                write!(f, "dropped {} extra field(s): {:?}", dropped.len(), dropped)
            }
            DiagnosticKind::TruncatedTail => write!(f, "input ends inside this record"),
            DiagnosticKind::UnterminatedQuote => {
                write!(f, "quoted field not closed within {} lines", MAX_RECORD_LINES)
            }
            DiagnosticKind::ReadError(msg) => write!(f, "read failed: {}", msg),
        }
    }
}

/// A per-line parse problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// 1-based line the affected record starts on.
    pub line: usize,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    /// Whether the affected row was left out of [`ParsedFile::rows`].
    pub fn skipped_row(&self) -> bool {
        matches!(
            self.kind,
            DiagnosticKind::ColumnMismatch { .. }
                | DiagnosticKind::TruncatedTail
                | DiagnosticKind::UnterminatedQuote
        )
    }
}

/// Everything the parser learned about one file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub dialect: Dialect,
    pub header: Option<Vec<String>>,
    pub column_count: usize,
    pub rows: Vec<NormalizedRow>,
    pub diagnostics: Vec<Diagnostic>,
    pub blank_lines: usize,
    pub outcome: Outcome,
}

impl ParsedFile {
    pub fn skipped_rows(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.skipped_row()).count()
    }
}

/// A logical record: one or more physical lines that parsed to fields.
struct RawRecord {
    line: usize,
    fields: Vec<String>,
    terminated: bool,
}

impl RawRecord {
    fn is_blank(&self) -> bool {
        self.fields.len() == 1 && self.fields[0].trim().is_empty()
    }
}

/// Parse a whole file.
///
/// `read_error` is the message of an I/O error that stopped reading after
/// `bytes`; it forces a [`Outcome::Partial`] result.
pub fn parse(bytes: &[u8], read_error: Option<&str>, options: &ParseOptions) -> ParsedFile {
    let decoded = String::from_utf8_lossy(bytes);
    let text = decoded.strip_prefix('\u{feff}').unwrap_or(&decoded);

    let dialect = Dialect {
        delimiter: options
            .delimiter
            .unwrap_or_else(|| sniff_delimiter(text, options.quote)),
        quote: options.quote,
        trim: options.trim,
    };

    let (records, mut diagnostics) = assemble_records(text, &dialect);
    let physical_lines = text.lines().count();
    let mut truncated = diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::TruncatedTail);

    let mut blank_lines = 0usize;
    let mut content: Vec<RawRecord> = Vec::with_capacity(records.len());
    for record in records {
        if record.is_blank() {
            blank_lines += 1;
        } else {
            content.push(record);
        }
    }

    let has_header = match options.header {
        HeaderMode::Present => !content.is_empty(),
        HeaderMode::Absent => false,
        HeaderMode::Auto => match content.split_first() {
            Some((first, rest)) => {
                let sample: Vec<&[String]> = rest
                    .iter()
                    .take(SAMPLE_ROWS)
                    .map(|r| r.fields.as_slice())
                    .collect();
                detect_header(&first.fields, &sample)
            }
            None => false,
        },
    };

    let mut data = content.into_iter();
    let header = if has_header {
        data.next().map(|r| r.fields)
    } else {
        None
    };
    let data: Vec<RawRecord> = data.collect();

    let column_count = match &header {
        Some(h) => h.len(),
        None => most_common_width(&data),
    };

    let mut rows = Vec::with_capacity(data.len());
    let last_index = data.len().saturating_sub(1);
    for (i, record) in data.into_iter().enumerate() {
        if i == last_index && !record.terminated && record.fields.len() < column_count {
            truncated = true;
            diagnostics.push(Diagnostic {
                line: record.line,
                kind: DiagnosticKind::TruncatedTail,
            });
            continue;
        }

        match reconcile(record.fields, column_count, options.column_tolerance) {
            Row::Valid(fields) => rows.push(make_row(record.line, fields)),
            Row::Anomaly {
                reason: AnomalyReason::ExtraFields { dropped },
                fields,
            } => {
                diagnostics.push(Diagnostic {
                    line: record.line,
                    kind: DiagnosticKind::Truncated { dropped },
                });
                rows.push(make_row(record.line, fields));
            }
            Row::Anomaly {
                reason: AnomalyReason::ColumnMismatch { expected, found },
                ..
            } => {
                diagnostics.push(Diagnostic {
                    line: record.line,
                    kind: DiagnosticKind::ColumnMismatch { expected, found },
                });
            }
        }
    }

    diagnostics.sort_by_key(|d| d.line);

    if let Some(msg) = read_error {
        truncated = true;
        diagnostics.push(Diagnostic {
            line: physical_lines + 1,
            kind: DiagnosticKind::ReadError(msg.to_string()),
        });
    }

    let outcome = if truncated {
        Outcome::Partial
    } else if rows.is_empty() {
        Outcome::Empty
    } else {
        Outcome::Complete
    };

    ParsedFile {
        dialect,
        header,
        column_count,
        rows,
        diagnostics,
        blank_lines,
        outcome,
    }
}

fn make_row(line: usize, fields: Vec<String>) -> NormalizedRow {
    let hash = row_hash(&fields);
    NormalizedRow { line, fields, hash }
}

/// Join physical lines into logical records.
///
/// A record still open after [`MAX_RECORD_LINES`] lines, or at the end of
/// the input, loses its first line: the reader is reset and resumes on the
/// line after it. The returned diagnostics name every line dropped that way.
fn assemble_records(text: &str, dialect: &Dialect) -> (Vec<RawRecord>, Vec<Diagnostic>) {
    let mut records = Vec::new();
    let mut dropped = Vec::new();
    if text.is_empty() {
        return (records, dropped);
    }

    let ends_with_newline = text.ends_with('\n');
    let body = if ends_with_newline {
        &text[..text.len() - 1]
    } else {
        text
    };
    let lines: Vec<&str> = body.split('\n').collect();
    let last = lines.len() - 1;

    let mut reader = RecordReader::new(dialect);
    let mut start = 0usize;
    let mut i = 0usize;
    loop {
        if reader.is_open() && (i == lines.len() || i - start >= MAX_RECORD_LINES) {
            let kind = if i == lines.len() {
                DiagnosticKind::TruncatedTail
            } else {
                DiagnosticKind::UnterminatedQuote
            };
            dropped.push(Diagnostic {
                line: start + 1,
                kind,
            });
            reader.reset();
            i = start + 1;
            continue;
        }
        if i == lines.len() {
            break;
        }

        if !reader.is_open() {
            start = i;
        }
        if let LineParse::Fields(fields) = reader.push_line(lines[i]) {
            records.push(RawRecord {
                line: start + 1,
                fields,
                terminated: i < last || ends_with_newline,
            });
        }
        i += 1;
    }

    (records, dropped)
}

fn most_common_width(records: &[RawRecord]) -> usize {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    let mut order: Vec<usize> = Vec::new();
    for record in records.iter().take(SAMPLE_ROWS) {
        let width = record.fields.len();
        let entry = counts.entry(width).or_insert(0);
        if *entry == 0 {
            order.push(width);
        }
        *entry += 1;
    }

    let mut best = 0usize;
    let mut best_count = 0usize;
    for width in order {
        let count = counts[&width];
        if count > best_count {
            best = width;
            best_count = count;
        }
    }
    best
}

/// Pick the candidate delimiter whose per-line count is highest and most
/// consistent across the first lines of the file.
pub fn sniff_delimiter(text: &str, quote: u8) -> u8 {
    let sample: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(DELIMITER_SAMPLE_LINES)
        .collect();

    let mut best = b',';
    let mut best_score = 0.0f32;
    if sample.is_empty() {
        return best;
    }

    for &candidate in DELIMITER_CANDIDATES.iter().filter(|&&c| c != quote) {
        let counts: Vec<f32> = sample
            .iter()
            .map(|line| line.bytes().filter(|&b| b == candidate).count() as f32)
            .collect();
        let avg = counts.iter().sum::<f32>() / counts.len() as f32;
        let variance = counts.iter().map(|c| (c - avg).powi(2)).sum::<f32>() / counts.len() as f32;
        let score = avg / (1.0 + variance.sqrt());
        if score > best_score {
            best_score = score;
            best = candidate;
        }
    }

    best
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueClass {
    Integer,
    Float,
    Text(usize),
}

fn classify(value: &str) -> Option<ValueClass> {
    let v = value.trim();
    if v.is_empty() {
        None
    } else if v.parse::<i64>().is_ok() {
        Some(ValueClass::Integer)
    } else if v.parse::<f64>().is_ok() {
        Some(ValueClass::Float)
    } else {
        Some(ValueClass::Text(v.chars().count()))
    }
}

fn is_numeric(value: &str) -> bool {
    matches!(
        classify(value),
        Some(ValueClass::Integer) | Some(ValueClass::Float)
    )
}

/// Decide whether `first` is a header row.
///
/// Every column whose sample values share one class (integer, float, or
/// text of one length) votes: for a header when the first value's class
/// differs, against when it matches. Without a decisive vote, the first
/// row is a header when its values are non-empty, non-numeric, distinct,
/// and never repeated in their column below.
fn detect_header(first: &[String], sample: &[&[String]]) -> bool {
    let width = first.len();
    let mut votes: i32 = 0;

    for col in 0..width {
        let mut class: Option<ValueClass> = None;
        let mut consistent = true;
        for row in sample.iter().filter(|r| r.len() == width) {
            let Some(c) = classify(&row[col]) else {
                continue;
            };
            match class {
                None => class = Some(c),
                Some(prev) if prev != c => {
                    consistent = false;
                    break;
                }
                Some(_) => {}
            }
        }

        if let (true, Some(class)) = (consistent, class) {
            if classify(&first[col]) == Some(class) {
                votes -= 1;
            } else {
                votes += 1;
            }
        }
    }

    if votes != 0 {
        return votes > 0;
    }

    let mut seen = std::collections::HashSet::new();
    let plausible = first
        .iter()
        .all(|f| !f.trim().is_empty() && !is_numeric(f) && seen.insert(f.as_str()));
    if !plausible {
        return false;
    }
    !sample.iter().any(|row| {
        row.iter()
            .zip(first.iter())
            .any(|(value, name)| value == name)
    })
}
