//! Row normalizer: one delimited record in, ordered string fields out.
//!
//! Splitting is done by `csv_core`'s incremental reader. [`RecordReader`]
//! is fed one physical line at a time; a line that ends inside a quoted
//! field is not an error, it returns [`LineParse::NeedsContinuation`] and
//! the next line continues the same record (joined with `\n`) without
//! re-reading what came before. [`parse_record`] runs a fresh reader over
//! one logical record.
//!
//! # Quoting rules
//!
//! - A field whose first character (after leading whitespace when
//!   trimming) is the quote character is quoted. Inside it, a doubled
//!   quote is a literal quote, and delimiters and newlines are literal.
//! - Characters after a closing quote up to the next delimiter are kept
//!   literally (`"ab"c` → `abc`).
//! - A quote character inside an unquoted field is literal.
//! - `trim` strips whitespace around unquoted fields only; a quoted field
//!   is kept as read.
//! - One trailing `\r` per physical line is dropped, so CRLF input parses
//!   the same as LF input.
//!
//! [`reconcile`] then fits the fields to the table's column count and tags
//! the result as [`Row::Valid`] or [`Row::Anomaly`].

use anyhow::Result;
use csv::{QuoteStyle, Terminator, WriterBuilder};
use csv_core::{ReadFieldResult, Reader, ReaderBuilder};

/// Field separator, quote character and whitespace policy for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    pub quote: u8,
    pub trim: bool,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            trim: true,
        }
    }
}

/// Result of feeding one physical line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineParse {
    Fields(Vec<String>),
    /// The record ends inside a quoted field.
    NeedsContinuation,
}

/// Why a record did not fit the table's column count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnomalyReason {
    /// More fields than columns, within tolerance. The row was truncated;
    /// `dropped` holds the values that did not fit.
    ExtraFields { dropped: Vec<String> },
    /// Field count differs from the column count beyond tolerance.
    ColumnMismatch { expected: usize, found: usize },
}

/// A record after column-count reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    /// Exactly `columns` fields (short rows are padded with empty strings).
    Valid(Vec<String>),
    Anomaly {
        reason: AnomalyReason,
        fields: Vec<String>,
    },
}

/// Assembles records from physical lines.
pub struct RecordReader {
    reader: Reader,
    dialect: Dialect,
    fields: Vec<String>,
    field: Vec<u8>,
    /// First byte of the field being read, once one has been seen.
    field_start: Option<u8>,
    open: bool,
}

impl RecordReader {
    pub fn new(dialect: &Dialect) -> Self {
        let reader = ReaderBuilder::new()
            .delimiter(dialect.delimiter)
            .quote(dialect.quote)
            .terminator(csv_core::Terminator::Any(b'\n'))
            .build();
        Self {
            reader,
            dialect: *dialect,
            fields: Vec::new(),
            field: Vec::new(),
            field_start: None,
            open: false,
        }
    }

    /// Whether the last line left a record unfinished.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Drop any unfinished record.
    pub fn reset(&mut self) {
        self.reader.reset();
        self.fields.clear();
        self.field.clear();
        self.field_start = None;
        self.open = false;
    }

    /// Feed one physical line, without its `\n`.
    pub fn push_line(&mut self, line: &str) -> LineParse {
        let line = line.strip_suffix('\r').unwrap_or(line);
        // csv_core skips empty lines; a blank line is still one empty record.
        if !self.open && (line.is_empty() || (self.dialect.trim && line.trim().is_empty())) {
            return LineParse::Fields(vec![String::new()]);
        }

        let mut input = Vec::with_capacity(line.len() + 1);
        input.extend_from_slice(line.as_bytes());
        input.push(b'\n');
        let mut output = vec![0u8; input.len()];
        let mut pos = 0;

        loop {
            if self.field_start.is_none() {
                if self.dialect.trim {
                    pos += leading_blanks(&input[pos..], self.dialect.delimiter);
                }
                self.field_start = input.get(pos).copied();
            }
            if pos >= input.len() {
                self.open = true;
                return LineParse::NeedsContinuation;
            }

            let (result, nin, nout) = self.reader.read_field(&input[pos..], &mut output);
            pos += nin;
            self.field.extend_from_slice(&output[..nout]);
            match result {
                ReadFieldResult::InputEmpty => {
                    self.open = true;
                    return LineParse::NeedsContinuation;
                }
                ReadFieldResult::OutputFull => output.resize(output.len() * 2, 0),
                ReadFieldResult::Field { record_end } => {
                    self.finish_field();
                    if record_end {
                        self.open = false;
                        return LineParse::Fields(std::mem::take(&mut self.fields));
                    }
                }
                ReadFieldResult::End => {
                    self.finish_field();
                    self.open = false;
                    return LineParse::Fields(std::mem::take(&mut self.fields));
                }
            }
        }
    }

    fn finish_field(&mut self) {
        let raw = std::mem::take(&mut self.field);
        let quoted = self.field_start.take() == Some(self.dialect.quote);
        let value = String::from_utf8_lossy(&raw).into_owned();
        if self.dialect.trim && !quoted {
            self.fields.push(value.trim().to_string());
        } else {
            self.fields.push(value);
        }
    }
}

/// Spaces and tabs at the start of `input`, unless they are the delimiter.
fn leading_blanks(input: &[u8], delimiter: u8) -> usize {
    input
        .iter()
        .take_while(|&&b| (b == b' ' || b == b'\t') && b != delimiter)
        .count()
}

/// Split a logical record into fields.
///
/// `record` may span several physical lines only inside quoted fields.
pub fn parse_record(record: &str, dialect: &Dialect) -> LineParse {
    let mut reader = RecordReader::new(dialect);
    let mut result = LineParse::NeedsContinuation;
    for line in record.split('\n') {
        result = reader.push_line(line);
    }
    result
}

/// Fit `fields` to `columns`.
///
/// With tolerance `t`, a record short by at most `t` fields is padded with
/// empty strings and returned as [`Row::Valid`]. A record long by at most
/// `t` fields is truncated and returned as an [`AnomalyReason::ExtraFields`]
/// anomaly carrying the dropped values. Anything further off is an
/// [`AnomalyReason::ColumnMismatch`] with the fields untouched.
pub fn reconcile(mut fields: Vec<String>, columns: usize, tolerance: usize) -> Row {
    let found = fields.len();
    if found == columns {
        return Row::Valid(fields);
    }

    if found < columns && columns - found <= tolerance {
        fields.resize(columns, String::new());
        return Row::Valid(fields);
    }

    if found > columns && found - columns <= tolerance {
        let dropped = fields.split_off(columns);
        return Row::Anomaly {
            reason: AnomalyReason::ExtraFields { dropped },
            fields,
        };
    }

    Row::Anomaly {
        reason: AnomalyReason::ColumnMismatch {
            expected: columns,
            found,
        },
        fields,
    }
}

/// Serialize fields into one delimited record (no line terminator).
///
/// Parsing the output with [`parse_record`] under the same dialect yields
/// `fields` again, including values containing delimiters, quotes, and
/// newlines.
pub fn serialize_record(fields: &[String], dialect: &Dialect) -> Result<String> {
    let padded = dialect.trim && fields.iter().any(|f| f.trim() != f);
    let style = if padded {
        QuoteStyle::Always
    } else {
        QuoteStyle::Necessary
    };

    let mut writer = WriterBuilder::new()
        .delimiter(dialect.delimiter)
        .quote(dialect.quote)
        .quote_style(style)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush record: {}", e))?;

    let mut line = String::from_utf8(bytes)?;
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(record: &str) -> Vec<String> {
        match parse_record(record, &Dialect::default()) {
            LineParse::Fields(f) => f,
            LineParse::NeedsContinuation => panic!("unexpected continuation for {:?}", record),
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plain_fields() {
        assert_eq!(fields("a,b,c"), strings(&["a", "b", "c"]));
        assert_eq!(fields("a,,c,"), strings(&["a", "", "c", ""]));
    }

    #[test]
    fn test_trim_applies_to_unquoted_only() {
        assert_eq!(fields("  a , b  "), strings(&["a", "b"]));
        assert_eq!(fields(r#"" a ", b"#), strings(&[" a ", "b"]));
    }

    #[test]
    fn test_no_trim_keeps_whitespace() {
        let dialect = Dialect {
            trim: false,
            ..Dialect::default()
        };
        assert_eq!(
            parse_record(" a , b", &dialect),
            LineParse::Fields(strings(&[" a ", " b"]))
        );
    }

    #[test]
    fn test_quoted_delimiter_and_escaped_quote() {
        assert_eq!(
            fields(r#""Smith, John","say ""hi""",x"#),
            strings(&["Smith, John", r#"say "hi""#, "x"])
        );
    }

    #[test]
    fn test_text_after_closing_quote_is_kept() {
        assert_eq!(fields(r#""ab"c,d"#), strings(&["abc", "d"]));
    }

    #[test]
    fn test_quote_inside_unquoted_field_is_literal() {
        assert_eq!(fields(r#"5'11",x"#), strings(&[r#"5'11""#, "x"]));
    }

    #[test]
    fn test_unbalanced_quote_needs_continuation() {
        let d = Dialect::default();
        assert_eq!(parse_record(r#"1,"first line"#, &d), LineParse::NeedsContinuation);
        assert_eq!(
            parse_record("1,\"first line\nsecond line\",3", &d),
            LineParse::Fields(strings(&["1", "first line\nsecond line", "3"]))
        );
    }

    #[test]
    fn test_reader_continues_without_rereading() {
        let mut reader = RecordReader::new(&Dialect::default());
        assert_eq!(reader.push_line(r#"7,"one"#), LineParse::NeedsContinuation);
        assert!(reader.is_open());
        assert_eq!(reader.push_line(""), LineParse::NeedsContinuation);
        assert_eq!(
            reader.push_line(r#"three",x"#),
            LineParse::Fields(strings(&["7", "one\n\nthree", "x"]))
        );
        assert!(!reader.is_open());
        assert_eq!(reader.push_line("8,y"), LineParse::Fields(strings(&["8", "y"])));
    }

    #[test]
    fn test_reset_drops_open_record() {
        let mut reader = RecordReader::new(&Dialect::default());
        assert_eq!(reader.push_line(r#"1,"never closed"#), LineParse::NeedsContinuation);
        reader.reset();
        assert!(!reader.is_open());
        assert_eq!(reader.push_line("2,ok"), LineParse::Fields(strings(&["2", "ok"])));
    }

    #[test]
    fn test_space_before_quote_with_trim() {
        assert_eq!(fields(r#"a, "b, c""#), strings(&["a", "b, c"]));
    }

    #[test]
    fn test_blank_lines_are_one_empty_field() {
        assert_eq!(fields(""), strings(&[""]));
        assert_eq!(fields("   "), strings(&[""]));
    }

    #[test]
    fn test_tab_delimiter_keeps_empty_fields() {
        let d = Dialect {
            delimiter: b'\t',
            ..Dialect::default()
        };
        assert_eq!(
            parse_record("a\t\tc", &d),
            LineParse::Fields(strings(&["a", "", "c"]))
        );
    }

    #[test]
    fn test_crlf_is_stripped_once() {
        assert_eq!(fields("a,b\r"), strings(&["a", "b"]));
    }

    #[test]
    fn test_custom_delimiter_and_quote() {
        let d = Dialect {
            delimiter: b';',
            quote: b'\'',
            trim: true,
        };
        assert_eq!(
            parse_record("'a;b';c", &d),
            LineParse::Fields(strings(&["a;b", "c"]))
        );
    }

    #[test]
    fn test_reconcile_pads_short_rows() {
        assert_eq!(
            reconcile(strings(&["1", "2"]), 3, 1),
            Row::Valid(strings(&["1", "2", ""]))
        );
    }

    #[test]
    fn test_reconcile_flags_extra_fields() {
        assert_eq!(
            reconcile(strings(&["1", "2", "3", "4"]), 3, 1),
            Row::Anomaly {
                reason: AnomalyReason::ExtraFields {
                    dropped: strings(&["4"])
                },
                fields: strings(&["1", "2", "3"]),
            }
        );
    }

    #[test]
    fn test_reconcile_rejects_beyond_tolerance() {
        let row = reconcile(strings(&["1"]), 3, 1);
        assert_eq!(
            row,
            Row::Anomaly {
                reason: AnomalyReason::ColumnMismatch {
                    expected: 3,
                    found: 1
                },
                fields: strings(&["1"]),
            }
        );
        assert!(matches!(
            reconcile(strings(&["1", "2", "3", "4"]), 3, 0),
            Row::Anomaly {
                reason: AnomalyReason::ColumnMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_serialize_then_parse_reproduces_fields() {
        let d = Dialect::default();
        let original = strings(&[
            "plain",
            "with, comma",
            r#"with "quotes""#,
            "multi\nline",
            "",
            "  padded  ",
        ]);
        let line = serialize_record(&original, &d).unwrap();
        let mut record = String::new();
        let mut parsed = None;
        for physical in line.split('\n') {
            if !record.is_empty() {
                record.push('\n');
            }
            record.push_str(physical);
            if let LineParse::Fields(f) = parse_record(&record, &d) {
                parsed = Some(f);
            }
        }
        assert_eq!(parsed.unwrap(), original);
    }

    #[test]
    fn test_serialize_with_custom_dialect() {
        let d = Dialect {
            delimiter: b'|',
            quote: b'\'',
            trim: false,
        };
        let original = strings(&["a|b", "it's", " x "]);
        let line = serialize_record(&original, &d).unwrap();
        assert_eq!(parse_record(&line, &d), LineParse::Fields(original));
    }
}
