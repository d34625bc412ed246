//! Turns raw eDNE lines into rows.
//!
//! The distribution files are single-byte Western European text with `@` as
//! the only separator. There is no quoting or escaping: a field can never
//! contain `@`. Lines are read as bytes so that decoding and the CR of CRLF
//! files are handled here rather than by the reader.

use crate::catalog::{Column, DatasetDescriptor, FieldRule};
use crate::error::ParseError;
use crate::row::{FieldValue, Row};
use encoding_rs::mem::decode_latin1;
use std::borrow::Cow;

pub const FIELD_SEPARATOR: char = '@';

/// Decodes one ISO-8859-1 line. Every byte maps to the code point of the
/// same value, so decoding cannot fail.
pub fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    decode_latin1(raw)
}

/// Strips the line terminator left by a byte reader (`\n`, `\r\n` or none).
pub fn trim_line_end(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    raw.strip_suffix(b"\r").unwrap_or(raw)
}

/// True for lines that carry no record at all.
pub fn is_blank(raw: &[u8]) -> bool {
    trim_line_end(raw).is_empty()
}

/// Decodes and parses one raw line for `descriptor`.
pub fn parse_line(raw: &[u8], descriptor: &DatasetDescriptor) -> Result<Row, ParseError> {
    let text = decode_line(trim_line_end(raw));
    parse_fields(&text, descriptor)
}

/// Splits an already decoded line and coerces every field.
///
/// Lines shorter than the descriptor's minimum, or longer than its column
/// count, are arity errors. Missing trailing optional fields become null.
pub fn parse_fields(line: &str, descriptor: &DatasetDescriptor) -> Result<Row, ParseError> {
    let found = line.split(FIELD_SEPARATOR).count();
    let (min, max) = (descriptor.min_fields(), descriptor.max_fields());

    if found < min || found > max {
        return Err(ParseError::Arity {
            expected_min: min,
            expected_max: max,
            found,
        });
    }

    let mut row = Row::with_capacity(max);
    for (field, column) in line.split(FIELD_SEPARATOR).zip(descriptor.columns) {
        row.push(coerce(field, column)?);
    }
    row.resize(max, FieldValue::Null);

    Ok(row)
}

/// Applies a column's rule to one raw field.
pub fn coerce(field: &str, column: &Column) -> Result<FieldValue, ParseError> {
    let value = match column.rule {
        FieldRule::Literal => FieldValue::Text(field.trim().to_string()),
        _ if field.is_empty() => FieldValue::Null,
        FieldRule::Raw => FieldValue::Text(field.to_string()),
        FieldRule::Text => FieldValue::Text(field.trim().to_string()),
        FieldRule::Numeric => {
            let digits = field.trim();
            if digits.is_empty() {
                FieldValue::Null
            } else {
                digits
                    .parse::<i64>()
                    .map(FieldValue::Integer)
                    .map_err(|_| ParseError::InvalidNumber {
                        column: column.name,
                        value: field.to_string(),
                    })?
            }
        },
    };
    Ok(value)
}
