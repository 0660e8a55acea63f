//! The default tokenizer, built on the `csv` crate.

use std::io::{BufRead, BufReader, Read};

use csv::{ReaderBuilder, StringRecord, Terminator, Trim};
use regex::Regex;
use tracing::debug;

use super::encoding::{encoding_for_label, DecodingReader};
use crate::config::ReadOptions;
use crate::error::{ErrorCode, ImportError, ImportResult};
use crate::traits::Tokenizer;
use crate::types::{Record, Value};

const DEFAULT_ENCODING: &str = "utf-8";

/// Decodes delimited text into records keyed by header name.
///
/// Header names are normalised (pattern removal, trimming, lower-casing)
/// unless a header override is given. Field values are trimmed, empty values
/// dropped and numbers converted by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvTokenizer;

impl CsvTokenizer {
    pub fn new() -> Self {
        Self
    }
}

/// Tokenizer settings validated from [`ReadOptions`].
#[derive(Debug)]
struct CsvSettings {
    delimiter: u8,
    terminator: Terminator,
    line_end: u8,
    quote: u8,
    comment: Option<u8>,
    headers_in_file: bool,
    user_headers: Option<Vec<String>>,
    skip_lines: usize,
    downcase_header: bool,
    strip_from_headers: Option<Regex>,
    strip_whitespace: bool,
    convert_numeric: bool,
    remove_empty_values: bool,
    remove_zero_values: bool,
    remove_matching: Option<Regex>,
    remove_empty_hashes: bool,
    encoding: &'static encoding_rs::Encoding,
    verbose: bool,
}

impl CsvSettings {
    fn from_options(options: &ReadOptions) -> ImportResult<Self> {
        let user_headers = options.user_provided_headers.clone();
        let headers_in_file = options.headers_in_file.unwrap_or(true);
        if !headers_in_file && user_headers.is_none() {
            return Err(ImportError::configuration(
                "headers_in_file is false but no user_provided_headers were given",
            ));
        }

        let terminator = terminator(options.row_sep.as_deref())?;
        let line_end = match terminator {
            Terminator::Any(byte) => byte,
            _ => b'\n',
        };

        Ok(Self {
            delimiter: single_byte("col_sep", options.col_sep.unwrap_or(','))?,
            terminator,
            line_end,
            quote: single_byte("quote_char", options.quote_char.unwrap_or('"'))?,
            comment: options
                .comment_char
                .map(|c| single_byte("comment_char", c))
                .transpose()?,
            headers_in_file,
            user_headers,
            skip_lines: options.skip_lines.unwrap_or(0),
            downcase_header: options.downcase_header.unwrap_or(true),
            strip_from_headers: compile(
                "strip_chars_from_headers",
                &options.strip_chars_from_headers,
            )?,
            strip_whitespace: options.strip_whitespace.unwrap_or(true),
            convert_numeric: options.convert_values_to_numeric.unwrap_or(true),
            remove_empty_values: options.remove_empty_values.unwrap_or(true),
            remove_zero_values: options.remove_zero_values.unwrap_or(false),
            remove_matching: compile("remove_values_matching", &options.remove_values_matching)?,
            remove_empty_hashes: options.remove_empty_hashes.unwrap_or(true),
            encoding: encoding_for_label(
                options.file_encoding.as_deref().unwrap_or(DEFAULT_ENCODING),
            )?,
            verbose: options.verbose(),
        })
    }

    fn reader<R: Read>(&self, input: R) -> csv::Reader<R> {
        ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .quote(self.quote)
            .comment(self.comment)
            .trim(if self.strip_whitespace { Trim::All } else { Trim::None })
            .from_reader(input)
    }

    fn normalize_header(&self, index: usize, raw: &str) -> String {
        let mut name = match &self.strip_from_headers {
            Some(pattern) => pattern.replace_all(raw, "").into_owned(),
            None => raw.to_string(),
        };
        if self.strip_whitespace {
            name = name.trim().to_string();
        }
        if self.downcase_header {
            name = name.to_lowercase();
        }
        if name.is_empty() {
            name = positional_name(index);
        }
        name
    }

    fn convert_field(&self, raw: &str) -> Option<Value> {
        if raw.is_empty() {
            return (!self.remove_empty_values).then_some(Value::Null);
        }
        if self
            .remove_matching
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(raw))
        {
            return None;
        }
        if self.remove_zero_values && is_zero(raw) {
            return None;
        }
        if self.convert_numeric {
            if let Some(number) = coerce_number(raw) {
                return Some(number);
            }
        }
        Some(Value::String(raw.to_string()))
    }

    fn build_record(&self, headers: &[String], fields: &StringRecord) -> Record {
        let mut record = Record::with_capacity(fields.len());
        for (index, raw) in fields.iter().enumerate() {
            let Some(value) = self.convert_field(raw) else {
                continue;
            };
            let key = headers
                .get(index)
                .cloned()
                .unwrap_or_else(|| positional_name(index));
            record.insert(key, value);
        }
        record
    }
}

impl Tokenizer for CsvTokenizer {
    fn decode(
        &self,
        input: &mut dyn Read,
        options: &ReadOptions,
        emit: &mut dyn FnMut(Record) -> ImportResult<()>,
    ) -> ImportResult<()> {
        let settings = CsvSettings::from_options(options)?;

        let mut buffered = BufReader::new(DecodingReader::new(input, settings.encoding));
        skip_lines(&mut buffered, settings.skip_lines, settings.line_end)?;

        let mut reader = settings.reader(buffered);
        let mut rows = reader.records();

        let file_headers = if settings.headers_in_file {
            match rows.next() {
                Some(row) => Some(row.map_err(csv_error)?),
                None => return Ok(()),
            }
        } else {
            None
        };

        let headers: Vec<String> = match (&settings.user_headers, &file_headers) {
            (Some(user), _) => user.clone(),
            (None, Some(row)) => row
                .iter()
                .enumerate()
                .map(|(index, raw)| settings.normalize_header(index, raw))
                .collect(),
            (None, None) => Vec::new(),
        };

        for row in rows {
            let row = row.map_err(csv_error)?;
            let record = settings.build_record(&headers, &row);
            if record.is_empty() && settings.remove_empty_hashes {
                continue;
            }
            if settings.verbose {
                debug!(
                    line = row.position().map(|p| p.line()),
                    fields = record.len(),
                    "Decoded record"
                );
            }
            emit(record)?;
        }

        Ok(())
    }
}

fn single_byte(option: &str, c: char) -> ImportResult<u8> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| {
            ImportError::configuration(format!(
                "{} must be a single ASCII character, got {:?}",
                option, c
            ))
        })
}

fn terminator(row_sep: Option<&str>) -> ImportResult<Terminator> {
    match row_sep {
        None | Some("\n") | Some("\r\n") | Some("auto") => Ok(Terminator::CRLF),
        Some(sep) if sep.len() == 1 && sep.is_ascii() => Ok(Terminator::Any(sep.as_bytes()[0])),
        Some(sep) => Err(ImportError::configuration(format!(
            "row_sep must be \"\\n\", \"\\r\\n\" or a single ASCII character, got {:?}",
            sep
        ))),
    }
}

fn compile(option: &str, pattern: &Option<String>) -> ImportResult<Option<Regex>> {
    pattern
        .as_deref()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                ImportError::configuration(format!("{} is not a valid pattern: {}", option, e))
            })
        })
        .transpose()
}

/// Discard `count` raw lines ending in `line_end` ahead of the CSV data.
fn skip_lines<R: BufRead>(reader: &mut R, count: usize, line_end: u8) -> ImportResult<()> {
    let mut discard = Vec::new();
    for _ in 0..count {
        discard.clear();
        if reader
            .read_until(line_end, &mut discard)
            .map_err(|e| read_error(e.to_string(), e))?
            == 0
        {
            break;
        }
    }
    Ok(())
}

fn positional_name(index: usize) -> String {
    format!("column_{}", index + 1)
}

fn is_zero(raw: &str) -> bool {
    let digits = raw.trim_start_matches(['+', '-']);
    !digits.is_empty()
        && digits.chars().all(|c| c == '0' || c == '.')
        && digits.chars().filter(|&c| c == '.').count() <= 1
        && digits.contains('0')
}

fn coerce_number(raw: &str) -> Option<Value> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    // Only plain decimal notation; "inf", "NaN" and the like stay strings.
    if raw.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E') {
        return None;
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

fn read_error(message: String, source: std::io::Error) -> ImportError {
    let code = if source.kind() == std::io::ErrorKind::InvalidData {
        ErrorCode::SrcEncoding
    } else {
        ErrorCode::SrcMalformed
    };
    ImportError::source_read_with(message, code, source)
}

fn csv_error(err: csv::Error) -> ImportError {
    let line = err.position().map(|p| p.line());
    let message = match line {
        Some(line) => format!("malformed CSV at line {}: {}", line, err),
        None => format!("malformed CSV: {}", err),
    };
    if !err.is_io_error() {
        return ImportError::source_read_with(message, ErrorCode::SrcMalformed, err);
    }
    match err.into_kind() {
        csv::ErrorKind::Io(io) => read_error(message, io),
        _ => ImportError::source_read(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(text: &str, options: ReadOptions) -> ImportResult<Vec<Record>> {
        let mut out = Vec::new();
        let mut input = text.as_bytes();
        CsvTokenizer::new().decode(&mut input, &options, &mut |record| {
            out.push(record);
            Ok(())
        })?;
        Ok(out)
    }

    #[test]
    fn test_decodes_with_header_row() {
        let records = decode(
            "Namey,Ranky,Description\nfoo,1,a foo\nbar,2,a bar\n",
            ReadOptions::default(),
        )
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["namey"], json!("foo"));
        assert_eq!(records[0]["ranky"], json!(1));
        assert_eq!(records[1]["description"], json!("a bar"));
    }

    #[test]
    fn test_empty_values_are_removed_by_default() {
        let records = decode("name,rank\nfoo,\n,\n", ReadOptions::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].contains_key("rank"));
    }

    #[test]
    fn test_empty_values_kept_as_null() {
        let options = ReadOptions {
            remove_empty_values: Some(false),
            ..Default::default()
        };
        let records = decode("name,rank\nfoo,\n", options).unwrap();
        assert_eq!(records[0]["rank"], Value::Null);
    }

    #[test]
    fn test_user_headers_replace_header_row() {
        let options = ReadOptions {
            user_provided_headers: Some(vec!["name".into(), "rank".into()]),
            ..Default::default()
        };
        let records = decode("whatever,else\nfoo,1\n", options).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], json!("foo"));
        assert_eq!(records[0]["rank"], json!(1));
    }

    #[test]
    fn test_headerless_file_with_user_headers() {
        let options = ReadOptions {
            headers_in_file: Some(false),
            user_provided_headers: Some(vec!["name".into(), "rank".into()]),
            ..Default::default()
        };
        let records = decode("foo,1\nbar,2\n", options).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_headerless_file_without_headers_is_config_error() {
        let options = ReadOptions {
            headers_in_file: Some(false),
            ..Default::default()
        };
        assert!(matches!(
            decode("foo,1\n", options),
            Err(ImportError::Configuration(_))
        ));
    }

    #[test]
    fn test_separator_quote_and_comment() {
        let options = ReadOptions {
            col_sep: Some(';'),
            quote_char: Some('\''),
            comment_char: Some('#'),
            ..Default::default()
        };
        let records = decode("name;rank\n# a comment\n'foo; the first';1\n", options).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], json!("foo; the first"));
    }

    #[test]
    fn test_skip_lines_and_header_cleanup() {
        let options = ReadOptions {
            skip_lines: Some(2),
            strip_chars_from_headers: Some(r"[\(\)]".into()),
            ..Default::default()
        };
        let records = decode("report\ngenerated today\n(Name), RANK \nfoo,1\n", options).unwrap();
        assert_eq!(records[0]["name"], json!("foo"));
        assert_eq!(records[0]["rank"], json!(1));
    }

    #[test]
    fn test_skip_lines_follows_custom_row_sep() {
        let options = ReadOptions {
            row_sep: Some("\r".into()),
            skip_lines: Some(1),
            ..Default::default()
        };
        let records = decode("junk\rname\rfoo\rbar\r", options).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], json!("foo"));
        assert_eq!(records[1]["name"], json!("bar"));
    }

    #[test]
    fn test_value_filters() {
        let options = ReadOptions {
            remove_zero_values: Some(true),
            remove_values_matching: Some("^n/a$".into()),
            convert_values_to_numeric: Some(false),
            ..Default::default()
        };
        let records = decode("a,b,c\n0.00,n/a,7\n", options).unwrap();
        assert_eq!(records[0].len(), 1);
        assert_eq!(records[0]["c"], json!("7"));
    }

    #[test]
    fn test_numeric_conversion() {
        let records = decode("a,b,c,d\n42,-1.5,1e3,NaN\n", ReadOptions::default()).unwrap();
        assert_eq!(records[0]["a"], json!(42));
        assert_eq!(records[0]["b"], json!(-1.5));
        assert_eq!(records[0]["c"], json!(1000.0));
        assert_eq!(records[0]["d"], json!("NaN"));
    }

    #[test]
    fn test_extra_columns_get_positional_names() {
        let records = decode("a\n1,2\n", ReadOptions::default()).unwrap();
        assert_eq!(records[0]["column_2"], json!(2));
    }

    #[test]
    fn test_empty_input_emits_nothing() {
        assert!(decode("", ReadOptions::default()).unwrap().is_empty());
        assert!(decode("name,rank\n", ReadOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_latin1_source() {
        let options = ReadOptions {
            file_encoding: Some("iso-8859-1".into()),
            ..Default::default()
        };
        let mut out = Vec::new();
        let mut input: &[u8] = b"name\ncaf\xe9\n";
        CsvTokenizer::new()
            .decode(&mut input, &options, &mut |record| {
                out.push(record);
                Ok(())
            })
            .unwrap();
        assert_eq!(out[0]["name"], json!("café"));
    }

    #[test]
    fn test_malformed_encoding_is_source_error() {
        let mut input: &[u8] = b"name\n\xff\xfe\n";
        let err = CsvTokenizer::new()
            .decode(&mut input, &ReadOptions::default(), &mut |_| Ok(()))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SrcEncoding);
    }

    #[test]
    fn test_invalid_options_are_config_errors() {
        for options in [
            ReadOptions {
                col_sep: Some('→'),
                ..Default::default()
            },
            ReadOptions {
                row_sep: Some("--".into()),
                ..Default::default()
            },
            ReadOptions {
                remove_values_matching: Some("(".into()),
                ..Default::default()
            },
            ReadOptions {
                file_encoding: Some("nope".into()),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                decode("a\n1\n", options),
                Err(ImportError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_emit_error_stops_decoding() {
        let mut seen = 0;
        let mut input: &[u8] = b"a\n1\n2\n3\n";
        let err = CsvTokenizer::new()
            .decode(&mut input, &ReadOptions::default(), &mut |_| {
                seen += 1;
                Err(ImportError::backend("stop"))
            })
            .unwrap_err();
        assert_eq!(seen, 1);
        assert!(matches!(err, ImportError::Backend { .. }));
    }
}
