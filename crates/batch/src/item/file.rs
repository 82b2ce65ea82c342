//! Line-oriented flat file reading.
//!
//! A [`FlatFileReader`] pulls one line at a time, skips header lines, blank
//! lines and comments, splits the line with a [`DelimitedLineTokenizer`] and
//! maps the resulting [`FieldSet`] into an item. Tokenizing and mapping
//! failures surface as `ItemError::Parse` carrying the 1-based line number, so
//! a skip policy can discard the record and move on.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::ItemError;
use crate::item::Reader;

/// Named, trimmed fields of one delimited line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    names: Vec<String>,
    values: Vec<String>,
}

impl FieldSet {
    pub fn read_string(&self, name: &str) -> Result<&str, ItemError> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
            .ok_or_else(|| ItemError::parse(None, "", format!("no field named '{name}'")))
    }

    pub fn read_i64(&self, name: &str) -> Result<i64, ItemError> {
        let raw = self.read_string(name)?;
        raw.parse()
            .map_err(|e| ItemError::parse(None, raw, format!("field '{name}': {e}")))
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// Splits a line on a delimiter and names the tokens.
#[derive(Debug, Clone)]
pub struct DelimitedLineTokenizer {
    delimiter: String,
    names: Vec<String>,
    strict: bool,
}

impl DelimitedLineTokenizer {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
            names: Vec::new(),
            strict: true,
        }
    }

    pub fn with_names<I>(mut self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Non-strict tokenizers pad missing tokens with empty strings and drop
    /// extra ones instead of failing.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn tokenize(&self, line: &str) -> Result<FieldSet, ItemError> {
        let mut values: Vec<String> = line
            .split(self.delimiter.as_str())
            .map(|t| t.trim().to_string())
            .collect();

        if !self.names.is_empty() && values.len() != self.names.len() {
            if self.strict {
                return Err(ItemError::parse(
                    None,
                    line,
                    format!(
                        "expected {} tokens but found {}",
                        self.names.len(),
                        values.len()
                    ),
                ));
            }
            values.resize(self.names.len(), String::new());
        }

        let names = if self.names.is_empty() {
            (0..values.len()).map(|i| i.to_string()).collect()
        } else {
            self.names.clone()
        };

        Ok(FieldSet { names, values })
    }
}

type FieldSetMapper<T> = Box<dyn Fn(&FieldSet) -> Result<T, ItemError>>;

/// Reads delimited records from any buffered source, usually a file.
pub struct FlatFileReader<T> {
    lines: Box<dyn BufRead>,
    tokenizer: DelimitedLineTokenizer,
    mapper: FieldSetMapper<T>,
    lines_to_skip: usize,
    comment_prefixes: Vec<String>,
    line_number: usize,
}

impl<T> FlatFileReader<T> {
    pub fn new<M>(
        source: impl BufRead + 'static,
        tokenizer: DelimitedLineTokenizer,
        mapper: M,
    ) -> Self
    where
        M: Fn(&FieldSet) -> Result<T, ItemError> + 'static,
    {
        Self {
            lines: Box::new(source),
            tokenizer,
            mapper: Box::new(mapper),
            lines_to_skip: 0,
            comment_prefixes: vec!["#".to_string()],
            line_number: 0,
        }
    }

    /// Open a file. A missing or unreadable file is a resource error, which no
    /// default skip policy will swallow.
    pub fn open<M>(
        path: impl AsRef<Path>,
        tokenizer: DelimitedLineTokenizer,
        mapper: M,
    ) -> Result<Self, ItemError>
    where
        M: Fn(&FieldSet) -> Result<T, ItemError> + 'static,
    {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| ItemError::resource(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self::new(BufReader::new(file), tokenizer, mapper))
    }

    /// Number of leading lines (headers) to ignore.
    pub fn with_lines_to_skip(mut self, lines: usize) -> Self {
        self.lines_to_skip = lines;
        self
    }

    pub fn with_comment_prefixes<I>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.comment_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Next line that carries a record. A line that is not valid UTF-8 is a
    /// malformed record, reported with its line number like any parse error.
    fn next_record_line(&mut self) -> Result<Option<String>, ItemError> {
        loop {
            let mut raw = Vec::new();
            let read = self.lines.read_until(b'\n', &mut raw).map_err(|e| {
                ItemError::resource(format!("read failed after line {}: {e}", self.line_number))
            })?;
            if read == 0 {
                return Ok(None);
            }
            self.line_number += 1;

            if self.line_number <= self.lines_to_skip {
                continue;
            }
            let line = String::from_utf8(raw).map_err(|e| {
                let lossy = String::from_utf8_lossy(e.as_bytes());
                ItemError::parse(
                    Some(self.line_number),
                    lossy.trim_end_matches(['\n', '\r']),
                    format!("invalid UTF-8: {}", e.utf8_error()),
                )
            })?;
            let record = line.trim_end_matches(['\n', '\r']);
            if record.trim().is_empty() {
                continue;
            }
            if self.comment_prefixes.iter().any(|p| record.starts_with(p.as_str())) {
                continue;
            }
            return Ok(Some(record.to_string()));
        }
    }
}

impl<T> Reader<T> for FlatFileReader<T> {
    fn read(&mut self) -> Result<Option<T>, ItemError> {
        let Some(line) = self.next_record_line()? else {
            return Ok(None);
        };
        let line_number = self.line_number;

        self.tokenizer
            .tokenize(&line)
            .and_then(|fields| (self.mapper)(&fields))
            .map(Some)
            .map_err(|e| match e {
                ItemError::Parse { message, .. } => {
                    ItemError::parse(Some(line_number), line.as_str(), message)
                }
                other => other,
            })
    }
}
