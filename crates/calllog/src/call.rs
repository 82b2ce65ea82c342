//! Phone call records as they appear in a call log file.
//!
//! One record per line: `from | to | HH:MM:SS`, where the duration is written
//! as a time of day measured from midnight.

use std::time::Duration;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use chunkflow_batch::ItemError;
use chunkflow_batch::item::{DelimitedLineTokenizer, FieldSet, FlatFileReader};

pub const FIELD_FROM: &str = "from";
pub const FIELD_TO: &str = "to";
pub const FIELD_DURATION: &str = "duration";

const DELIMITER: &str = "|";
const DURATION_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneCall {
    pub from: String,
    pub to: String,
    pub duration: Duration,
}

impl PhoneCall {
    pub fn new(from: impl Into<String>, to: impl Into<String>, duration: Duration) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            duration,
        }
    }

    /// Map a tokenized line into a call.
    pub fn from_fields(fields: &FieldSet) -> Result<Self, ItemError> {
        let from = subscriber(fields, FIELD_FROM)?;
        let to = subscriber(fields, FIELD_TO)?;
        let duration = parse_duration(fields.read_string(FIELD_DURATION)?)?;
        Ok(Self { from, to, duration })
    }
}

impl std::fmt::Display for PhoneCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {} ({}s)", self.from, self.to, self.duration.as_secs())
    }
}

fn subscriber(fields: &FieldSet, name: &str) -> Result<String, ItemError> {
    let value = fields.read_string(name)?;
    if value.is_empty() {
        return Err(ItemError::parse(None, "", format!("field '{name}' is empty")));
    }
    Ok(value.to_string())
}

/// `HH:MM:SS` as the time elapsed since midnight.
pub fn parse_duration(raw: &str) -> Result<Duration, ItemError> {
    let time = NaiveTime::parse_from_str(raw, DURATION_FORMAT)
        .map_err(|e| ItemError::parse(None, raw, format!("invalid duration: {e}")))?;
    Ok(Duration::from_secs(u64::from(time.num_seconds_from_midnight())))
}

pub fn tokenizer() -> DelimitedLineTokenizer {
    DelimitedLineTokenizer::new(DELIMITER).with_names([FIELD_FROM, FIELD_TO, FIELD_DURATION])
}

/// Reader over a call log file.
pub fn open_call_log(path: &str) -> Result<FlatFileReader<PhoneCall>, ItemError> {
    FlatFileReader::open(path, tokenizer(), PhoneCall::from_fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_trimmed_record() {
        let fields = tokenizer().tokenize("0701234567 | 0707654321 | 01:02:03").unwrap();
        let call = PhoneCall::from_fields(&fields).unwrap();
        assert_eq!(call.from, "0701234567");
        assert_eq!(call.to, "0707654321");
        assert_eq!(call.duration, Duration::from_secs(3723));
    }

    #[test]
    fn duration_must_be_a_time_of_day() {
        assert!(matches!(parse_duration("00:00:59"), Ok(d) if d.as_secs() == 59));
        assert!(matches!(parse_duration("1:2"), Err(ItemError::Parse { .. })));
        assert!(matches!(parse_duration("25:00:00"), Err(ItemError::Parse { .. })));
    }

    #[test]
    fn empty_subscriber_is_a_parse_error() {
        let fields = tokenizer().tokenize(" | 0707654321 | 00:00:10").unwrap();
        assert!(matches!(PhoneCall::from_fields(&fields), Err(ItemError::Parse { .. })));
    }

    #[test]
    fn missing_field_is_a_parse_error() {
        assert!(matches!(
            tokenizer().tokenize("0701234567 | 00:00:10"),
            Err(ItemError::Parse { .. })
        ));
    }
}
