//! Per-line interpretation.

use filepipe_core::{FileId, LineRecord};

/// Turn one framed line into a record.
///
/// Returns `None` for a blank line; the caller must not consume a line number
/// for it. A line that is not valid JSON becomes an `errored` record rather
/// than an error.
pub fn interpret_line(file_id: FileId, line_number: u64, raw: &str) -> Option<LineRecord> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let record = match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(payload) => LineRecord::parsed(file_id, line_number, trimmed.to_string(), payload),
        Err(err) => LineRecord::errored(file_id, line_number, trimmed.to_string(), err.to_string()),
    };
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filepipe_core::LineState;

    #[test]
    fn blank_lines_yield_nothing() {
        assert!(interpret_line(FileId::new(), 1, "").is_none());
        assert!(interpret_line(FileId::new(), 1, " \t ").is_none());
    }

    #[test]
    fn json_line_is_parsed_and_trimmed() {
        let rec = interpret_line(FileId::new(), 3, "  {\"a\":1}  ").unwrap();
        assert_eq!(rec.state(), LineState::Parsed);
        assert_eq!(rec.line_number, 3);
        assert_eq!(rec.raw_text, "{\"a\":1}");
        assert_eq!(rec.payload(), Some(&serde_json::json!({"a": 1})));
    }

    #[test]
    fn bad_line_is_errored_not_fatal() {
        let rec = interpret_line(FileId::new(), 2, "not json").unwrap();
        assert_eq!(rec.state(), LineState::Errored);
        assert_eq!(rec.raw_text, "not json");
        assert!(!rec.error().unwrap().is_empty());
    }
}
