//! Structured extractor: pulls a single JSON value out of arbitrary
//! generator text.
//!
//! Generator output routinely wraps JSON in code fences, apologies, or
//! trailing commentary. The extractor finds the first syntactically balanced
//! value and ignores everything around it.

use crate::error::ExtractionError;

/// Return the first balanced JSON value in `text` as a subslice.
///
/// Scans from the first `{` or `[`, maintaining a bracket stack, and slices
/// at the point the stack empties. Brackets inside JSON string literals
/// (including escaped quotes) are ignored.
pub fn extract_json(text: &str) -> Result<&str, ExtractionError> {
    let start = text.find(['{', '[']).ok_or(ExtractionError::NoJson)?;

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => stack.push(c),
            '}' | ']' => {
                let opening = stack.pop().ok_or(ExtractionError::Unbalanced)?;
                if !matches!((opening, c), ('{', '}') | ('[', ']')) {
                    return Err(ExtractionError::Mismatched);
                }
                if stack.is_empty() {
                    // `c` is ASCII, so offset + 1 is a char boundary.
                    return Ok(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    Err(ExtractionError::Incomplete)
}

/// Extract and parse the first JSON value in `text`.
pub fn extract_value(text: &str) -> Result<serde_json::Value, ExtractionError> {
    Ok(serde_json::from_str(extract_json(text)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_json() {
        assert_eq!(extract_json(r#"{"a": 1}"#).unwrap(), r#"{"a": 1}"#);
    }

    #[test]
    fn test_fenced_block_with_prose() {
        let text = "Sure! Here is the plan:\n```json\n{\"title\": \"T\"}\n```\nLet me know.";
        assert_eq!(extract_json(text).unwrap(), r#"{"title": "T"}"#);
    }

    #[test]
    fn test_array_value() {
        let text = "notes: [1, [2, 3], {\"k\": []}] trailing";
        assert_eq!(extract_json(text).unwrap(), "[1, [2, 3], {\"k\": []}]");
    }

    #[test]
    fn test_brackets_inside_strings_ignored() {
        let text = r#"{"quote": "he said \"}\" and {", "n": 1} extra"#;
        let sliced = extract_json(text).unwrap();
        let value: serde_json::Value = serde_json::from_str(sliced).unwrap();
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_no_json() {
        assert!(matches!(
            extract_json("no structured data here"),
            Err(ExtractionError::NoJson)
        ));
    }

    #[test]
    fn test_incomplete() {
        assert!(matches!(
            extract_json(r#"{"a": [1, 2"#),
            Err(ExtractionError::Incomplete)
        ));
    }

    #[test]
    fn test_mismatched() {
        assert!(matches!(
            extract_json("{\"a\": [1, 2}"),
            Err(ExtractionError::Mismatched)
        ));
    }

    #[test]
    fn test_unparseable_slice() {
        // Balanced but not JSON: the slice is found, the parse fails.
        assert!(extract_json("{not json}").is_ok());
        assert!(matches!(
            extract_value("{not json}"),
            Err(ExtractionError::Parse(_))
        ));
    }

    #[test]
    fn test_exact_substring_regardless_of_noise() {
        let payload = r#"{"characters": {"Maya": {"goals": ["escape"]}}}"#;
        for wrapped in [
            format!("{payload}"),
            format!("prefix text {payload}"),
            format!("{payload} suffix"),
            format!("a\nb\n{payload}\nc"),
        ] {
            assert_eq!(extract_json(&wrapped).unwrap(), payload);
        }
    }
}
