//! Content handlers: structured views over content data

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Structured form of a content
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedContent {
    /// `key=value` pairs, sorted by key
    AvPairs(BTreeMap<String, String>),
    Json(serde_json::Value),
    Values(Vec<f64>),
}

/// Parses and unparses the data of some mimetypes
pub trait ContentHandler {
    /// Score for `mimetype`; 0 means not handled
    fn claims_for_handle(&self, mimetype: &str) -> u32;

    fn parse(&self, data: &[u8]) -> Result<ParsedContent>;

    fn unparse(&self, value: &ParsedContent) -> Result<Vec<u8>>;
}

fn utf8(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data).map_err(|e| Error::Content(format!("invalid UTF-8: {}", e)))
}

fn mismatch(handler: &str, value: &ParsedContent) -> Error {
    Error::Content(format!("{} handler can not unparse {:?}", handler, value))
}

// ==================== avpairs ====================

const AVPAIRS_MIMETYPES: [&str; 3] = [
    "application/x-advene-builtin-view",
    "application/x-advene-type-constraint",
    "application/x-advene-structured",
];

/// Key of lines without `=`
pub const AVPAIRS_ERROR_KEY: &str = "_error";

/// `key=value` lines, with `%`, `=` and newlines percent-quoted
#[derive(Debug, Default)]
pub struct AvPairsHandler;

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '=' => out.push_str("%3D"),
            '\n' => out.push_str("%0A"),
            _ => out.push(c),
        }
    }
    out
}

fn unquote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3).unwrap_or("");
        let decoded = match code.to_ascii_uppercase().as_str() {
            "25" => Some('%'),
            "3D" => Some('='),
            "0A" => Some('\n'),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[pos + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

impl ContentHandler for AvPairsHandler {
    fn claims_for_handle(&self, mimetype: &str) -> u32 {
        if AVPAIRS_MIMETYPES.contains(&mimetype) {
            80
        } else {
            0
        }
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedContent> {
        let mut pairs = BTreeMap::new();
        for line in utf8(data)?.lines().filter(|l| !l.trim().is_empty()) {
            match line.split_once('=') {
                Some((key, value)) => {
                    pairs.insert(unquote(key.trim()), unquote(value));
                }
                None => {
                    pairs.insert(AVPAIRS_ERROR_KEY.to_string(), unquote(line));
                }
            }
        }
        Ok(ParsedContent::AvPairs(pairs))
    }

    fn unparse(&self, value: &ParsedContent) -> Result<Vec<u8>> {
        let ParsedContent::AvPairs(pairs) = value else {
            return Err(mismatch("avpairs", value));
        };
        let lines: Vec<String> = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", quote(k), quote(v)))
            .collect();
        Ok(lines.join("\n").into_bytes())
    }
}

// ==================== json ====================

#[derive(Debug, Default)]
pub struct JsonHandler;

impl ContentHandler for JsonHandler {
    fn claims_for_handle(&self, mimetype: &str) -> u32 {
        match mimetype {
            "application/json" => 80,
            m if m.ends_with("+json") => 50,
            _ => 0,
        }
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedContent> {
        if data.is_empty() {
            return Ok(ParsedContent::Json(serde_json::Value::Null));
        }
        serde_json::from_slice(data)
            .map(ParsedContent::Json)
            .map_err(|e| Error::Content(format!("invalid JSON: {}", e)))
    }

    fn unparse(&self, value: &ParsedContent) -> Result<Vec<u8>> {
        let ParsedContent::Json(json) = value else {
            return Err(mismatch("json", value));
        };
        serde_json::to_vec_pretty(json).map_err(|e| Error::Content(e.to_string()))
    }
}

// ==================== values ====================

/// Whitespace-separated numbers; unparsable entries read as 0
#[derive(Debug, Default)]
pub struct ValuesHandler;

impl ContentHandler for ValuesHandler {
    fn claims_for_handle(&self, mimetype: &str) -> u32 {
        if mimetype == "application/x-advene-values" {
            80
        } else {
            0
        }
    }

    fn parse(&self, data: &[u8]) -> Result<ParsedContent> {
        let values = utf8(data)?
            .split_whitespace()
            .map(|v| v.parse::<f64>().unwrap_or(0.0))
            .collect();
        Ok(ParsedContent::Values(values))
    }

    fn unparse(&self, value: &ParsedContent) -> Result<Vec<u8>> {
        let ParsedContent::Values(values) = value else {
            return Err(mismatch("values", value));
        };
        let words: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        Ok(words.join(" ").into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avpairs_quoting() {
        let handler = AvPairsHandler;
        let mut pairs = BTreeMap::new();
        pairs.insert("a=b".to_string(), "50%\nmore".to_string());
        let data = handler.unparse(&ParsedContent::AvPairs(pairs.clone())).unwrap();
        assert_eq!(data, b"a%3Db=50%25%0Amore".to_vec());
        assert_eq!(handler.parse(&data).unwrap(), ParsedContent::AvPairs(pairs));
    }

    #[test]
    fn test_avpairs_line_without_equal() {
        let parsed = AvPairsHandler.parse(b"x=1\noops\n\ny=a=b").unwrap();
        let ParsedContent::AvPairs(pairs) = parsed else {
            panic!("not avpairs");
        };
        assert_eq!(pairs.get("x").map(String::as_str), Some("1"));
        assert_eq!(pairs.get("y").map(String::as_str), Some("a=b"));
        assert_eq!(pairs.get(AVPAIRS_ERROR_KEY).map(String::as_str), Some("oops"));
    }

    #[test]
    fn test_values() {
        let handler = ValuesHandler;
        assert_eq!(
            handler.parse(b" 1 2.5\n-3 x ").unwrap(),
            ParsedContent::Values(vec![1.0, 2.5, -3.0, 0.0])
        );
        let data = handler
            .unparse(&ParsedContent::Values(vec![1.0, 0.1, -2.5]))
            .unwrap();
        assert_eq!(data, b"1 0.1 -2.5".to_vec());
    }

    #[test]
    fn test_json() {
        let handler = JsonHandler;
        assert_eq!(handler.claims_for_handle("application/json"), 80);
        assert_eq!(handler.claims_for_handle("application/schema+json"), 50);
        assert_eq!(handler.claims_for_handle("text/plain"), 0);

        let parsed = handler.parse(br#"{"a": [1, 2]}"#).unwrap();
        assert_eq!(parsed, ParsedContent::Json(serde_json::json!({"a": [1, 2]})));
        assert!(matches!(handler.parse(b"{"), Err(Error::Content(_))));
        assert!(handler.unparse(&ParsedContent::Values(vec![])).is_err());
    }
}
