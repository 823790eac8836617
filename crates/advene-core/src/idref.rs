//! id-ref and uri-ref grammar
//!
//! - `id`: an element of the same package
//! - `import:id`: an element reached through the named import
//! - `uri-or-url#id`: an element of whichever reachable package has that
//!   uri or url
//!
//! id-refs never have more than two segments; deeper references are
//! expressed as uri-refs.

use crate::error::{Error, Result};

/// Split an id-ref into its optional import prefix and local id
///
/// A colon at position 0 (or no colon at all) means a plain id.
pub fn split_id_ref(idref: &str) -> (Option<&str>, &str) {
    match idref.find(':') {
        Some(pos) if pos > 0 => (Some(&idref[..pos]), &idref[pos + 1..]),
        _ => (None, idref),
    }
}

/// Join an import prefix and a local id; an empty prefix yields the bare id
pub fn join_id_ref(prefix: &str, id: &str) -> String {
    if prefix.is_empty() {
        id.to_string()
    } else {
        format!("{}:{}", prefix, id)
    }
}

/// Split a uri-ref at its last `#`, if any
pub fn split_uri_ref(uriref: &str) -> Option<(&str, &str)> {
    uriref
        .rfind('#')
        .map(|pos| (&uriref[..pos], &uriref[pos + 1..]))
}

pub fn is_uri_ref(s: &str) -> bool {
    s.contains('#')
}

/// Build a uri-ref from a package base (its uri, or url when it has none)
pub fn make_uri_ref(base: &str, id: &str) -> String {
    format!("{}#{}", base, id)
}

/// Check that `id` can name an element
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::model("element id can not be empty"));
    }
    if let Some(c) = id
        .chars()
        .find(|c| matches!(c, ':' | '#' | '/' | '?') || c.is_whitespace())
    {
        return Err(Error::model(format!(
            "invalid character {:?} in element id {:?}",
            c, id
        )));
    }
    Ok(())
}

/// Check that an id-ref has at most one import hop
pub fn check_depth(idref: &str) -> Result<()> {
    if is_uri_ref(idref) {
        return Ok(());
    }
    let (_, local) = split_id_ref(idref);
    if local.contains(':') {
        return Err(Error::model(format!(
            "id-ref {:?} has more than one import hop",
            idref
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_id_ref() {
        assert_eq!(split_id_ref("a1"), (None, "a1"));
        assert_eq!(split_id_ref("i:a1"), (Some("i"), "a1"));
        assert_eq!(split_id_ref(":a1"), (None, ":a1"));
    }

    #[test]
    fn test_join_id_ref() {
        assert_eq!(join_id_ref("", "m1"), "m1");
        assert_eq!(join_id_ref("i", "m1"), "i:m1");
    }

    #[test]
    fn test_split_uri_ref() {
        assert_eq!(
            split_uri_ref("http://example.com/p#a1"),
            Some(("http://example.com/p", "a1"))
        );
        assert_eq!(split_uri_ref("a1"), None);
        assert_eq!(split_uri_ref("x#y#z"), Some(("x#y", "z")));
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("a1").is_ok());
        assert!(validate_id("annotation_12").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("i:a").is_err());
        assert!(validate_id("a b").is_err());
        assert!(validate_id("a#b").is_err());
    }

    #[test]
    fn test_check_depth() {
        assert!(check_depth("a").is_ok());
        assert!(check_depth("i:a").is_ok());
        assert!(check_depth("i:j:a").is_err());
        assert!(check_depth("http://x/p#a").is_ok());
    }
}
