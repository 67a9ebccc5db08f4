//! Thread-local parse cache.
//!
//! The safe-substitution path reparses candidate replacements many times per
//! rewrite, and the fixed-point driver reparses whole files between passes,
//! so parse results are cached per thread. Cache is capped at 256 entries;
//! everything is evicted when full. Parse failures are never cached.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use xxhash_rust::xxh3::xxh3_64;

use crate::py::{ParseError, ParsedFile};

const MAX_CACHE_ENTRIES: usize = 256;

thread_local! {
    // Keyed by (content hash, filename): the same text parsed under two
    // names yields distinct diagnostics, so the entries must not collide.
    static PARSE_CACHE: RefCell<HashMap<(u64, String), Rc<ParsedFile>>> =
        RefCell::new(HashMap::new());
}

/// Parses `text` as a module, reusing a prior parse of identical content.
pub fn parse_cached(text: &str, path: &str) -> Result<Rc<ParsedFile>, ParseError> {
    let key = (xxh3_64(text.as_bytes()), path.to_string());

    PARSE_CACHE.with(|cache| {
        if let Some(parsed) = cache.borrow().get(&key) {
            return Ok(Rc::clone(parsed));
        }

        let parsed = Rc::new(ParsedFile::parse(text, path)?);

        let mut cache = cache.borrow_mut();
        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.clear();
        }
        cache.insert(key, Rc::clone(&parsed));
        Ok(parsed)
    })
}

/// Clear the parse cache (mainly for testing).
pub fn clear_cache() {
    PARSE_CACHE.with(|cache| {
        cache.borrow_mut().clear();
    });
}

/// Current entry count, for monitoring.
pub fn cache_size() -> usize {
    PARSE_CACHE.with(|cache| cache.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_returns_shared_parse() {
        clear_cache();
        let a = parse_cached("x = 1\n", "a.py").unwrap();
        let b = parse_cached("x = 1\n", "a.py").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache_size(), 1);
    }

    #[test]
    fn test_distinct_filenames_do_not_collide() {
        clear_cache();
        let a = parse_cached("x = 1\n", "a.py").unwrap();
        let b = parse_cached("x = 1\n", "b.py").unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(cache_size(), 2);
    }

    #[test]
    fn test_failures_are_not_cached() {
        clear_cache();
        assert!(parse_cached("x = )\n", "bad.py").is_err());
        assert_eq!(cache_size(), 0);
    }
}
