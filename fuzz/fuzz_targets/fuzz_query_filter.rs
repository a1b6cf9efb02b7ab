//! Fuzz target for query path filtering.
//!
//! This tests that `QueryOpts::covers_path` and `QueryOpts::admits` never
//! panic on arbitrary bounds and paths, and that the tombstone filter only
//! ever narrows the path bounds.

#![no_main]

use libfuzzer_sys::fuzz_target;
use reactive_peer::storage::{Document, QueryOpts};

fuzz_target!(|data: (&str, &str, &str, &str, &str, u8)| {
    let (prefix, low, high, path, content, flags) = data;

    let query = QueryOpts {
        path_prefix: (flags & 1 != 0).then(|| prefix.to_string()),
        low_path: (flags & 2 != 0).then(|| low.to_string()),
        high_path: (flags & 4 != 0).then(|| high.to_string()),
        content_is_empty: match (flags >> 3) & 3 {
            0 => None,
            1 => Some(true),
            _ => Some(false),
        },
        include_history: flags & 32 != 0,
    };
    let document = Document {
        format: "es.4".to_string(),
        workspace: "+fuzz.f000".to_string(),
        path: path.to_string(),
        author: "@fuzz.f000".to_string(),
        content: content.to_string(),
        content_hash: String::new(),
        timestamp: 0,
        delete_after: None,
        signature: String::new(),
    };

    // Should never panic
    let covered = query.covers_path(path);
    let admitted = query.admits(&document);

    // The tombstone filter only narrows
    assert!(!admitted || covered);

    // Empty bounds behave as absent bounds
    let absent = QueryOpts {
        path_prefix: query.path_prefix.clone().filter(|s| !s.is_empty()),
        low_path: query.low_path.clone().filter(|s| !s.is_empty()),
        high_path: query.high_path.clone().filter(|s| !s.is_empty()),
        ..query.clone()
    };
    assert_eq!(covered, absent.covers_path(path));
});
