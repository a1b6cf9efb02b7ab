//! Fuzz target for author and workspace address handling.
//!
//! This tests that address helpers never panic on arbitrary input,
//! including multi-byte characters around the `@` and `.` separators.

#![no_main]

use libfuzzer_sys::fuzz_target;
use reactive_peer::identity::{author_short_name, display_name_path};
use reactive_peer::memory::MemoryStorage;

fuzz_target!(|address: &str| {
    // Should never panic
    let short = author_short_name(address);
    assert!(address.contains(short));
    assert!(!short.contains('.'));

    let path = display_name_path(address);
    assert!(path.starts_with("/about/"));
    assert!(path.ends_with("/name"));

    // Arbitrary workspace addresses are rejected, never a panic
    let _ = MemoryStorage::for_address(address);
});
