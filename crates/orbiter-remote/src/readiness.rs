//! Predicates for [`crate::RemoteShell::wait_until`]

use std::collections::BTreeSet;

/// Directory exists and has at least one entry (boot readiness)
pub fn non_empty() -> impl Fn(&BTreeSet<String>) -> bool + Send + Sync {
    |entries: &BTreeSet<String>| !entries.is_empty()
}

/// Listing is exactly the one expected entry.
///
/// Listing a file path yields the path itself, so waiting on
/// `single_file(path)` while polling `path` waits for the file to materialize.
pub fn single_file(expected: impl Into<String>) -> impl Fn(&BTreeSet<String>) -> bool + Send + Sync {
    let expected = expected.into();
    move |entries: &BTreeSet<String>| entries.len() == 1 && entries.contains(&expected)
}
