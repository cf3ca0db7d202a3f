//! Name derivation for cached code artifacts and transferred files.

/// Derives the short artifact name from a fully qualified application
/// identifier: the last path component, then the last dot-separated segment.
///
/// `com.example.App` becomes `App`; `/apps/com.example.App` becomes `App`.
/// Two identifiers sharing a final segment map to the same cache entry.
pub fn short_artifact_name(app_id: &str) -> String {
    let file = bare_file_name(app_id);
    file.rsplit('.')
        .find(|segment| !segment.is_empty())
        .unwrap_or(file.as_str())
        .to_string()
}

/// Strips any directory components from a client-supplied path hint.
pub fn bare_file_name(path_hint: &str) -> String {
    path_hint
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_string()
}

/// True if `name` can be used as a single file name inside a cache directory.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
