/// Characters that are replaced with `_` in output file names.
const UNSAFE_CHARS: [char; 19] = [
    '/', ':', ' ', ',', '@', '&', '=', '?', '#', '%', '*', '"', '\'', '`', '<', '>', '|', '\\',
    '!',
];

/// Name used when sanitizing leaves nothing behind.
pub const PLACEHOLDER_NAME: &str = "unknown_file";

/// Turns an image reference or file name into a safe file stem.
///
/// Only the final `/` segment is kept, unsafe characters become `_`,
/// runs of `_` collapse to one and leading/trailing `_` are trimmed.
///
/// ```
/// use flavorscan::scanner::sanitize_filename;
///
/// assert_eq!(sanitize_filename("example.com/bitnami/redis:7.2"), "redis_7.2");
/// assert_eq!(sanitize_filename("///"), "unknown_file");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit('/').next().unwrap_or(name);

    let mut sanitized = String::with_capacity(last.len());
    for c in last.chars() {
        let c = if UNSAFE_CHARS.contains(&c) { '_' } else { c };
        if c == '_' && sanitized.ends_with('_') {
            continue;
        }
        sanitized.push(c);
    }

    let trimmed = sanitized.trim_matches('_');
    if trimmed.is_empty() {
        PLACEHOLDER_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}
