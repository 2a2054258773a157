//! Human-readable byte counts for log lines.

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format a byte count (or a byte rate) using binary units with two decimals.
///
/// `None` means the size is not known, e.g. a streamed request without a
/// declared `Content-Length`.
pub fn format_size(size_bytes: Option<f64>) -> String {
    let Some(mut size) = size_bytes else {
        return "unknown size".to_string();
    };

    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", size, UNITS[unit])
}

/// Shorthand for the common case of an exact byte count.
pub fn format_bytes(size_bytes: u64) -> String {
    format_size(Some(size_bytes as f64))
}
