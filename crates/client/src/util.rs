use std::io::Write;

const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Format a byte count with 1024-based units and three decimals.
pub fn human_readable_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.3} {}", UNITS[unit])
}

/// Rewrite the in-place progress line.
pub fn print_progress(chunks: u64, total_chunks: u64, bytes: u64) {
    let percent = if total_chunks == 0 {
        100.0
    } else {
        chunks as f64 * 100.0 / total_chunks as f64
    };
    print!(
        "\rProgress: {percent:.3}% ({})        ",
        human_readable_size(bytes)
    );
    let _ = std::io::stdout().flush();
}
