//! Human-facing number and duration formatting for console reports.

use std::time::Duration;

/// Formats a count with `.` as the thousands separator (pt-BR convention).
///
/// ```
/// assert_eq!(cep_common::format_count(1_234_567), "1.234.567");
/// ```
pub fn format_count(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }

    out
}

/// Formats an elapsed time rounded to the millisecond, e.g. `1h2m3.456s`,
/// `4m0.010s`, `12.300s` or `850ms`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_ms = (elapsed.as_micros() + 500) / 1000;

    if total_ms < 1000 {
        return format!("{}ms", total_ms);
    }

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    out.push_str(&format!("{}.{:03}s", seconds, millis));
    out
}
