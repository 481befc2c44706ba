pub mod buffer_pool;
pub mod clock;

/// Formats a millisecond duration as a short human-readable string, used
/// in log lines (e.g. "123ms", "4.50s").
pub fn format_duration_ms(ms: f64) -> String {
    if ms < 1000.0 {
        format!("{ms:.0}ms")
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sub_second_and_second_scale() {
        assert_eq!(format_duration_ms(42.0), "42ms");
        assert_eq!(format_duration_ms(4500.0), "4.50s");
    }
}
