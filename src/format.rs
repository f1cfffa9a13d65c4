/*!
 * Human-readable formatting for byte counts, rates and durations
 */

const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

/// Format a byte count using base-1024 units, clamped at TB.
///
/// Zero renders as the literal `"0 B"`; every other value carries two
/// decimal places (`"512.00 B"`, `"1.50 KB"`).
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    format_scaled(bytes as f64)
}

/// Format a transfer rate in bytes per second.
pub fn format_rate(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return "0 B/s".to_string();
    }
    format!("{}/s", format_scaled(bytes_per_sec))
}

fn format_scaled(value: f64) -> String {
    let mut size = value;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Format a duration given in whole seconds
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {:02}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {:02}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_zero() {
        assert_eq!(format_bytes(0), "0 B");
    }

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(1), "1.00 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
        assert_eq!(format_bytes(10 * 1_048_576), "10.00 MB");
        assert_eq!(format_bytes(1_073_741_824), "1.00 GB");
        assert_eq!(format_bytes(1_099_511_627_776), "1.00 TB");
    }

    #[test]
    fn test_format_bytes_clamps_at_tb() {
        // 1 PiB still renders in TB
        assert_eq!(format_bytes(1_125_899_906_842_624), "1024.00 TB");
        assert!(format_bytes(u64::MAX).ends_with(" TB"));
    }

    #[test]
    fn test_unit_choice_is_monotonic() {
        let rank = |s: String| {
            let unit = s.rsplit(' ').next().unwrap_or_default().to_string();
            UNITS.iter().position(|u| *u == unit).unwrap()
        };

        let mut previous = 0;
        let mut bytes = 1u64;
        while bytes < u64::MAX / 3 {
            let current = rank(format_bytes(bytes));
            assert!(current >= previous, "unit regressed at {} bytes", bytes);
            previous = current;
            bytes = bytes * 3 + 1;
        }
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(0.0), "0 B/s");
        assert_eq!(format_rate(f64::NAN), "0 B/s");
        assert_eq!(format_rate(2048.0), "2.00 KB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(185), "3m 05s");
        assert_eq!(format_duration(3720), "1h 02m");
    }
}
