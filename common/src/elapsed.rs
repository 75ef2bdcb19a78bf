use chrono::Utc;

/// Returns a string representing the elapsed time since `start_time` like
/// "1m15s" or "1.50s".
pub fn format_elapsed(start_time: chrono::DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(start_time);
    format_time_delta(elapsed)
}

fn format_time_delta(elapsed: chrono::TimeDelta) -> String {
    let millis = elapsed.num_milliseconds();
    format_elapsed_millis(millis)
}

pub fn format_duration(duration: std::time::Duration) -> String {
    let millis = duration.as_millis() as i64;
    format_elapsed_millis(millis)
}

fn format_elapsed_millis(millis: i64) -> String {
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.2}s", millis as f64 / 1000.0)
    } else {
        let minutes = millis / 60_000;
        let seconds = (millis % 60_000) / 1000;
        format!("{minutes}m{seconds:02}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn subsecond_renders_as_milliseconds() {
        assert_eq!(format_time_delta(Duration::milliseconds(250)), "250ms");
        assert_eq!(format_time_delta(Duration::milliseconds(0)), "0ms");
    }

    #[test]
    fn mid_range_renders_two_decimal_seconds() {
        assert_eq!(format_time_delta(Duration::milliseconds(1_500)), "1.50s");
        assert_eq!(format_time_delta(Duration::milliseconds(59_999)), "60.00s");
    }

    #[test]
    fn minute_scale_renders_mmss() {
        assert_eq!(format_time_delta(Duration::milliseconds(75_000)), "1m15s");
        assert_eq!(format_time_delta(Duration::milliseconds(60_000)), "1m00s");
        assert_eq!(format_time_delta(Duration::milliseconds(3_601_000)), "60m01s");
    }

    #[test]
    fn format_duration_matches_format_elapsed_millis() {
        assert_eq!(format_duration(std::time::Duration::from_millis(75_000)), "1m15s");
    }
}
