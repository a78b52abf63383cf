use chrono::Duration;

/// Parses a simulation clock string of the form `hh:mm:ss`.
///
/// Schedules routinely run past midnight, so the hour field is an offset
/// and may exceed 23 (`25:10:00` is ten past one on the next day).
pub fn parse_hms(s: &str) -> Option<Duration> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: i64 = parts[0].parse().ok()?;
    let minutes: i64 = parts[1].parse().ok()?;
    let seconds: i64 = parts[2].parse().ok()?;

    Some(Duration::hours(hours) + Duration::minutes(minutes) + Duration::seconds(seconds))
}

pub fn format_hms(duration: Duration) -> String {
    let total_seconds = duration.num_seconds();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_times() {
        assert_eq!(parse_hms("00:00:00"), Some(Duration::zero()));
        assert_eq!(parse_hms("08:30:15"), Some(Duration::seconds(30_615)));
    }

    #[test]
    fn parses_hours_past_midnight() {
        assert_eq!(parse_hms("25:10:00"), Some(Duration::seconds(90_600)));
    }

    #[test]
    fn rejects_malformed_strings() {
        assert_eq!(parse_hms("08:30"), None);
        assert_eq!(parse_hms("eight:30:00"), None);
        assert_eq!(parse_hms(""), None);
    }

    #[test]
    fn formats_round_trip() {
        let d = parse_hms("26:05:09").unwrap();
        assert_eq!(format_hms(d), "26:05:09");
    }
}
