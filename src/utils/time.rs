use chrono::Duration;

/// Short human form used in listings: `1h2m3s`, `4m5s`, `6s`.
pub fn format_duration(v: Duration) -> String {
    if v.num_hours() > 0 {
        format!(
            "{}h{}m{}s",
            v.num_hours(),
            v.num_minutes() % 60,
            v.num_seconds() % 60
        )
    } else if v.num_minutes() > 0 {
        format!("{}m{}s", v.num_minutes() % 60, v.num_seconds() % 60)
    } else {
        format!("{}s", v.num_seconds().max(0) % 60)
    }
}

/// Running clock form, `HH:MM:SS`. Hours are not wrapped.
pub fn format_clock(v: Duration) -> String {
    let total = v.num_seconds().max(0);
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Parses manually entered durations such as `1h30m`, `90m`, `1.5h`, `45s` or `1小时30分钟`.
/// A bare number is read as minutes. Returns `None` for anything unparsable or not positive.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(minutes) = value.parse::<f64>() {
        return to_positive_duration(minutes * 60_000.);
    }

    let mut total_ms = 0f64;
    let mut chars = value.chars().peekable();
    let mut matched = false;
    while chars.peek().is_some() {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let mut number = String::new();
        while let Some(c) = chars.peek().copied().filter(|c| c.is_ascii_digit() || *c == '.') {
            number.push(c);
            chars.next();
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let mut unit = String::new();
        while let Some(c) = chars
            .peek()
            .copied()
            .filter(|c| !c.is_ascii_digit() && *c != '.' && !c.is_whitespace())
        {
            unit.push(c);
            chars.next();
        }
        if number.is_empty() && unit.is_empty() {
            break;
        }
        let amount = number.parse::<f64>().ok()?;
        total_ms += amount * unit_millis(&unit.to_lowercase())?;
        matched = true;
    }

    if !matched {
        return None;
    }
    to_positive_duration(total_ms)
}

fn unit_millis(unit: &str) -> Option<f64> {
    match unit {
        "h" | "hr" | "hrs" | "hour" | "hours" | "小时" => Some(3_600_000.),
        "m" | "min" | "mins" | "minute" | "minutes" | "分钟" => Some(60_000.),
        "s" | "sec" | "secs" | "second" | "seconds" | "秒" => Some(1_000.),
        _ => None,
    }
}

fn to_positive_duration(ms: f64) -> Option<Duration> {
    if ms.is_finite() && ms > 0. {
        Some(Duration::milliseconds(ms.round() as i64))
    } else {
        None
    }
}
