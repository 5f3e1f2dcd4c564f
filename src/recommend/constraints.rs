//! Hard constraints stated explicitly in the query text.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const UNIT: &str = r"(minutes?|mins?|hours?|hrs?|h)\b";

/// "30 minutes max", "45 mins or less"
static TRAILING_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(\d+(?:\.\d+)?)\s*{UNIT}\s*(?:max(?:imum)?|or less|at most|at the most|tops|limit)\b"
    ))
    .expect("Failed to compile trailing duration regex")
});

/// "max 30 mins", "under 1 hour", "no more than 20 minutes", "max duration of 40 min"
static LEADING_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:max(?:imum)?|under|within|less than|at most|no more than|no longer than|up to|not exceeding|shorter than|below|limit(?:ed)? to)\s*(?:(?:duration|time|length)\s*)?(?:(?:of|is)\s*|:\s*)?(\d+(?:\.\d+)?)\s*{UNIT}"
    ))
    .expect("Failed to compile leading duration regex")
});

/// "within an hour", "under one hour"
static SPELLED_HOUR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:under|within|less than|at most|no more than|no longer than|up to)\s*(?:an|one)\s*hour\b",
    )
    .expect("Failed to compile spelled hour regex")
});

/// "1 hour 30 minutes", "2 hrs and 15 mins"
static HOURS_AND_MINUTES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)\s*(?:hours?|hrs?|h)\s*(?:and\s*)?(\d+)\s*(?:minutes?|mins?)\b")
        .expect("Failed to compile compound duration regex")
});

/// Extract an explicit maximum assessment duration, in minutes.
///
/// When several bounds are stated the tightest one wins.
pub fn max_duration(query: &str) -> Option<u32> {
    let query = HOURS_AND_MINUTES.replace_all(query, |caps: &Captures| {
        let hours: u32 = caps[1].parse().unwrap_or(0);
        let minutes: u32 = caps[2].parse().unwrap_or(0);
        format!("{} minutes", hours.saturating_mul(60).saturating_add(minutes))
    });
    let query: &str = &query;

    let numeric = TRAILING_LIMIT
        .captures_iter(query)
        .chain(LEADING_LIMIT.captures_iter(query))
        .filter_map(|caps| to_minutes(&caps));

    let spelled = SPELLED_HOUR.is_match(query).then_some(60);

    numeric.chain(spelled).min()
}

fn to_minutes(caps: &Captures) -> Option<u32> {
    let value: f32 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_lowercase();
    let minutes = if unit.starts_with('h') {
        value * 60.0
    } else {
        value
    };
    Some(minutes.floor() as u32)
}
