//! Send-timing scoring.
//!
//! The clock is an explicit input so scoring the same context twice yields
//! the same score.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, FixedOffset, Offset, Timelike, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

/// Timing context for one prospective send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingContext {
    /// Proposed send instant in the recipient's plausible local time.
    pub send_at_local: DateTime<FixedOffset>,

    /// When the contact was last touched by any campaign.
    pub last_touch: Option<DateTime<Utc>>,
}

impl TimingContext {
    /// Build from a UTC instant and the recipient's offset in minutes.
    #[must_use]
    pub fn new(send_at: DateTime<Utc>, offset_minutes: i32, last_touch: Option<DateTime<Utc>>) -> Self {
        let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        Self {
            send_at_local: send_at.with_timezone(&offset),
            last_touch,
        }
    }
}

/// Timing scoring result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingScore {
    /// Composite timing score in `[0, 100]`.
    pub score: f64,

    /// Human-readable findings.
    pub reasons: Vec<String>,
}

const fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}

/// Score a timing context.
#[must_use]
pub fn score_timing(context: &TimingContext) -> TimingScore {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    let weekday = context.send_at_local.weekday();
    let hour = context.send_at_local.hour();

    // Business hours in the recipient's local time.
    score += if is_weekend(weekday) {
        reasons.push("weekend send".to_string());
        10.0
    } else if (9..17).contains(&hour) {
        40.0
    } else if (7..19).contains(&hour) {
        30.0
    } else {
        reasons.push("outside business hours".to_string());
        20.0
    };

    // Recent-touch avoidance.
    let days_since_touch = context.last_touch.map(|at| {
        let now_utc = context.send_at_local.with_timezone(&Utc);
        now_utc.signed_duration_since(at)
    });
    score += match days_since_touch {
        None => 30.0,
        Some(elapsed) if elapsed >= ChronoDuration::days(14) => 30.0,
        Some(elapsed) if elapsed >= ChronoDuration::days(5) => 25.0,
        Some(elapsed) if elapsed >= ChronoDuration::days(2) => 15.0,
        Some(_) => {
            reasons.push("touched within the last two days".to_string());
            5.0
        }
    };

    // Optimal-day preference.
    score += match weekday {
        Weekday::Tue | Weekday::Wed | Weekday::Thu => 30.0,
        Weekday::Mon | Weekday::Fri => 20.0,
        Weekday::Sat | Weekday::Sun => 10.0,
    };

    TimingScore { score, reasons }
}
