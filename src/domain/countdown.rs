use crate::domain::models::MILLIS_PER_MINUTE;

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * 60;

/// Whole seconds left until `end_ms`, rounded down and never negative.
pub fn remaining_seconds(end_ms: i64, now_ms: i64) -> u64 {
    let remaining = end_ms.saturating_sub(now_ms).max(0);
    (remaining / 1000) as u64
}

/// Whole minutes left until `end_ms`, rounded up. Zero once expired.
pub fn remaining_minutes_ceil(end_ms: i64, now_ms: i64) -> u64 {
    let remaining = end_ms.saturating_sub(now_ms).max(0) as u64;
    remaining.div_ceil(MILLIS_PER_MINUTE as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Running(u64),
    /// Reported once, on the step that reaches zero.
    Completed,
    Finished,
}

/// One-second-resolution countdown that reports completion exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    total_seconds: u64,
    remaining_seconds: u64,
    completed: bool,
}

impl Countdown {
    pub fn new(total_seconds: u64) -> Self {
        Self {
            total_seconds,
            remaining_seconds: total_seconds,
            completed: false,
        }
    }

    /// Counts down from the full requested duration, regardless of how much of
    /// the block has already elapsed.
    pub fn from_minutes(minutes: u32) -> Self {
        Self::new(u64::from(minutes) * SECONDS_PER_MINUTE)
    }

    /// Counts down the real time left until `end_ms`.
    pub fn until(end_ms: i64, now_ms: i64) -> Self {
        Self::new(remaining_seconds(end_ms, now_ms))
    }

    pub fn total_seconds(&self) -> u64 {
        self.total_seconds
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn advance(&mut self, seconds: u64) -> Tick {
        if self.completed {
            return Tick::Finished;
        }
        self.remaining_seconds = self.remaining_seconds.saturating_sub(seconds);
        if self.remaining_seconds == 0 {
            self.completed = true;
            return Tick::Completed;
        }
        Tick::Running(self.remaining_seconds)
    }

    pub fn progress_percent(&self) -> f64 {
        progress_percent(self.total_seconds, self.remaining_seconds)
    }

    pub fn display(&self) -> String {
        format_countdown(self.remaining_seconds)
    }
}

pub fn progress_percent(total_seconds: u64, remaining_seconds: u64) -> f64 {
    if total_seconds == 0 {
        return 100.0;
    }
    let done = total_seconds.saturating_sub(remaining_seconds);
    done as f64 / total_seconds as f64 * 100.0
}

/// `"1h 0m 5s"`, `"2m 3s"` or `"7s"`.
pub fn format_countdown(seconds: u64) -> String {
    let hours = seconds / SECONDS_PER_HOUR;
    let minutes = (seconds % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE;
    let secs = seconds % SECONDS_PER_MINUTE;

    let mut parts = Vec::with_capacity(3);
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || hours > 0 {
        parts.push(format!("{minutes}m"));
    }
    parts.push(format!("{secs}s"));
    parts.join(" ")
}

/// Requested block length as shown in the site list: `"1h 5m"` or `"5m"`.
pub fn format_duration(minutes: u32) -> String {
    let hours = minutes / 60;
    let rest = minutes % 60;
    if hours > 0 {
        format!("{hours}h {rest}m")
    } else {
        format!("{rest}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn remaining_seconds_is_never_negative(end in -1_000_000_000i64..1_000_000_000, now in -1_000_000_000i64..1_000_000_000) {
            let remaining = remaining_seconds(end, now);
            if now >= end {
                prop_assert_eq!(remaining, 0);
            } else {
                prop_assert!(remaining as i64 * 1000 <= end - now);
            }
        }
    }

    #[test]
    fn remaining_values_round_in_opposite_directions() {
        assert_eq!(remaining_seconds(300_000, 0), 300);
        assert_eq!(remaining_seconds(300_000, 1), 299);
        assert_eq!(remaining_minutes_ceil(300_000, 1), 5);
        assert_eq!(remaining_minutes_ceil(300_000, 240_001), 1);
        assert_eq!(remaining_minutes_ceil(300_000, 400_000), 0);
    }

    #[test]
    fn countdown_completes_exactly_once() {
        let mut countdown = Countdown::new(2);
        assert_eq!(countdown.advance(1), Tick::Running(1));
        assert_eq!(countdown.advance(1), Tick::Completed);
        assert_eq!(countdown.advance(1), Tick::Finished);
        assert!(countdown.is_completed());
    }

    #[test]
    fn zero_length_countdown_completes_on_first_check() {
        let mut countdown = Countdown::until(1_000, 5_000);
        assert_eq!(countdown.remaining_seconds(), 0);
        assert_eq!(countdown.advance(0), Tick::Completed);
        assert_eq!(countdown.advance(0), Tick::Finished);
    }

    #[test]
    fn popup_countdown_starts_from_full_duration() {
        let countdown = Countdown::from_minutes(5);
        assert_eq!(countdown.total_seconds(), 300);
        assert_eq!(countdown.display(), "5m 0s");
        assert!(countdown.progress_percent().abs() < f64::EPSILON);
    }

    #[test]
    fn formats_match_list_and_timer_views() {
        assert_eq!(format_countdown(3_605), "1h 0m 5s");
        assert_eq!(format_countdown(123), "2m 3s");
        assert_eq!(format_countdown(7), "7s");
        assert_eq!(format_duration(65), "1h 5m");
        assert_eq!(format_duration(5), "5m");
        assert!((progress_percent(200, 50) - 75.0).abs() < f64::EPSILON);
    }
}
