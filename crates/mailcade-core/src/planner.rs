//! Batch planner
//!
//! Pure scheduling arithmetic: lays out one send instant per recipient,
//! spacing them inside each clock-hour bucket and spilling into the next
//! hour once the hourly ceiling is reached.

use chrono::{DateTime, Duration, Local, Timelike, Utc};
use mailcade_common::types::BucketClock;

/// Start of the clock hour containing `t`, in the configured bucket
/// clock. Computed by subtracting the sub-hour components of the wall
/// representation, so non-whole-hour local offsets are handled too.
pub fn hour_start(t: DateTime<Utc>, clock: BucketClock) -> DateTime<Utc> {
    let (minute, second, nanos) = match clock {
        BucketClock::Utc => (t.minute(), t.second(), t.nanosecond()),
        BucketClock::Local => {
            let local = t.with_timezone(&Local);
            (local.minute(), local.second(), local.nanosecond())
        }
    };

    t - Duration::minutes(minute as i64)
        - Duration::seconds(second as i64)
        - Duration::nanoseconds(nanos as i64)
}

/// Start of the clock hour after the one containing `t`
pub fn next_hour_start(t: DateTime<Utc>, clock: BucketClock) -> DateTime<Utc> {
    hour_start(t, clock) + Duration::hours(1)
}

/// Plan the send instants for a batch.
///
/// Walks a cursor from `start`, emitting one instant per slot and
/// advancing by `spacing_secs`. Once `hourly_cap` instants land in the
/// same clock-hour bucket the cursor jumps to the start of the next hour.
/// The result is non-decreasing and has exactly `count` entries.
///
/// A zero `hourly_cap` is rejected at the HTTP edge; it is clamped to 1
/// here so the function stays total.
pub fn plan(
    count: usize,
    start: DateTime<Utc>,
    spacing_secs: u32,
    hourly_cap: u32,
    clock: BucketClock,
) -> Vec<DateTime<Utc>> {
    let cap = hourly_cap.max(1);
    let mut instants = Vec::with_capacity(count);

    let mut cursor = start;
    let mut bucket = hour_start(cursor, clock);
    let mut in_bucket = 0u32;

    for _ in 0..count {
        if in_bucket >= cap {
            cursor = bucket + Duration::hours(1);
            bucket = hour_start(cursor, clock);
            in_bucket = 0;
        }

        instants.push(cursor);
        in_bucket += 1;

        cursor = cursor + Duration::seconds(spacing_secs as i64);
        let next_bucket = hour_start(cursor, clock);
        if next_bucket != bucket {
            bucket = next_bucket;
            in_bucket = 0;
        }
    }

    instants
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(iso: &str) -> DateTime<Utc> {
        iso.parse().unwrap()
    }

    #[test]
    fn test_simple_batch() {
        let instants = plan(3, at("2025-01-01T10:00:00Z"), 30, 100, BucketClock::Utc);
        assert_eq!(
            instants,
            vec![
                at("2025-01-01T10:00:00Z"),
                at("2025-01-01T10:00:30Z"),
                at("2025-01-01T10:01:00Z"),
            ]
        );
    }

    #[test]
    fn test_hour_overflow() {
        let instants = plan(4, at("2025-01-01T10:59:00Z"), 30, 2, BucketClock::Utc);
        assert_eq!(
            instants,
            vec![
                at("2025-01-01T10:59:00Z"),
                at("2025-01-01T10:59:30Z"),
                at("2025-01-01T11:00:00Z"),
                at("2025-01-01T11:00:30Z"),
            ]
        );
    }

    #[test]
    fn test_cap_forces_next_hour() {
        let instants = plan(5, at("2025-01-01T10:15:00Z"), 60, 2, BucketClock::Utc);
        assert_eq!(
            instants,
            vec![
                at("2025-01-01T10:15:00Z"),
                at("2025-01-01T10:16:00Z"),
                at("2025-01-01T11:00:00Z"),
                at("2025-01-01T11:01:00Z"),
                at("2025-01-01T12:00:00Z"),
            ]
        );
    }

    #[test]
    fn test_zero_spacing_still_respects_cap() {
        let instants = plan(5, at("2025-01-01T10:15:00Z"), 0, 2, BucketClock::Utc);
        assert_eq!(
            instants,
            vec![
                at("2025-01-01T10:15:00Z"),
                at("2025-01-01T10:15:00Z"),
                at("2025-01-01T11:00:00Z"),
                at("2025-01-01T11:00:00Z"),
                at("2025-01-01T12:00:00Z"),
            ]
        );
    }

    #[test]
    fn test_monotone_and_exact_length() {
        for (count, spacing, cap) in [
            (0usize, 30u32, 5u32),
            (1, 0, 1),
            (17, 45, 3),
            (50, 7, 10),
            (120, 3600, 1),
        ] {
            let instants = plan(count, at("2025-03-08T23:40:11Z"), spacing, cap, BucketClock::Utc);
            assert_eq!(instants.len(), count);
            for pair in instants.windows(2) {
                assert!(pair[0] <= pair[1], "instants must be non-decreasing");
            }
        }
    }

    #[test]
    fn test_cap_holds_in_every_hour_bucket() {
        let cap = 4u32;
        let instants = plan(37, at("2025-06-30T21:12:00Z"), 300, cap, BucketClock::Utc);

        let mut per_bucket = std::collections::HashMap::new();
        for t in &instants {
            *per_bucket
                .entry(hour_start(*t, BucketClock::Utc))
                .or_insert(0u32) += 1;
        }
        for (bucket, n) in per_bucket {
            assert!(n <= cap, "bucket {} holds {} > cap {}", bucket, n, cap);
        }
    }

    #[test]
    fn test_spacing_within_hour() {
        let spacing = 90u32;
        let instants = plan(30, at("2025-01-01T08:00:00Z"), spacing, 1000, BucketClock::Utc);
        for pair in instants.windows(2) {
            let diff = (pair[1] - pair[0]).num_seconds();
            // equal spacing, or the cap pushed the next slot to the
            // following hour start
            assert!(
                diff == spacing as i64 || pair[1] == next_hour_start(pair[0], BucketClock::Utc),
                "unexpected gap of {}s",
                diff
            );
        }
    }

    #[test]
    fn test_zero_cap_is_clamped() {
        let instants = plan(3, at("2025-01-01T10:30:00Z"), 0, 0, BucketClock::Utc);
        assert_eq!(instants.len(), 3);
        assert_eq!(instants[0], at("2025-01-01T10:30:00Z"));
        assert_eq!(instants[1], at("2025-01-01T11:00:00Z"));
        assert_eq!(instants[2], at("2025-01-01T12:00:00Z"));
    }

    #[test]
    fn test_hour_start_utc() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 10, 59, 59).unwrap();
        assert_eq!(
            hour_start(t, BucketClock::Utc),
            Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(
            next_hour_start(t, BucketClock::Utc),
            Utc.with_ymd_and_hms(2025, 1, 1, 11, 0, 0).unwrap()
        );
    }
}
