use crate::SECONDS_PER_DAY;

/// UTC calendar day index (days since the Unix epoch) for a timestamp in seconds.
pub fn utc_day(ts: u64) -> u64 {
    ts / SECONDS_PER_DAY
}

/// Returns true if both timestamps fall on the same UTC calendar day.
pub fn same_utc_day(a: u64, b: u64) -> bool {
    utc_day(a) == utc_day(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_boundary_is_midnight_utc() {
        let midnight = 19_000 * SECONDS_PER_DAY;
        assert!(same_utc_day(midnight, midnight + SECONDS_PER_DAY - 1));
        assert!(!same_utc_day(midnight - 1, midnight));
        assert_eq!(utc_day(midnight), 19_000);
    }
}
