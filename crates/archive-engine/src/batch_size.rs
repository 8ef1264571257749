//! `BatchSizeController`: adaptive batch sizing bounded by `[min, max]`.

use archive_core::BatchSizeConfig;
use std::time::Duration;

/// Given the batch size just used, the row count it actually returned, and how long the
/// write+delete work for that batch took, returns the next batch size.
///
/// Halves the batch size when a batch ran well over budget, doubles it when a batch
/// both finished comfortably early and was saturated (returned at least as many rows as
/// requested, meaning a bigger batch might still have room), and otherwise holds steady.
pub fn adjust(current: i64, row_count: i64, elapsed: Duration, config: &BatchSizeConfig) -> i64 {
    if row_count <= 0 {
        return current;
    }

    let elapsed_secs = elapsed.as_secs_f64();
    if elapsed_secs > 1.5 * config.target_seconds {
        return (current / 2).max(config.min);
    }

    if elapsed_secs < config.target_seconds / 2.0 && row_count >= current {
        return (current * 2).min(config.max);
    }

    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BatchSizeConfig {
        BatchSizeConfig {
            min: 100,
            max: 2000,
            target_seconds: 20.0,
        }
    }

    #[test]
    fn halves_when_batch_ran_well_over_budget() {
        let next = adjust(800, 800, Duration::from_secs(45), &config());
        assert_eq!(next, 400);
    }

    #[test]
    fn doubles_when_batch_finished_early_and_saturated() {
        let next = adjust(400, 400, Duration::from_secs(5), &config());
        assert_eq!(next, 800);
    }

    #[test]
    fn never_exceeds_configured_max() {
        let next = adjust(1800, 1800, Duration::from_secs(1), &config());
        assert_eq!(next, 2000);
        let next2 = adjust(2000, 2000, Duration::from_secs(1), &config());
        assert_eq!(next2, 2000);
    }

    #[test]
    fn never_drops_below_configured_min() {
        let next = adjust(150, 150, Duration::from_secs(60), &config());
        assert_eq!(next, 100);
    }

    #[test]
    fn holds_steady_when_within_target_band() {
        let next = adjust(500, 500, Duration::from_secs(18), &config());
        assert_eq!(next, 500);
    }

    #[test]
    fn holds_steady_when_batch_was_not_saturated_even_if_fast() {
        let next = adjust(500, 10, Duration::from_secs(2), &config());
        assert_eq!(next, 500);
    }

    #[test]
    fn ignores_empty_batches() {
        let next = adjust(500, 0, Duration::from_secs(60), &config());
        assert_eq!(next, 500);
    }
}
