//! Event scheduling and open-loop follow-up timing (§4.F steps 6-7).

use rand::Rng;
use vigil_core::time::MonotonicMs;
use vigil_scheduler::{EmotionalWeight, OpenLoopCategory};

const FIVE_MIN_MS: i64 = 5 * 60 * 1_000;
const ONE_DAY_MS: i64 = 24 * 60 * 60 * 1_000;
const ONE_HOUR_MS: i64 = 60 * 60 * 1_000;
const THIRTY_SIX_HOURS_MS: i64 = 36 * ONE_HOUR_MS;
const THREE_SIXTY_SIX_DAYS_MS: i64 = 366 * ONE_DAY_MS;
const NINETY_DAYS_MS: i64 = 90 * ONE_DAY_MS;
const TWELVE_HOURS_MS: i64 = 12 * ONE_HOUR_MS;

/// §4.F step 6: an event is only scheduled when its trigger falls in
/// `[now - 5min, now + 366d]`.
pub fn is_in_event_window(trigger_at_ms: MonotonicMs, now: MonotonicMs) -> bool {
    let earliest = now.minus_ms(FIVE_MIN_MS).as_i64();
    let latest = now.plus_ms(THREE_SIXTY_SIX_DAYS_MS).as_i64();
    (earliest..=latest).contains(&trigger_at_ms.as_i64())
}

fn jitter_ms(spread_ms: i64) -> i64 {
    if spread_ms <= 0 {
        return 0;
    }
    rand::thread_rng().gen_range(-spread_ms..=spread_ms)
}

fn jitter_between(min_ms: i64, max_ms: i64) -> i64 {
    if max_ms <= min_ms {
        return min_ms;
    }
    rand::thread_rng().gen_range(min_ms..=max_ms)
}

/// §4.F step 6: an anticipated event with `followUp == true` gets a
/// companion `follow_up` event at `triggerAtMs + 36h +/- jitter(2..18h)`.
pub fn anticipated_follow_up_trigger(trigger_at_ms: MonotonicMs) -> MonotonicMs {
    let jitter = jitter_between(2 * ONE_HOUR_MS, 18 * ONE_HOUR_MS) * if rand::thread_rng().gen_bool(0.5) { 1 } else { -1 };
    trigger_at_ms.plus_ms(THIRTY_SIX_HOURS_MS + jitter)
}

/// §4.F step 7's per-category follow-up timing table. Returns `None` when
/// there isn't enough information to compute a time (an `upcoming_event`
/// loop with no anchor date).
pub fn follow_up_trigger_for_category(
    category: OpenLoopCategory,
    weight: EmotionalWeight,
    anchor_date_ms: Option<MonotonicMs>,
    now: MonotonicMs,
) -> Option<MonotonicMs> {
    let trigger = match category {
        OpenLoopCategory::WaitingForOutcome => {
            let days = match weight {
                EmotionalWeight::Low => 3,
                EmotionalWeight::Medium => 4,
                EmotionalWeight::High => 6,
            };
            now.plus_ms(days * ONE_DAY_MS)
        }
        OpenLoopCategory::ActiveDecision => now.plus_ms(7 * ONE_DAY_MS + jitter_ms(2 * ONE_DAY_MS)),
        OpenLoopCategory::SocialCommitment => now.plus_ms(10 * ONE_DAY_MS + jitter_ms(4 * ONE_DAY_MS)),
        OpenLoopCategory::UpcomingEvent => {
            let anchor = anchor_date_ms?;
            anchor.plus_ms(ONE_DAY_MS + jitter_ms(ONE_HOUR_MS))
        }
        OpenLoopCategory::OngoingEffort => now.plus_ms(21 * ONE_DAY_MS + jitter_ms(7 * ONE_DAY_MS)),
    };
    Some(trigger)
}

/// §4.F step 7: a computed follow-up must land in `[now + 12h, now + 90d]`.
pub fn is_in_follow_up_window(trigger_at_ms: MonotonicMs, now: MonotonicMs) -> bool {
    let earliest = now.plus_ms(TWELVE_HOURS_MS).as_i64();
    let latest = now.plus_ms(NINETY_DAYS_MS).as_i64();
    (earliest..=latest).contains(&trigger_at_ms.as_i64())
}

/// §4.F step 7: skip scheduling a follow-up for a low-weight social
/// commitment mentioned fewer than twice.
pub fn should_skip_follow_up(category: OpenLoopCategory, weight: EmotionalWeight, mention_count: u32) -> bool {
    category == OpenLoopCategory::SocialCommitment && weight == EmotionalWeight::Low && mention_count < 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_window_excludes_far_future() {
        let now = MonotonicMs::from(1_000_000);
        assert!(is_in_event_window(now.plus_ms(1_000), now));
        assert!(!is_in_event_window(now.plus_ms(THREE_SIXTY_SIX_DAYS_MS + 1), now));
        assert!(!is_in_event_window(now.minus_ms(FIVE_MIN_MS + 1), now));
    }

    #[test]
    fn anticipated_follow_up_lands_within_jitter_bounds() {
        let now = MonotonicMs::from(0);
        for _ in 0..50 {
            let follow_up = anticipated_follow_up_trigger(now);
            let delta = follow_up.as_i64();
            assert!(delta >= THIRTY_SIX_HOURS_MS - 18 * ONE_HOUR_MS);
            assert!(delta <= THIRTY_SIX_HOURS_MS + 18 * ONE_HOUR_MS);
        }
    }

    #[test]
    fn waiting_for_outcome_scales_with_weight() {
        let now = MonotonicMs::from(0);
        let low = follow_up_trigger_for_category(OpenLoopCategory::WaitingForOutcome, EmotionalWeight::Low, None, now).unwrap();
        let high = follow_up_trigger_for_category(OpenLoopCategory::WaitingForOutcome, EmotionalWeight::High, None, now).unwrap();
        assert!(high.as_i64() > low.as_i64());
    }

    #[test]
    fn upcoming_event_without_anchor_returns_none() {
        let now = MonotonicMs::from(0);
        assert!(follow_up_trigger_for_category(OpenLoopCategory::UpcomingEvent, EmotionalWeight::Medium, None, now).is_none());
    }

    #[test]
    fn low_weight_social_commitment_under_two_mentions_is_skipped() {
        assert!(should_skip_follow_up(OpenLoopCategory::SocialCommitment, EmotionalWeight::Low, 1));
        assert!(!should_skip_follow_up(OpenLoopCategory::SocialCommitment, EmotionalWeight::Low, 2));
        assert!(!should_skip_follow_up(OpenLoopCategory::SocialCommitment, EmotionalWeight::Medium, 1));
    }
}
