//! Computes [`recall_core::SessionMetrics`] on any terminal transition
//! (spec §4.5 "Termination", §6.3).

use chrono::{DateTime, Utc};

use recall_core::{RecallOutcome, SessionId, SessionMetrics};

/// `engagement ∈ [0,100]`: weighted sum of active-time ratio (40%), recall
/// rate (40%), and a saturating message-volume term (20%), per spec §6.3.
fn engagement_score(active_time_ms: u64, duration_ms: u64, recall_rate: f64, message_count: usize, target_count: usize) -> f64 {
    let active_ratio = if duration_ms > 0 { active_time_ms as f64 / duration_ms as f64 } else { 0.0 };
    let volume_term = if target_count > 0 {
        (message_count as f64 / target_count as f64 * 2.0).min(1.0)
    } else {
        0.0
    };
    ((active_ratio * 40.0) + (recall_rate * 40.0) + (volume_term * 20.0)).clamp(0.0, 100.0)
}

/// Approximates active time as the sum of inter-message gaps shorter than
/// `stall_threshold_ms` — a longer gap is treated as the student stepping
/// away and excluded entirely rather than capped (spec §4.5/§6.2).
fn active_time_ms(message_timestamps: &[DateTime<Utc>], stall_threshold_ms: i64) -> u64 {
    message_timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]).num_milliseconds())
        .filter(|gap| *gap < stall_threshold_ms)
        .sum::<i64>()
        .max(0) as u64
}

#[allow(clippy::too_many_arguments)]
pub fn compute_metrics(
    session_id: SessionId,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    message_timestamps: &[DateTime<Utc>],
    outcomes: &[RecallOutcome],
    rabbithole_count: u32,
    recalled_count: usize,
    target_count: usize,
    stall_threshold_ms: u64,
) -> SessionMetrics {
    let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
    let active = active_time_ms(message_timestamps, stall_threshold_ms as i64);
    let recall_rate = if target_count > 0 { recalled_count as f64 / target_count as f64 } else { 0.0 };
    let engagement = engagement_score(active, duration_ms, recall_rate, message_timestamps.len(), target_count);

    let attempted_count = outcomes.len() as u32;
    let successful_count = outcomes.iter().filter(|o| o.success).count() as u32;
    let failed_count = attempted_count - successful_count;

    SessionMetrics {
        session_id,
        duration_ms,
        active_time_ms: active,
        recall_rate,
        engagement_score: engagement,
        attempted_count,
        successful_count,
        failed_count,
        rabbithole_count,
        // No pricing table is in scope for this engine — usage accounting
        // lives with whatever wires up the concrete LLM provider.
        cost_usd: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn active_time_excludes_gaps_past_the_stall_threshold() {
        let t0 = Utc::now();
        let stamps = vec![t0, t0 + Duration::seconds(5), t0 + Duration::minutes(5), t0 + Duration::minutes(5) + Duration::seconds(5)];
        let active = active_time_ms(&stamps, 30_000);
        assert_eq!(active, 10_000);
    }

    #[test]
    fn engagement_score_is_clamped_into_0_100() {
        let score = engagement_score(u64::MAX, 1, 1.0, 1000, 1);
        assert!((0.0..=100.0).contains(&score));
    }

    #[test]
    fn compute_metrics_reports_attempted_and_failed_counts() {
        let t0 = Utc::now();
        let outcomes = vec![
            RecallOutcome {
                id: "out_1".into(),
                session_id: "sess_1".into(),
                recall_point_id: "rp_1".into(),
                success: true,
                confidence: 0.9,
                rating: recall_fsrs::Rating::Easy,
                reasoning: String::new(),
                message_index_start: 1,
                message_index_end: 1,
                time_spent_ms: 500,
            },
            RecallOutcome {
                id: "out_2".into(),
                session_id: "sess_1".into(),
                recall_point_id: "rp_2".into(),
                success: false,
                confidence: 0.1,
                rating: recall_fsrs::Rating::Again,
                reasoning: String::new(),
                message_index_start: 2,
                message_index_end: 2,
                time_spent_ms: 500,
            },
        ];
        let metrics = compute_metrics(
            "sess_1".into(),
            t0,
            t0 + Duration::minutes(10),
            &[t0, t0 + Duration::minutes(1)],
            &outcomes,
            1,
            1,
            2,
            30_000,
        );
        assert_eq!(metrics.attempted_count, 2);
        assert_eq!(metrics.successful_count, 1);
        assert_eq!(metrics.failed_count, 1);
        assert_eq!(metrics.recall_rate, 0.5);
    }
}
