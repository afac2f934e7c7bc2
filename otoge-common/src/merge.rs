//! Merge engine
//!
//! Reconciles two observations of the same chart into one authoritative
//! record. Pure and synchronous: the caller supplies the clock reading used
//! to stamp `updated_at`, so identical inputs always give identical output.
//!
//! Field rules (each field resolved independently):
//! - `achievements`, `dx_score`, `play_count`: maximum of both sides
//! - `dx_rating`: incoming value wins whenever present (never cleared)
//! - `fc`: rarer tier wins (lower code, absent ranks below FC)
//! - `fs`: better tier wins (higher code, absent ranks below SYNC)
//! - `rate`: better grade wins (lower code)

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::score::{FcType, FsType, RateType, ScoreKey, ScoreRecord};

/// Rank given to an absent full-combo tier
const FC_ABSENT: u8 = 100;
/// Rank given to an absent full-sync tier
const FS_ABSENT: i16 = -1;

/// Merge contract violations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    /// The two observations describe different charts
    #[error("cannot merge scores with different keys (existing {existing}, incoming {incoming})")]
    KeyMismatch { existing: ScoreKey, incoming: ScoreKey },

    /// The incoming observation is malformed
    #[error("invalid score {key}: {reason}")]
    InvalidRecord { key: ScoreKey, reason: String },
}

/// Result of one merge
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub record: ScoreRecord,
    /// True iff any scored field differs from the existing record
    pub changed: bool,
}

/// Merge `incoming` into `existing`.
///
/// With no existing record the incoming one is adopted as-is and stamped
/// with `now` for both timestamps. Otherwise keys must match exactly; the
/// existing `created_at` is kept and `updated_at` moves to `now` only when a
/// field actually changed.
pub fn merge(
    existing: Option<&ScoreRecord>,
    incoming: &ScoreRecord,
    now: DateTime<Utc>,
) -> Result<MergeOutcome, ScoreError> {
    incoming.validate()?;

    let Some(existing) = existing else {
        let mut record = incoming.clone();
        record.created_at = Some(now);
        record.updated_at = Some(now);
        return Ok(MergeOutcome {
            record,
            changed: true,
        });
    };

    if existing.key() != incoming.key() {
        return Err(ScoreError::KeyMismatch {
            existing: existing.key(),
            incoming: incoming.key(),
        });
    }

    let mut record = existing.clone();
    record.achievements = existing.achievements.max(incoming.achievements);
    record.dx_score = existing.dx_score.max(incoming.dx_score);
    record.play_count = existing.play_count.max(incoming.play_count);
    if incoming.dx_rating.is_some() {
        record.dx_rating = incoming.dx_rating;
    }
    record.fc = rarer_fc(existing.fc, incoming.fc);
    record.fs = better_fs(existing.fs, incoming.fs);
    record.rate = better_rate(existing.rate, incoming.rate);

    let changed = !record.same_values(existing);
    if changed {
        record.updated_at = Some(now);
    }

    Ok(MergeOutcome { record, changed })
}

fn rarer_fc(a: Option<FcType>, b: Option<FcType>) -> Option<FcType> {
    let rank = |fc: Option<FcType>| fc.map_or(FC_ABSENT, FcType::code);
    let selected = rank(a).min(rank(b));
    if selected == FC_ABSENT {
        None
    } else {
        FcType::from_code(selected)
    }
}

fn better_fs(a: Option<FsType>, b: Option<FsType>) -> Option<FsType> {
    let rank = |fs: Option<FsType>| fs.map_or(FS_ABSENT, |fs| fs.code() as i16);
    let selected = rank(a).max(rank(b));
    if selected == FS_ABSENT {
        None
    } else {
        FsType::from_code(selected as u8)
    }
}

fn better_rate(a: RateType, b: RateType) -> RateType {
    if b.is_better_than(a) {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{Achievement, ChartType, LevelIndex};
    use chrono::TimeZone;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, minute, 0).unwrap()
    }

    fn score(achievement: f64, dx_score: u32, fc: Option<FcType>, play_count: u32) -> ScoreRecord {
        let achievements = Achievement::from_percent(achievement).unwrap();
        ScoreRecord {
            achievements,
            dx_score,
            play_count,
            fc,
            rate: RateType::from_achievement(achievements),
            ..ScoreRecord::new(834, ChartType::Dx, LevelIndex::Master, RateType::D)
        }
    }

    fn stored(record: ScoreRecord) -> ScoreRecord {
        merge(None, &record, t(0)).unwrap().record
    }

    #[test]
    fn test_absent_existing_adopts_incoming() {
        let incoming = score(98.0, 900, None, 1);
        let outcome = merge(None, &incoming, t(5)).unwrap();

        assert!(outcome.changed);
        assert!(outcome.record.same_values(&incoming));
        assert_eq!(outcome.record.created_at, Some(t(5)));
        assert_eq!(outcome.record.updated_at, Some(t(5)));
    }

    #[test]
    fn test_worked_example() {
        let existing = stored(score(99.0, 1200, Some(FcType::Fcp), 5));
        let incoming = score(99.5, 1000, Some(FcType::Fc), 3);

        let outcome = merge(Some(&existing), &incoming, t(10)).unwrap();
        let r = &outcome.record;

        assert!(outcome.changed, "accuracy improved");
        assert_eq!(r.achievements, Achievement::from_percent(99.5).unwrap());
        assert_eq!(r.dx_score, 1200);
        assert_eq!(r.fc, Some(FcType::Fcp), "rarer tier kept");
        assert_eq!(r.play_count, 5);
        assert_eq!(r.rate, RateType::Ssp);
        assert_eq!(r.created_at, Some(t(0)));
        assert_eq!(r.updated_at, Some(t(10)));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut record = score(100.2, 2000, Some(FcType::Ap), 9);
        record.fs = Some(FsType::Fsd);
        record.dx_rating = Some(312.0);
        let existing = stored(record);

        let outcome = merge(Some(&existing), &existing, t(30)).unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.record, existing);
    }

    #[test]
    fn test_unchanged_merge_keeps_updated_at() {
        let existing = stored(score(99.0, 1200, Some(FcType::Fcp), 5));
        let worse = score(97.0, 1000, Some(FcType::Fc), 2);

        let outcome = merge(Some(&existing), &worse, t(45)).unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.record.updated_at, Some(t(0)));
    }

    #[test]
    fn test_merge_is_commutative_for_ordered_fields() {
        let mut observations = vec![
            score(99.0, 1200, Some(FcType::Fcp), 5),
            score(99.5, 1000, Some(FcType::Fc), 3),
            score(100.6, 1300, None, 12),
            score(80.0, 0, Some(FcType::App), 1),
        ];
        observations[0].fs = Some(FsType::Fs);
        observations[2].fs = Some(FsType::Fsdp);
        observations[3].fs = Some(FsType::Sync);

        for a in &observations {
            for b in &observations {
                let ab = merge(Some(&stored(a.clone())), b, t(1)).unwrap().record;
                let ba = merge(Some(&stored(b.clone())), a, t(1)).unwrap().record;

                assert_eq!(ab.achievements, ba.achievements);
                assert_eq!(ab.dx_score, ba.dx_score);
                assert_eq!(ab.play_count, ba.play_count);
                assert_eq!(ab.fc, ba.fc);
                assert_eq!(ab.fs, ba.fs);
                assert_eq!(ab.rate, ba.rate);
            }
        }
    }

    #[test]
    fn test_monotonic_over_merge_sequence() {
        let sequence = [
            score(95.0, 800, Some(FcType::Fc), 1),
            score(99.9, 700, None, 4),
            score(90.0, 1100, Some(FcType::Ap), 2),
            score(10.0, 0, None, 0),
        ];

        let mut current = stored(sequence[0].clone());
        for (i, next) in sequence.iter().enumerate().skip(1) {
            let merged = merge(Some(&current), next, t(i as u32)).unwrap().record;
            assert!(merged.achievements >= current.achievements);
            assert!(merged.dx_score >= current.dx_score);
            assert!(merged.play_count >= current.play_count);
            assert!(!current.rate.is_better_than(merged.rate));
            if let (Some(before), Some(after)) = (current.fc, merged.fc) {
                assert!(after.code() <= before.code());
            }
            if current.fc.is_some() {
                assert!(merged.fc.is_some(), "fc never regresses to absent");
            }
            current = merged;
        }

        assert_eq!(current.fc, Some(FcType::Ap));
        assert_eq!(current.dx_score, 1100);
    }

    #[test]
    fn test_rating_is_last_writer_when_present() {
        let mut high = score(99.0, 1000, None, 1);
        high.dx_rating = Some(300.0);
        let existing = stored(high);

        let mut lower = score(99.0, 1000, None, 1);
        lower.dx_rating = Some(280.0);
        let outcome = merge(Some(&existing), &lower, t(2)).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.record.dx_rating, Some(280.0));

        let absent = score(99.0, 1000, None, 1);
        let outcome = merge(Some(&outcome.record), &absent, t(3)).unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.record.dx_rating, Some(280.0), "absent rating never clears");
    }

    #[test]
    fn test_fs_absent_is_worst() {
        let mut existing = score(99.0, 1000, None, 1);
        existing.fs = Some(FsType::Sync);
        let existing = stored(existing);

        let outcome = merge(Some(&existing), &score(99.0, 1000, None, 1), t(1)).unwrap();
        assert_eq!(outcome.record.fs, Some(FsType::Sync));
        assert!(!outcome.changed);

        let mut better = score(99.0, 1000, None, 1);
        better.fs = Some(FsType::Fsp);
        let outcome = merge(Some(&existing), &better, t(1)).unwrap();
        assert_eq!(outcome.record.fs, Some(FsType::Fsp));
    }

    #[test]
    fn test_fc_absent_on_both_sides_stays_absent() {
        let existing = stored(score(50.0, 10, None, 1));
        let outcome = merge(Some(&existing), &score(60.0, 10, None, 1), t(1)).unwrap();
        assert_eq!(outcome.record.fc, None);
    }

    #[test]
    fn test_key_mismatch_is_rejected() {
        let existing = stored(score(99.0, 1000, None, 1));
        let mut other = score(99.0, 1000, None, 1);
        other.level_index = LevelIndex::ReMaster;

        let err = merge(Some(&existing), &other, t(1)).unwrap_err();
        assert!(matches!(err, ScoreError::KeyMismatch { .. }));

        other.level_index = LevelIndex::Master;
        other.chart_type = ChartType::Standard;
        assert!(merge(Some(&existing), &other, t(1)).is_err());
    }

    #[test]
    fn test_invalid_incoming_is_rejected() {
        let mut bad = score(99.0, 1000, None, 1);
        bad.achievements = Achievement::from_ten_thousandths(2_000_000);
        assert!(matches!(
            merge(None, &bad, t(1)),
            Err(ScoreError::InvalidRecord { .. })
        ));
    }
}
