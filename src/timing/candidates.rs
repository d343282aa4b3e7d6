//! Generates the bounded, strictly decreasing list of timestamps a cascade is
//! willing to accept in place of the requested instant.

use chrono::{DateTime, Duration, Utc};

/// Offset between the "current" and "previous day" legs of a 24-hour
/// difference product.
pub const TWENTY_FOUR_HOURS: Duration = Duration::hours(24);

/// An ordered sequence of candidate timestamps: element `i` is
/// `requested - i * cadence`.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use firewx::CandidateTimeSequence;
///
/// let at = Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap();
/// let seq = CandidateTimeSequence::generate(at, 1, 4);
/// assert_eq!(seq.len(), 5);
/// assert_eq!(seq.first(), Some(at));
/// assert_eq!(seq.get(2), Some(Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTimeSequence {
    candidates: Vec<DateTime<Utc>>,
}

impl CandidateTimeSequence {
    /// Builds `max_lookback + 1` candidates stepping back by `cadence_hours`.
    ///
    /// A zero cadence cannot produce distinct candidates, so only the requested
    /// instant is returned in that case.
    pub fn generate(requested: DateTime<Utc>, cadence_hours: u32, max_lookback: usize) -> Self {
        if cadence_hours == 0 {
            return Self {
                candidates: vec![requested],
            };
        }
        let step = Duration::hours(i64::from(cadence_hours));
        let candidates = (0..=max_lookback)
            .map_while(|k| {
                let k = i32::try_from(k).ok()?;
                requested.checked_sub_signed(step * k)
            })
            .collect();
        Self { candidates }
    }

    /// Drops candidates more than `max_staleness` older than the requested
    /// instant. The first candidate is always kept.
    pub fn limit_staleness(mut self, max_staleness: Option<Duration>) -> Self {
        if let (Some(limit), Some(first)) = (max_staleness, self.first()) {
            self.candidates
                .retain(|candidate| first.signed_duration_since(*candidate) <= limit);
            if self.candidates.is_empty() {
                self.candidates.push(first);
            }
        }
        self
    }

    /// The parallel sequence shifted back by `offset`, index for index.
    pub fn paired(&self, offset: Duration) -> Vec<DateTime<Utc>> {
        self.candidates
            .iter()
            .filter_map(|candidate| candidate.checked_sub_signed(offset))
            .collect()
    }

    pub fn first(&self) -> Option<DateTime<Utc>> {
        self.candidates.first().copied()
    }

    pub fn get(&self, index: usize) -> Option<DateTime<Utc>> {
        self.candidates.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        self.candidates.contains(timestamp)
    }

    pub fn as_slice(&self) -> &[DateTime<Utc>] {
        &self.candidates
    }

    pub fn iter(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.candidates.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_strictly_decreasing_and_bounded() {
        let seq = CandidateTimeSequence::generate(at(15), 1, 4);
        assert_eq!(seq.as_slice(), &[at(15), at(14), at(13), at(12), at(11)]);
        assert!(seq.as_slice().windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_deterministic() {
        let a = CandidateTimeSequence::generate(at(6), 3, 2);
        let b = CandidateTimeSequence::generate(at(6), 3, 2);
        assert_eq!(a, b);
        assert_eq!(a.as_slice(), &[at(6), at(3), at(0)]);
    }

    #[test]
    fn test_zero_lookback_and_zero_cadence() {
        assert_eq!(CandidateTimeSequence::generate(at(10), 1, 0).len(), 1);
        let seq = CandidateTimeSequence::generate(at(10), 0, 4);
        assert_eq!(seq.as_slice(), &[at(10)]);
    }

    #[test]
    fn test_crosses_midnight() {
        let seq = CandidateTimeSequence::generate(at(1), 1, 3);
        assert_eq!(
            seq.get(3),
            Some(Utc.with_ymd_and_hms(2023, 12, 31, 22, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_paired_is_index_aligned() {
        let seq = CandidateTimeSequence::generate(at(15), 1, 4);
        let paired = seq.paired(TWENTY_FOUR_HOURS);
        assert_eq!(paired.len(), seq.len());
        for (current, previous) in seq.iter().zip(paired.iter()) {
            assert_eq!(current - *previous, TWENTY_FOUR_HOURS);
        }
    }

    #[test]
    fn test_limit_staleness() {
        let seq = CandidateTimeSequence::generate(at(15), 1, 4)
            .limit_staleness(Some(Duration::hours(2)));
        assert_eq!(seq.as_slice(), &[at(15), at(14), at(13)]);

        let unlimited = CandidateTimeSequence::generate(at(15), 1, 4).limit_staleness(None);
        assert_eq!(unlimited.len(), 5);
    }
}
