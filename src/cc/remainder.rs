//! Remainder arithmetic for operations whose element count does not divide
//! evenly across ranks.
//!
//! The last participant of a remainder-allowed operation owns whatever is
//! left once every other participant took a full share. The arithmetic is
//! behind a trait so a device family with different rounding can supply its
//! own.

pub trait RemainderCalculator: std::fmt::Debug + Send + Sync {
    /// Per-participant share of `count`.
    fn div(&self, count: u64, participants: u64) -> u64;

    /// Whether a per-rank share of `per_rank` elements must be sliced to fit
    /// a staging buffer of `buffer_count` elements.
    fn is_slicing(&self, per_rank: u64, buffer_count: u64) -> bool;

    /// Whether `slice_count` elements per slice over `num_slices` slices is an
    /// acceptable split of `per_rank`.
    fn is_valid_slicing(
        &self,
        buffer_count: u64,
        slice_count: u64,
        per_rank: u64,
        num_slices: u64,
        min_buffer_count: u64,
    ) -> bool;

    /// Elements held by the last of `participants` when every other one
    /// holds `share`.
    fn remainder_count(&self, total: u64, share: u64, participants: u64) -> u64;

    /// Elements owned by participant `index` when each holds at most `share`.
    fn share_of(&self, total: u64, share: u64, index: u64) -> u64;
}

/// Round-up shares with the remainder on the last participant.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRemainder;

impl RemainderCalculator for DefaultRemainder {
    fn div(&self, count: u64, participants: u64) -> u64 {
        count.div_ceil(participants.max(1))
    }

    fn is_slicing(&self, per_rank: u64, buffer_count: u64) -> bool {
        per_rank > buffer_count
    }

    fn is_valid_slicing(
        &self,
        buffer_count: u64,
        slice_count: u64,
        per_rank: u64,
        num_slices: u64,
        min_buffer_count: u64,
    ) -> bool {
        slice_count >= min_buffer_count
            && slice_count <= buffer_count
            && slice_count * num_slices >= per_rank
    }

    fn remainder_count(&self, total: u64, share: u64, participants: u64) -> u64 {
        total.saturating_sub(share * participants.saturating_sub(1))
    }

    fn share_of(&self, total: u64, share: u64, index: u64) -> u64 {
        total.saturating_sub(share * index).min(share)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_participant_holds_remainder() {
        let calc = DefaultRemainder;
        let share = calc.div(1001, 8);
        assert_eq!(share, 126);
        assert_eq!(calc.remainder_count(1001, share, 8), 119);
        let shares: u64 = (0..8).map(|idx| calc.share_of(1001, share, idx)).sum();
        assert_eq!(shares, 1001);
        assert_eq!(calc.share_of(1001, share, 7), 119);
    }

    #[test]
    fn short_totals_leave_trailing_participants_empty() {
        let calc = DefaultRemainder;
        assert_eq!(calc.share_of(10, 4, 2), 2);
        assert_eq!(calc.share_of(10, 4, 3), 0);
    }

    #[test]
    fn slicing_bounds() {
        let calc = DefaultRemainder;
        assert!(calc.is_valid_slicing(256, 200, 1000, 5, 32));
        assert!(!calc.is_valid_slicing(256, 300, 1000, 4, 32));
        assert!(!calc.is_valid_slicing(256, 16, 64, 4, 32));
        assert!(!calc.is_valid_slicing(256, 200, 1000, 4, 32));
    }
}
