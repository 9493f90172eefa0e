//! Sorted set of ranks without duplicates.

use super::Rank;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankSet {
    ranks: Vec<Rank>,
}

impl RankSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rank, keeping the set sorted. Returns false if it was already
    /// present.
    pub fn insert(&mut self, rank: Rank) -> bool {
        match self.ranks.binary_search(&rank) {
            Ok(_) => false,
            Err(pos) => {
                self.ranks.insert(pos, rank);
                true
            }
        }
    }

    pub fn contains(&self, rank: Rank) -> bool {
        self.ranks.binary_search(&rank).is_ok()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn first(&self) -> Option<Rank> {
        self.ranks.first().copied()
    }

    pub fn last(&self) -> Option<Rank> {
        self.ranks.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Rank> + '_ {
        self.ranks.iter().copied()
    }

    pub fn as_slice(&self) -> &[Rank] {
        &self.ranks
    }

    pub fn clear(&mut self) {
        self.ranks.clear();
    }
}

impl FromIterator<Rank> for RankSet {
    fn from_iter<I: IntoIterator<Item = Rank>>(iter: I) -> Self {
        let mut ranks: Vec<Rank> = iter.into_iter().collect();
        ranks.sort_unstable();
        ranks.dedup();
        Self { ranks }
    }
}

impl<'a> IntoIterator for &'a RankSet {
    type Item = Rank;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, Rank>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranks.iter().copied()
    }
}
