// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::str::FromStr;

use crate::error::RangeError;

/// Which episodes of a channel to download, as given on the command line
///
/// Episode numbers are 1-based positions in the chronological episode list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpisodeSelection {
    #[default]
    All,
    /// `"42"`: episodes 1 to 42
    First(usize),
    /// `"2-10"`: episodes 2 to 10
    Between { from: usize, to: usize },
    /// `"-10"`: the 10 latest episodes
    Latest(usize),
}

impl FromStr for EpisodeSelection {
    type Err = RangeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || RangeError::Invalid(input.to_string());
        let input = input.trim();

        if let Some(count) = input.strip_prefix('-') {
            let count: usize = count.parse().map_err(|_| invalid())?;
            return if count > 0 {
                Ok(Self::Latest(count))
            } else {
                Err(invalid())
            };
        }

        if let Some((from, to)) = input.split_once('-') {
            let from: usize = from.parse().map_err(|_| invalid())?;
            let to: usize = to.parse().map_err(|_| invalid())?;
            return if from > 0 && to >= from {
                Ok(Self::Between { from, to })
            } else {
                Err(invalid())
            };
        }

        match input.parse::<usize>() {
            Ok(count) if count > 0 => Ok(Self::First(count)),
            _ => Err(invalid()),
        }
    }
}

impl EpisodeSelection {
    /// Resolve against a channel with `total` episodes
    pub fn resolve(&self, total: usize) -> EpisodeRange {
        match *self {
            Self::All => EpisodeRange::all(total),
            Self::First(count) => EpisodeRange::new(1, count),
            Self::Between { from, to } => EpisodeRange::new(from, to),
            Self::Latest(count) => EpisodeRange::new((total + 1).saturating_sub(count).max(1), total),
        }
    }
}

/// Inclusive, 1-based range of episode numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeRange {
    pub first: usize,
    pub last: usize,
}

impl EpisodeRange {
    pub fn new(first: usize, last: usize) -> Self {
        Self { first, last }
    }

    pub fn all(total: usize) -> Self {
        Self::new(1, total)
    }

    /// The part of `items` covered by this range, clamped to its bounds
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let start = self.first.max(1) - 1;
        let end = self.last.min(items.len());
        if start >= end {
            return &[];
        }
        &items[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_number_as_first_n() {
        assert_eq!("42".parse(), Ok(EpisodeSelection::First(42)));
    }

    #[test]
    fn parses_range() {
        assert_eq!(
            "2-10".parse(),
            Ok(EpisodeSelection::Between { from: 2, to: 10 })
        );
        assert_eq!(
            "3-3".parse(),
            Ok(EpisodeSelection::Between { from: 3, to: 3 })
        );
    }

    #[test]
    fn parses_negative_as_latest() {
        assert_eq!("-10".parse(), Ok(EpisodeSelection::Latest(10)));
    }

    #[test]
    fn rejects_invalid_input() {
        for input in ["0", "-0", "0-5", "5-2", "abc", "1-b", "", "1-2-3"] {
            assert!(
                input.parse::<EpisodeSelection>().is_err(),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn resolves_against_channel_length() {
        assert_eq!(EpisodeSelection::All.resolve(7), EpisodeRange::new(1, 7));
        assert_eq!(EpisodeSelection::First(3).resolve(7), EpisodeRange::new(1, 3));
        assert_eq!(EpisodeSelection::Latest(2).resolve(7), EpisodeRange::new(6, 7));
        assert_eq!(EpisodeSelection::Latest(20).resolve(7), EpisodeRange::new(1, 7));
    }

    #[test]
    fn slice_clamps_to_bounds() {
        let items = [1, 2, 3, 4, 5];

        assert_eq!(EpisodeRange::new(2, 4).slice(&items), &[2, 3, 4]);
        assert_eq!(EpisodeRange::new(4, 100).slice(&items), &[4, 5]);
        assert_eq!(EpisodeRange::new(0, 1).slice(&items), &[1]);
        assert!(EpisodeRange::new(6, 9).slice(&items).is_empty());
        assert!(EpisodeRange::all(0).slice(&items).is_empty());
    }
}
