//! Selection of per-block-range behavior across hard forks.

use anyhow::Result;
use ledgerplay_types::Value;
use std::ops::RangeInclusive;
use thiserror::Error as ThisError;

use crate::action::{Action, ActionLoader};

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ForkRouterError {
    #[error("no ranges given")]
    Empty,
    #[error("first range starts at block #{0}, not at genesis")]
    MissingGenesis(u64),
    #[error("last range ends at block #{0}, not at the final block")]
    Unbounded(u64),
    #[error("range starting at block #{start} does not follow block #{previous_end}")]
    Discontiguous { previous_end: u64, start: u64 },
    #[error("range {start}..={end} is empty")]
    Inverted { start: u64, end: u64 },
}

/// Maps every block index to exactly one `T`.
#[derive(Debug, Clone)]
pub struct ForkRouter<T> {
    routes: Vec<(RangeInclusive<u64>, T)>,
}

impl<T> ForkRouter<T> {
    /// Builds a router from ranges given in ascending order.
    pub fn new(routes: Vec<(RangeInclusive<u64>, T)>) -> Result<Self, ForkRouterError> {
        let mut previous_end: Option<u64> = None;
        for (range, _) in &routes {
            let (start, end) = (*range.start(), *range.end());
            if start > end {
                return Err(ForkRouterError::Inverted { start, end });
            }
            match previous_end {
                None if start != 0 => return Err(ForkRouterError::MissingGenesis(start)),
                Some(previous_end) if previous_end.checked_add(1) != Some(start) => {
                    return Err(ForkRouterError::Discontiguous { previous_end, start });
                }
                _ => {}
            }
            previous_end = Some(end);
        }
        match previous_end {
            None => Err(ForkRouterError::Empty),
            Some(end) if end != u64::MAX => Err(ForkRouterError::Unbounded(end)),
            Some(_) => Ok(Self { routes }),
        }
    }

    /// A router sending every block to `value`.
    pub fn single(value: T) -> Self {
        Self {
            routes: vec![(0..=u64::MAX, value)],
        }
    }

    pub fn route(&self, block_index: u64) -> &T {
        let position = self
            .routes
            .partition_point(|(range, _)| *range.end() < block_index);
        // Ranges cover 0..=u64::MAX, so some range always contains the index.
        &self.routes[position].1
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<L: ActionLoader> ActionLoader for ForkRouter<L> {
    fn load(&self, block_index: u64, value: &Value) -> Result<Box<dyn Action>> {
        self.route(block_index).load(block_index, value)
    }
}
