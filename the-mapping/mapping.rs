//! Bidirectional position mapping between an input stream and the output
//! stream produced by a history of insertions and deletions.
//!
//! Edits are expressed in output coordinates: `add(pos, length)` inserts
//! `length` units at output `pos`, `remove(pos, length)` deletes `length`
//! units starting there. Every edit is stored as a signed delta in an
//! [`EditTree`] keyed by the input position it attaches to, so:
//!
//! - input to output is `pos + cumulative(pos)`, or nothing when `pos` was
//!   deleted;
//! - output to input searches for the last input whose output start does not
//!   pass `pos`. The output start is non-decreasing over the input stream, so
//!   a galloping search followed by bisection finds it in `O(log² n)`.
//!
//! Positions that land on inserted content have no input counterpart, and
//! deleted inputs have no output counterpart; both map to `None`.
//!
//! ```
//! use the_mapping::{
//!   Direction,
//!   PositionMap,
//! };
//!
//! let mut map = PositionMap::new();
//! map.add(0, 2).unwrap();
//! map.remove(5, 1).unwrap();
//!
//! assert_eq!(map.map(Direction::InputToOutput, 0).unwrap(), Some(2));
//! assert_eq!(map.map(Direction::InputToOutput, 3).unwrap(), None);
//! assert_eq!(map.map(Direction::OutputToInput, 1).unwrap(), None);
//! assert_eq!(map.map(Direction::OutputToInput, 5).unwrap(), Some(4));
//! ```

use std::collections::TryReserveError;

use serde::{
  Deserialize,
  Serialize,
};
use thiserror::Error;

use crate::{
  cache::{
    CacheOptions,
    Lookup,
    MappingCache,
  },
  tree::{
    Edit,
    EditTree,
    InvariantError,
  },
};


/// Largest position or length accepted by [`PositionMap`]. Leaves enough
/// headroom that output positions stay representable as `isize`.
pub const MAX_POSITION: usize = (isize::MAX as usize) >> 2;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MappingError {
  #[error("edit at position {pos} has zero length")]
  EmptyEdit { pos: usize },
  #[error("value {value} is past the largest supported position")]
  PositionOverflow { value: usize },
  #[error("failed to grow the position cache: {0}")]
  CacheAlloc(#[from] TryReserveError),
}

pub type Result<T> = std::result::Result<T, MappingError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
  InputToOutput,
  OutputToInput,
}

impl Direction {
  pub const fn reverse(self) -> Self {
    match self {
      Self::InputToOutput => Self::OutputToInput,
      Self::OutputToInput => Self::InputToOutput,
    }
  }
}

/// Where an output position falls in the input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Located {
  /// Produced by this live input.
  Exact(usize),
  /// Inside the insertion block anchored before this input.
  Gap(usize),
}

impl Located {
  /// The input an edit at this position attaches to.
  fn input(self) -> usize {
    match self {
      Self::Exact(input) | Self::Gap(input) => input,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct PositionMap {
  tree:  EditTree,
  cache: MappingCache,
}

impl PositionMap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_options(options: CacheOptions) -> Self {
    Self {
      tree:  EditTree::new(),
      cache: MappingCache::new(options),
    }
  }

  pub fn options(&self) -> &CacheOptions {
    self.cache.options()
  }

  /// Inserts `length` units at output position `pos`.
  ///
  /// Inside inserted content the new units extend the insertion block that
  /// contains `pos`. Past the end of every edit they extend the stream.
  pub fn add(&mut self, pos: usize, length: usize) -> Result<()> {
    check_edit(pos, length)?;

    let located = self.locate(pos);
    let anchor = located.input();
    tracing::trace!(pos, length, ?located, anchor, "add");

    self.tree.accumulate(anchor, length as isize);
    self.cache.invalidate(anchor);
    debug_assert!(self.tree.validate().is_ok());
    Ok(())
  }

  /// Deletes `length` units starting at output position `pos`.
  ///
  /// Units are consumed in output order: inserted content is shrunk in place,
  /// and live inputs become new deletion ranges that never overlap the ones
  /// already recorded.
  ///
  /// When `pos` is the output of a live input that has an insertion anchored
  /// before it, that insertion shrinks first and the input stays live: after
  /// `add(0, 2)`, `remove(2, 1)` leaves input 0 at output 1.
  pub fn remove(&mut self, pos: usize, length: usize) -> Result<()> {
    check_edit(pos, length)?;

    let start = self.locate(pos).input();
    let mut cursor = start;
    let mut remaining = length;

    while remaining > 0 {
      if let Some(range) = self.tree.covering(cursor) {
        // Only insertions anchored inside the range are still visible.
        for edit in self.tree.edits_in(cursor..range.end) {
          let taken = remaining.min(edit.insertion_len());
          if taken > 0 {
            self.tree.accumulate(edit.anchor, -(taken as isize));
            remaining -= taken;
          }
        }
        cursor = range.end;
        continue;
      }

      let next = self.tree.next_removal(cursor);
      let room = next
        .as_ref()
        .map_or(usize::MAX, |range| range.start - cursor);
      let inserted = self.tree.delta_at(cursor).max(0) as usize;
      let taken = remaining.min(inserted.saturating_add(room));
      tracing::trace!(cursor, taken, remaining, "remove");

      self.tree.accumulate(cursor, -(taken as isize));
      remaining -= taken;
      match next {
        Some(range) => cursor = range.start,
        None => break,
      }
    }

    self.cache.invalidate(start);
    debug_assert!(self.tree.validate().is_ok());
    Ok(())
  }

  /// Maps `pos` across the edit history, answering from the cache when it
  /// covers `pos` and from the tree otherwise.
  pub fn map(&mut self, direction: Direction, pos: usize) -> Result<Option<usize>> {
    check_position(pos)?;
    match self.cache.lookup(&self.tree, direction, pos)? {
      Lookup::Hit(mapped) => Ok(mapped),
      Lookup::Miss => Ok(self.resolve(direction, pos)),
    }
  }

  /// Maps `pos` using the tree alone, leaving the cache untouched.
  pub fn resolve(&self, direction: Direction, pos: usize) -> Option<usize> {
    match direction {
      Direction::InputToOutput => {
        (!self.tree.is_removed(pos)).then(|| self.tree.output_start(pos))
      },
      Direction::OutputToInput => {
        match self.locate(pos) {
          Located::Exact(input) => Some(input),
          Located::Gap(_) => None,
        }
      },
    }
  }

  /// Forgets every edit, keeping the allocations.
  pub fn clear(&mut self) {
    self.tree.clear();
    self.cache.reset();
  }

  /// Number of input anchors carrying an edit.
  pub fn edit_count(&self) -> usize {
    self.tree.len()
  }

  /// Every recorded edit, in input order.
  pub fn edits(&self) -> Vec<Edit> {
    self.tree.edits()
  }

  /// Output length minus input length over the whole stream.
  pub fn total_delta(&self) -> isize {
    self.tree.total()
  }

  pub fn validate(&self) -> std::result::Result<(), InvariantError> {
    self.tree.validate()
  }

  /// Renders the mapping of inputs `0..upto`, one line per input.
  pub fn dump(&self, upto: usize) -> String {
    (0..upto)
      .map(|input| {
        match self.resolve(Direction::InputToOutput, input) {
          Some(output) => format!("IN {input:>3} -> OUT {output:>3}"),
          None => format!("IN {input:>3} -> removed"),
        }
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  fn locate(&self, pos: usize) -> Located {
    let tree = &self.tree;
    let extent = tree.extent();
    let end = tree.output_start(extent);
    if pos >= end {
      return Located::Exact(extent + (pos - end));
    }
    if tree.output_start(0) > pos {
      return Located::Gap(0);
    }

    // Output start of `lo` is at or before `pos`, that of `hi` is past it.
    let mut lo = 0;
    let mut hi = 1;
    while hi < extent && tree.output_start(hi) <= pos {
      lo = hi;
      hi = hi.saturating_mul(2);
    }
    let mut hi = hi.min(extent);
    while hi - lo > 1 {
      let mid = lo + (hi - lo) / 2;
      if tree.output_start(mid) <= pos {
        lo = mid;
      } else {
        hi = mid;
      }
    }

    if !tree.is_removed(lo) && tree.output_start(lo) == pos {
      Located::Exact(lo)
    } else {
      Located::Gap(lo + 1)
    }
  }
}

fn check_position(value: usize) -> Result<()> {
  if value > MAX_POSITION {
    return Err(MappingError::PositionOverflow { value });
  }
  Ok(())
}

fn check_edit(pos: usize, length: usize) -> Result<()> {
  if length == 0 {
    return Err(MappingError::EmptyEdit { pos });
  }
  check_position(pos)?;
  check_position(length)
}
