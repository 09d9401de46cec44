//! Lazily rebuilt lookup tables for both mapping directions.
//!
//! The cache holds two arrays derived from an [`EditTree`]:
//!
//! - `in_map[i]` - output position of input `i`
//! - `out_map[o]` - input position that produced output `o`
//!
//! Slots without a counterpart (deleted inputs, inserted outputs) hold
//! `UNMAPPED`. Mutations only lower the dirty watermark; the arrays are
//! recomputed from the watermark onward the next time a query finds the cache
//! invalid. Both arrays only ever grow.

use std::{
  collections::TryReserveError,
  time::Instant,
};

use serde::{
  Deserialize,
  Serialize,
};

use crate::{
  mapping::Direction,
  tree::EditTree,
};

const UNMAPPED: usize = usize::MAX;

/// Tuning for the lookup tables kept by [`crate::PositionMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheOptions {
  /// Serve queries from the lookup tables when possible.
  pub enabled: bool,
  /// Maximum number of positions each table covers, in its own stream.
  /// Queries past the covered range are answered from the tree.
  pub limit:   usize,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      limit:   1 << 20,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
  Hit(Option<usize>),
  Miss,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MappingCache {
  options:    CacheOptions,
  in_map:     Vec<usize>,
  out_map:    Vec<usize>,
  /// Inputs `0..inputs` are covered by `in_map`.
  inputs:     usize,
  /// Outputs `0..outputs` are covered by `out_map`.
  outputs:    usize,
  valid:      bool,
  dirty_from: usize,
}

impl MappingCache {
  pub fn new(options: CacheOptions) -> Self {
    Self {
      options,
      ..Self::default()
    }
  }

  pub fn options(&self) -> &CacheOptions {
    &self.options
  }

  pub fn is_valid(&self) -> bool {
    self.valid
  }

  pub fn dirty_from(&self) -> usize {
    self.dirty_from
  }

  /// Marks everything from input `from` onward as stale.
  pub fn invalidate(&mut self, from: usize) {
    self.valid = false;
    self.dirty_from = self.dirty_from.min(from);
  }

  /// Forgets all coverage while keeping the allocations.
  pub fn reset(&mut self) {
    self.inputs = 0;
    self.outputs = 0;
    self.valid = false;
    self.dirty_from = 0;
  }

  pub fn lookup(
    &mut self,
    tree: &EditTree,
    direction: Direction,
    pos: usize,
  ) -> Result<Lookup, TryReserveError> {
    if !self.options.enabled {
      return Ok(Lookup::Miss);
    }
    if !self.valid {
      self.rebuild(tree)?;
    }

    let (table, covered) = match direction {
      Direction::InputToOutput => (&self.in_map, self.inputs),
      Direction::OutputToInput => (&self.out_map, self.outputs),
    };
    if pos >= covered {
      return Ok(Lookup::Miss);
    }
    Ok(Lookup::Hit(Some(table[pos]).filter(|&slot| slot != UNMAPPED)))
  }

  fn rebuild(&mut self, tree: &EditTree) -> Result<(), TryReserveError> {
    let start = tracing::enabled!(tracing::Level::DEBUG).then(Instant::now);

    let cover = tree.extent().min(self.options.limit);
    let from = self.dirty_from.min(self.inputs);
    let outputs = tree.output_start(cover).min(self.options.limit);

    // Reserve before touching anything so a failure leaves the cache as is.
    if let Err(err) = self
      .in_map
      .try_reserve(cover.saturating_sub(self.in_map.len()))
      .and_then(|()| {
        self
          .out_map
          .try_reserve(outputs.saturating_sub(self.out_map.len()))
      })
    {
      tracing::warn!(%err, cover, outputs, "failed to grow position cache");
      return Err(err);
    }

    let restart = self.output_restart(tree, from);
    if self.in_map.len() < cover {
      self.in_map.resize(cover, UNMAPPED);
    }
    if self.out_map.len() < outputs {
      self.out_map.resize(outputs, UNMAPPED);
    }
    let restart = restart.min(self.out_map.len());
    self.out_map[restart..].fill(UNMAPPED);

    let mut shift = from.checked_sub(1).map_or(0, |prev| tree.cumulative(prev));
    let mut removed_until = from
      .checked_sub(1)
      .and_then(|prev| tree.covering(prev))
      .map_or(0, |range| range.end);
    let mut edits = tree.edits_in(from..cover).into_iter().peekable();

    for input in from..cover {
      while let Some(edit) = edits.next_if(|edit| edit.anchor == input) {
        shift += edit.delta;
        if let Some(end) = edit.removal_end() {
          removed_until = removed_until.max(end);
        }
      }

      let output = if input < removed_until {
        None
      } else {
        input.checked_add_signed(shift)
      };
      self.in_map[input] = output.unwrap_or(UNMAPPED);
      if let Some(output) = output.filter(|&output| output < outputs) {
        self.out_map[output] = input;
      }
    }

    self.inputs = cover;
    self.outputs = outputs;
    self.valid = true;
    self.dirty_from = usize::MAX;

    if let Some(start) = start {
      tracing::debug!(
        from,
        cover,
        outputs,
        "position cache rebuild took {}s",
        Instant::now().duration_since(start).as_secs_f64()
      );
    }
    Ok(())
  }

  /// First output slot whose owner may have changed: one past the output of
  /// the last live input before `from`.
  fn output_restart(&self, tree: &EditTree, from: usize) -> usize {
    let mut probe = from;
    while probe > 0 {
      let input = probe - 1;
      match self.in_map[input] {
        UNMAPPED => {
          probe = tree.covering(input).map_or(input, |range| range.start);
        },
        output => return output + 1,
      }
    }
    0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_tree() -> EditTree {
    let mut tree = EditTree::new();
    tree.accumulate(0, 2);
    tree.accumulate(3, -2);
    tree.accumulate(7, 3);
    tree.accumulate(10, -4);
    tree.accumulate(16, 1);
    tree
  }

  fn live_output(tree: &EditTree, input: usize) -> Option<usize> {
    (!tree.is_removed(input)).then(|| tree.output_start(input))
  }

  fn assert_tables_match(cache: &mut MappingCache, tree: &EditTree) {
    for input in 0..tree.extent() {
      assert_eq!(
        cache.lookup(tree, Direction::InputToOutput, input),
        Ok(Lookup::Hit(live_output(tree, input))),
        "input {input}"
      );
    }
    for input in 0..tree.extent() {
      if let Some(output) = live_output(tree, input) {
        assert_eq!(
          cache.lookup(tree, Direction::OutputToInput, output),
          Ok(Lookup::Hit(Some(input)))
        );
      }
    }
  }

  #[test]
  fn options_default_and_parse() {
    assert_eq!(CacheOptions::default(), CacheOptions {
      enabled: true,
      limit:   1 << 20,
    });

    let options: CacheOptions = toml::from_str("limit = 64").unwrap();
    assert_eq!(options, CacheOptions {
      enabled: true,
      limit:   64,
    });

    let options: CacheOptions = toml::from_str("enabled = false").unwrap();
    assert!(!options.enabled);
    assert_eq!(options.limit, CacheOptions::default().limit);
  }

  #[test]
  fn first_lookup_builds_tables() {
    let tree = sample_tree();
    let mut cache = MappingCache::default();
    assert!(!cache.is_valid());

    assert_eq!(
      cache.lookup(&tree, Direction::InputToOutput, 0),
      Ok(Lookup::Hit(Some(2)))
    );
    assert!(cache.is_valid());
    assert_eq!(cache.dirty_from(), usize::MAX);
    assert_tables_match(&mut cache, &tree);

    // inserted slots have no source
    assert_eq!(
      cache.lookup(&tree, Direction::OutputToInput, 1),
      Ok(Lookup::Hit(None))
    );
  }

  #[test]
  fn watermark_only_moves_down() {
    let tree = sample_tree();
    let mut cache = MappingCache::default();
    cache.lookup(&tree, Direction::InputToOutput, 0).unwrap();

    cache.invalidate(10);
    cache.invalidate(20);
    assert!(!cache.is_valid());
    assert_eq!(cache.dirty_from(), 10);
    cache.invalidate(4);
    assert_eq!(cache.dirty_from(), 4);
  }

  #[test]
  fn incremental_rebuild_matches_fresh_tables() {
    let mut tree = sample_tree();
    let mut cache = MappingCache::default();
    cache.lookup(&tree, Direction::InputToOutput, 0).unwrap();

    tree.accumulate(12, 2);
    cache.invalidate(12);
    tree.accumulate(20, -3);
    cache.invalidate(20);
    assert_tables_match(&mut cache, &tree);

    let mut fresh = MappingCache::default();
    fresh.lookup(&tree, Direction::InputToOutput, 0).unwrap();
    assert_eq!(cache.inputs, fresh.inputs);
    assert_eq!(cache.outputs, fresh.outputs);
    assert_eq!(cache.in_map[..cache.inputs], fresh.in_map[..fresh.inputs]);
    assert_eq!(cache.out_map[..cache.outputs], fresh.out_map[..fresh.outputs]);
  }

  #[test]
  fn stale_outputs_are_cleared_when_stream_shrinks() {
    let mut tree = EditTree::new();
    tree.accumulate(0, 5);
    let mut cache = MappingCache::default();
    cache.lookup(&tree, Direction::InputToOutput, 0).unwrap();
    assert_eq!(
      cache.lookup(&tree, Direction::OutputToInput, 5),
      Ok(Lookup::Hit(Some(0)))
    );

    tree.accumulate(0, -5);
    cache.invalidate(0);
    assert_eq!(
      cache.lookup(&tree, Direction::OutputToInput, 0),
      Ok(Lookup::Hit(Some(0)))
    );
    // the array kept its length but the slot is no longer claimed
    assert!(cache.out_map.len() >= 6);
    assert_eq!(
      cache.lookup(&tree, Direction::OutputToInput, 5),
      Ok(Lookup::Miss)
    );
  }

  #[test]
  fn limit_bounds_coverage() {
    let mut tree = EditTree::new();
    tree.accumulate(100, 3);
    let mut cache = MappingCache::new(CacheOptions {
      enabled: true,
      limit:   8,
    });

    assert_eq!(
      cache.lookup(&tree, Direction::InputToOutput, 7),
      Ok(Lookup::Hit(Some(7)))
    );
    assert_eq!(
      cache.lookup(&tree, Direction::InputToOutput, 8),
      Ok(Lookup::Miss)
    );
    assert_eq!(cache.in_map.len(), 8);
  }

  #[test]
  fn limit_bounds_outputs() {
    let mut tree = EditTree::new();
    tree.accumulate(0, 1 << 30);
    tree.accumulate(2, -1);
    let mut cache = MappingCache::new(CacheOptions {
      enabled: true,
      limit:   8,
    });

    assert_eq!(
      cache.lookup(&tree, Direction::InputToOutput, 0),
      Ok(Lookup::Hit(Some(1 << 30)))
    );
    assert_eq!(
      cache.lookup(&tree, Direction::OutputToInput, 7),
      Ok(Lookup::Hit(None))
    );
    assert_eq!(
      cache.lookup(&tree, Direction::OutputToInput, 8),
      Ok(Lookup::Miss)
    );
    assert_eq!(cache.out_map.len(), 8);

    // shrinking the insertion brings the outputs back under the limit
    tree.accumulate(0, 4 - (1 << 30));
    cache.invalidate(0);
    assert_eq!(
      cache.lookup(&tree, Direction::OutputToInput, 4),
      Ok(Lookup::Hit(Some(0)))
    );
    assert_eq!(
      cache.lookup(&tree, Direction::OutputToInput, 5),
      Ok(Lookup::Hit(Some(1)))
    );
    assert_eq!(
      cache.lookup(&tree, Direction::OutputToInput, 3),
      Ok(Lookup::Hit(None))
    );
    // input 3 is past the covered inputs, so its output is not cached either
    assert_eq!(
      cache.lookup(&tree, Direction::OutputToInput, 6),
      Ok(Lookup::Miss)
    );
    assert_eq!(cache.out_map.len(), 8);
  }

  #[test]
  fn disabled_cache_always_misses() {
    let tree = sample_tree();
    let mut cache = MappingCache::new(CacheOptions {
      enabled: false,
      ..CacheOptions::default()
    });

    assert_eq!(
      cache.lookup(&tree, Direction::InputToOutput, 0),
      Ok(Lookup::Miss)
    );
    assert!(!cache.is_valid());
    assert!(cache.in_map.is_empty());
  }

  #[test]
  fn reset_rebuilds_from_scratch() {
    let tree = sample_tree();
    let mut cache = MappingCache::default();
    cache.lookup(&tree, Direction::InputToOutput, 0).unwrap();

    let empty = EditTree::new();
    cache.reset();
    assert_eq!(
      cache.lookup(&empty, Direction::OutputToInput, 0),
      Ok(Lookup::Miss)
    );
    assert_eq!(
      cache.lookup(&empty, Direction::InputToOutput, 3),
      Ok(Lookup::Miss)
    );
  }
}
