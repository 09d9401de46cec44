//! Benchmarks for recording edits and mapping positions in the-mapping.
//!
//! Run with: `cargo bench -p the-mapping --bench mapping`

use divan::{
  Bencher,
  black_box,
};
use the_mapping::{
  Direction,
  PositionMap,
};

const SIZES: &[usize] = &[1_000, 10_000, 100_000];

fn main() {
  divan::main();
}

/// xorshift64, enough to scatter edits without pulling in an rng.
struct Scatter(u64);

impl Scatter {
  fn next(&mut self, bound: usize) -> usize {
    self.0 ^= self.0 << 13;
    self.0 ^= self.0 >> 7;
    self.0 ^= self.0 << 17;
    (self.0 % bound as u64) as usize
  }
}

/// Every other position received a one-unit insertion.
fn interleaved(count: usize) -> PositionMap {
  let mut map = PositionMap::new();
  for i in 0..count {
    map.add(i * 2, 1).unwrap();
  }
  map
}

mod edits {
  use super::*;

  #[divan::bench(args = SIZES)]
  fn sequential_add(bencher: Bencher, count: usize) {
    bencher.bench(|| {
      let mut map = PositionMap::new();
      for i in 0..count {
        map.add(black_box(i * 2), 1).unwrap();
      }
      map
    });
  }

  #[divan::bench(args = SIZES)]
  fn sequential_remove(bencher: Bencher, count: usize) {
    bencher.bench(|| {
      let mut map = PositionMap::new();
      for i in 0..count {
        map.remove(black_box(i), 1).unwrap();
      }
      map
    });
  }

  #[divan::bench(args = SIZES)]
  fn random_mix(bencher: Bencher, count: usize) {
    bencher.bench(|| {
      let mut scatter = Scatter(0x9e37_79b9_7f4a_7c15);
      let mut map = PositionMap::new();
      for _ in 0..count {
        let pos = scatter.next(count);
        let length = scatter.next(8) + 1;
        if scatter.next(2) == 0 {
          map.add(pos, length).unwrap();
        } else {
          map.remove(pos, length).unwrap();
        }
      }
      map
    });
  }
}

mod queries {
  use super::*;

  #[divan::bench(args = SIZES)]
  fn input_to_output(bencher: Bencher, count: usize) {
    let mut map = interleaved(count);
    bencher.bench_local(|| {
      for pos in (0..count).step_by(7) {
        black_box(map.map(Direction::InputToOutput, black_box(pos)).unwrap());
      }
    });
  }

  #[divan::bench(args = SIZES)]
  fn output_to_input(bencher: Bencher, count: usize) {
    let mut map = interleaved(count);
    bencher.bench_local(|| {
      for pos in (0..count * 2).step_by(7) {
        black_box(map.map(Direction::OutputToInput, black_box(pos)).unwrap());
      }
    });
  }

  #[divan::bench(args = SIZES)]
  fn output_to_input_uncached(bencher: Bencher, count: usize) {
    let map = interleaved(count);
    bencher.bench(|| {
      for pos in (0..count * 2).step_by(7) {
        black_box(map.resolve(Direction::OutputToInput, black_box(pos)));
      }
    });
  }

  #[divan::bench(args = SIZES)]
  fn rebuild_after_edit(bencher: Bencher, count: usize) {
    let mut map = interleaved(count);
    let mut flip = false;
    bencher.bench_local(|| {
      // alternating add/remove at the midpoint keeps the map stable
      if flip {
        map.remove(count, 1).unwrap();
      } else {
        map.add(count, 1).unwrap();
      }
      flip = !flip;
      black_box(map.map(Direction::InputToOutput, 0).unwrap())
    });
  }
}
