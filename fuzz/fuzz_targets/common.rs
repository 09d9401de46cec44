use the_mapping::{
  CacheOptions,
  Direction,
  PositionMap,
};

const MAX_OPS: usize = 256;
const MAX_POS: usize = 512;
const MAX_LEN: usize = 32;

#[derive(Debug, Clone, Copy)]
pub enum EditOp {
  Add { pos: usize, length: usize },
  Remove { pos: usize, length: usize },
}

pub struct FuzzSession {
  pub map: PositionMap,
  pub ops: Vec<EditOp>,
}

pub fn session_from_bytes(data: &[u8]) -> FuzzSession {
  let mut cursor = ByteCursor::new(data);
  let options = CacheOptions {
    enabled: cursor.next_u8() & 1 == 0,
    limit:   cursor.next_u16() as usize,
  };

  let op_count = cursor.next_usize(MAX_OPS);
  let mut ops = Vec::with_capacity(op_count);
  for _ in 0..op_count {
    let kind = cursor.next_u8();
    let pos = cursor.next_usize(MAX_POS);
    let length = cursor.next_usize(MAX_LEN - 1) + 1;
    ops.push(if kind & 1 == 0 {
      EditOp::Add { pos, length }
    } else {
      EditOp::Remove { pos, length }
    });
  }

  FuzzSession {
    map: PositionMap::with_options(options),
    ops,
  }
}

pub fn apply_edit(map: &mut PositionMap, op: EditOp) {
  let result = match op {
    EditOp::Add { pos, length } => map.add(pos, length),
    EditOp::Remove { pos, length } => map.remove(pos, length),
  };
  if let Err(err) = result {
    panic!("{op:?} rejected: {err}");
  }
}

/// Checks tree invariants, cache agreement and round trips over the first
/// `window` positions of both streams.
pub fn check_mapping(map: &mut PositionMap, window: usize) {
  if let Err(err) = map.validate() {
    panic!("tree invariant broken: {err:?}");
  }

  let mut last_output = None;
  for pos in 0..window {
    for direction in [Direction::InputToOutput, Direction::OutputToInput] {
      let cached = map.map(direction, pos).ok().flatten();
      let live = map.resolve(direction, pos);
      assert_eq!(cached, live, "{direction:?} {pos}");

      if let Some(mapped) = live {
        assert_eq!(
          map.resolve(direction.reverse(), mapped),
          Some(pos),
          "{direction:?} {pos} does not round trip"
        );
      }
    }

    if let Some(output) = map.resolve(Direction::InputToOutput, pos) {
      assert!(
        last_output.is_none_or(|last| last < output),
        "output {output} of input {pos} is out of order"
      );
      last_output = Some(output);
    }
  }
}

struct ByteCursor<'a> {
  data: &'a [u8],
  pos:  usize,
}

impl<'a> ByteCursor<'a> {
  fn new(data: &'a [u8]) -> Self {
    Self { data, pos: 0 }
  }

  fn next_u8(&mut self) -> u8 {
    let value = self.data.get(self.pos).copied().unwrap_or(0);
    self.pos = self.pos.saturating_add(1);
    value
  }

  fn next_u16(&mut self) -> u16 {
    let lo = self.next_u8() as u16;
    let hi = self.next_u8() as u16;
    lo | (hi << 8)
  }

  fn next_usize(&mut self, max: usize) -> usize {
    if max == 0 {
      return 0;
    }
    (self.next_u16() as usize) % (max + 1)
  }
}
