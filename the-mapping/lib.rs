//! Bidirectional position mapping between an input stream and the
//! output stream produced by a sequence of insertions and deletions.
//!
//! [`PositionMap`] is the entry point. Edits are recorded in an augmented
//! red-black tree ([`tree::EditTree`]) and queries are served from lazily
//! rebuilt lookup tables whose size is bounded by [`CacheOptions`].

pub mod cache;
pub mod mapping;
pub mod tree;

pub use cache::CacheOptions;
pub use mapping::{
  Direction,
  MAX_POSITION,
  MappingError,
  PositionMap,
  Result,
};
pub use tree::{
  Edit,
  InvariantError,
};
