//! Augmented red-black tree of edits keyed by input position.
//!
//! Every node is an [`Edit`]: a signed length change attached to an input
//! anchor. Positive deltas insert units immediately before the anchor,
//! negative deltas delete the inputs `[anchor, anchor - delta)`. On top of the
//! usual red-black bookkeeping each node caches two subtree aggregates:
//!
//! - **sum** - the sum of all deltas in the subtree, which turns the prefix
//!   sum of deltas into an `O(log n)` walk ([`EditTree::cumulative`]).
//! - **reach** - the furthest end of any deletion in the subtree, which lets
//!   the point-stabbing query ([`EditTree::covering`]) prune whole subtrees.
//!
//! Nodes live in an arena addressed by index. Slot `0` is a shared black
//! sentinel standing in for every missing child and for the root's parent, so
//! rotations and the insert fix-up never special-case absent links. The
//! sentinel is never written to.
//!
//! Nodes are never unlinked: an anchor whose delta cancels out stays in the
//! tree as an inert node.

use std::{
  cmp::Ordering,
  ops::Range,
};

type NodeId = usize;

const NIL: NodeId = 0;

/// A net length change recorded at an input anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edit {
  pub anchor: usize,
  pub delta:  isize,
}

impl Edit {
  pub const fn is_removal(&self) -> bool {
    self.delta < 0
  }

  /// Exclusive end of the deleted input range, if this edit deletes.
  pub const fn removal_end(&self) -> Option<usize> {
    if self.is_removal() {
      Some(self.anchor + self.delta.unsigned_abs())
    } else {
      None
    }
  }

  /// Number of units inserted before the anchor.
  pub const fn insertion_len(&self) -> usize {
    if self.delta > 0 { self.delta as usize } else { 0 }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
  Red,
  Black,
}

#[derive(Debug, Clone, Copy)]
struct Node {
  edit:   Edit,
  sum:    isize,
  reach:  usize,
  color:  Color,
  parent: NodeId,
  left:   NodeId,
  right:  NodeId,
}

impl Node {
  const SENTINEL: Self = Self {
    edit:   Edit {
      anchor: 0,
      delta:  0,
    },
    sum:    0,
    reach:  0,
    color:  Color::Black,
    parent: NIL,
    left:   NIL,
    right:  NIL,
  };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantError {
  SentinelWritten,
  RedRoot,
  RootHasParent,
  ParentMismatch,
  OutOfOrder,
  RedRed,
  BlackHeight,
  StaleSum,
  StaleReach,
  StaleExtent,
  UnreachableNode,
  OverlappingRemoval,
}

#[derive(Debug, Clone)]
pub struct EditTree {
  nodes:  Vec<Node>,
  root:   NodeId,
  extent: usize,
}

impl Default for EditTree {
  fn default() -> Self {
    Self::new()
  }
}

impl EditTree {
  pub fn new() -> Self {
    Self {
      nodes:  vec![Node::SENTINEL],
      root:   NIL,
      extent: 0,
    }
  }

  /// Number of anchors holding an edit (inert ones included).
  pub fn len(&self) -> usize {
    self.nodes.len() - 1
  }

  pub fn is_empty(&self) -> bool {
    self.root == NIL
  }

  pub fn clear(&mut self) {
    self.nodes.truncate(1);
    self.root = NIL;
    self.extent = 0;
  }

  /// Sum of every recorded delta.
  pub fn total(&self) -> isize {
    self.nodes[self.root].sum
  }

  /// First input position from which no edit has any influence: every input
  /// at or past it is live and shifted by exactly [`EditTree::total`].
  pub fn extent(&self) -> usize {
    self.extent
  }

  /// Adds `delta` to the edit anchored at `anchor`, creating it if needed.
  pub fn accumulate(&mut self, anchor: usize, delta: isize) {
    debug_assert_ne!(delta, 0, "accumulating an empty delta");

    let mut parent = NIL;
    let mut current = self.root;
    while current != NIL {
      parent = current;
      let node = &mut self.nodes[current];
      match anchor.cmp(&node.edit.anchor) {
        Ordering::Less => current = node.left,
        Ordering::Greater => current = node.right,
        Ordering::Equal => {
          node.edit.delta += delta;
          self.track_extent(current);
          self.refresh_to_root(current);
          return;
        },
      }
    }

    let id = self.nodes.len();
    self.nodes.push(Node {
      edit: Edit { anchor, delta },
      sum: delta,
      reach: 0,
      color: Color::Red,
      parent,
      left: NIL,
      right: NIL,
    });

    if parent == NIL {
      self.root = id;
    } else if anchor < self.nodes[parent].edit.anchor {
      self.nodes[parent].left = id;
    } else {
      self.nodes[parent].right = id;
    }

    self.track_extent(id);
    self.refresh_to_root(id);
    self.fix_insert(id);
  }

  /// Delta recorded at exactly `anchor`, or zero.
  pub fn delta_at(&self, anchor: usize) -> isize {
    let mut current = self.root;
    while current != NIL {
      let node = &self.nodes[current];
      match anchor.cmp(&node.edit.anchor) {
        Ordering::Less => current = node.left,
        Ordering::Greater => current = node.right,
        Ordering::Equal => return node.edit.delta,
      }
    }
    0
  }

  /// Sum of the deltas anchored at or before `pos`.
  pub fn cumulative(&self, pos: usize) -> isize {
    let mut sum = 0;
    let mut current = self.root;
    while current != NIL {
      let node = &self.nodes[current];
      if pos < node.edit.anchor {
        current = node.left;
      } else {
        sum += node.edit.delta + self.nodes[node.left].sum;
        current = node.right;
      }
    }
    sum
  }

  /// The deletion range containing `pos`, if any.
  pub fn covering(&self, pos: usize) -> Option<Range<usize>> {
    let mut current = self.root;
    while current != NIL {
      let node = &self.nodes[current];
      if let Some(end) = node.edit.removal_end()
        && (node.edit.anchor..end).contains(&pos)
      {
        return Some(node.edit.anchor..end);
      }

      // A left range ending past `pos` either covers it or starts after it,
      // and in the latter case nothing on the right can cover it either.
      if self.nodes[node.left].reach > pos {
        current = node.left;
      } else if pos > node.edit.anchor {
        current = node.right;
      } else {
        break;
      }
    }
    None
  }

  pub fn is_removed(&self, pos: usize) -> bool {
    self.covering(pos).is_some()
  }

  /// The deletion range with the smallest start at or after `from`.
  pub fn next_removal(&self, from: usize) -> Option<Range<usize>> {
    self.first_removal_from(self.root, from)
  }

  /// Output position of input `pos`. Inputs inside a deletion report the
  /// position of the content following the deletion, which keeps the result
  /// non-decreasing over the whole input stream.
  pub fn output_start(&self, pos: usize) -> usize {
    let mut start = pos as isize + self.cumulative(pos);
    if let Some(range) = self.covering(pos) {
      start += (range.end - pos) as isize;
    }
    debug_assert!(start >= 0, "negative output start for input {pos}");
    start.max(0) as usize
  }

  /// Edits anchored inside `range`, in anchor order.
  pub fn edits_in(&self, range: Range<usize>) -> Vec<Edit> {
    let mut edits = Vec::new();
    self.collect_edits(self.root, &range, &mut edits);
    edits
  }

  /// Every edit, in anchor order.
  pub fn edits(&self) -> Vec<Edit> {
    self.edits_in(0..usize::MAX)
  }

  pub fn validate(&self) -> Result<(), InvariantError> {
    let sentinel = &self.nodes[NIL];
    if sentinel.color != Color::Black
      || sentinel.sum != 0
      || sentinel.reach != 0
      || sentinel.left != NIL
      || sentinel.right != NIL
    {
      return Err(InvariantError::SentinelWritten);
    }
    if self.root == NIL {
      return if self.len() == 0 {
        Ok(())
      } else {
        Err(InvariantError::UnreachableNode)
      };
    }
    if self.nodes[self.root].color != Color::Black {
      return Err(InvariantError::RedRoot);
    }
    if self.nodes[self.root].parent != NIL {
      return Err(InvariantError::RootHasParent);
    }

    let mut visited = 0;
    self.check_subtree(self.root, NIL, None, None, &mut visited)?;
    if visited != self.len() {
      return Err(InvariantError::UnreachableNode);
    }

    let mut removed_until = 0;
    for edit in self.edits() {
      if edit.anchor >= self.extent {
        return Err(InvariantError::StaleExtent);
      }
      if let Some(end) = edit.removal_end() {
        if edit.anchor < removed_until {
          return Err(InvariantError::OverlappingRemoval);
        }
        if end > self.extent {
          return Err(InvariantError::StaleExtent);
        }
        removed_until = end;
      }
    }

    Ok(())
  }

  fn track_extent(&mut self, id: NodeId) {
    let edit = self.nodes[id].edit;
    let end = edit.removal_end().unwrap_or(0).max(edit.anchor + 1);
    self.extent = self.extent.max(end);
  }

  fn refresh(&mut self, id: NodeId) {
    debug_assert_ne!(id, NIL, "refreshing the sentinel");
    let node = self.nodes[id];
    let left = &self.nodes[node.left];
    let right = &self.nodes[node.right];
    let sum = node.edit.delta + left.sum + right.sum;
    let reach = node
      .edit
      .removal_end()
      .unwrap_or(0)
      .max(left.reach)
      .max(right.reach);

    let node = &mut self.nodes[id];
    node.sum = sum;
    node.reach = reach;
  }

  fn refresh_to_root(&mut self, mut id: NodeId) {
    while id != NIL {
      self.refresh(id);
      id = self.nodes[id].parent;
    }
  }

  fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
    if parent == NIL {
      self.root = new;
    } else if self.nodes[parent].left == old {
      self.nodes[parent].left = new;
    } else {
      self.nodes[parent].right = new;
    }
  }

  fn rotate_left(&mut self, x: NodeId) {
    let y = self.nodes[x].right;
    let inner = self.nodes[y].left;

    self.nodes[x].right = inner;
    if inner != NIL {
      self.nodes[inner].parent = x;
    }

    let parent = self.nodes[x].parent;
    self.nodes[y].parent = parent;
    self.replace_child(parent, x, y);

    self.nodes[y].left = x;
    self.nodes[x].parent = y;

    self.refresh(x);
    self.refresh(y);
  }

  fn rotate_right(&mut self, y: NodeId) {
    let x = self.nodes[y].left;
    let inner = self.nodes[x].right;

    self.nodes[y].left = inner;
    if inner != NIL {
      self.nodes[inner].parent = y;
    }

    let parent = self.nodes[y].parent;
    self.nodes[x].parent = parent;
    self.replace_child(parent, y, x);

    self.nodes[x].right = y;
    self.nodes[y].parent = x;

    self.refresh(y);
    self.refresh(x);
  }

  fn fix_insert(&mut self, mut z: NodeId) {
    while self.nodes[self.nodes[z].parent].color == Color::Red {
      let parent = self.nodes[z].parent;
      let grand = self.nodes[parent].parent;

      if parent == self.nodes[grand].left {
        let uncle = self.nodes[grand].right;
        if self.nodes[uncle].color == Color::Red {
          self.nodes[parent].color = Color::Black;
          self.nodes[uncle].color = Color::Black;
          self.nodes[grand].color = Color::Red;
          z = grand;
        } else {
          if z == self.nodes[parent].right {
            z = parent;
            self.rotate_left(z);
          }
          let parent = self.nodes[z].parent;
          let grand = self.nodes[parent].parent;
          self.nodes[parent].color = Color::Black;
          self.nodes[grand].color = Color::Red;
          self.rotate_right(grand);
        }
      } else {
        let uncle = self.nodes[grand].left;
        if self.nodes[uncle].color == Color::Red {
          self.nodes[parent].color = Color::Black;
          self.nodes[uncle].color = Color::Black;
          self.nodes[grand].color = Color::Red;
          z = grand;
        } else {
          if z == self.nodes[parent].left {
            z = parent;
            self.rotate_right(z);
          }
          let parent = self.nodes[z].parent;
          let grand = self.nodes[parent].parent;
          self.nodes[parent].color = Color::Black;
          self.nodes[grand].color = Color::Red;
          self.rotate_left(grand);
        }
      }
    }

    let root = self.root;
    self.nodes[root].color = Color::Black;
  }

  fn first_removal_from(&self, id: NodeId, from: usize) -> Option<Range<usize>> {
    let node = &self.nodes[id];
    if id == NIL || node.reach <= from {
      return None;
    }
    if node.edit.anchor >= from {
      if let Some(range) = self.first_removal_from(node.left, from) {
        return Some(range);
      }
      if let Some(end) = node.edit.removal_end() {
        return Some(node.edit.anchor..end);
      }
    }
    self.first_removal_from(node.right, from)
  }

  fn collect_edits(&self, id: NodeId, range: &Range<usize>, out: &mut Vec<Edit>) {
    if id == NIL {
      return;
    }
    let node = &self.nodes[id];
    if range.start < node.edit.anchor {
      self.collect_edits(node.left, range, out);
    }
    if range.contains(&node.edit.anchor) {
      out.push(node.edit);
    }
    if node.edit.anchor < range.end {
      self.collect_edits(node.right, range, out);
    }
  }

  fn check_subtree(
    &self,
    id: NodeId,
    parent: NodeId,
    lower: Option<usize>,
    upper: Option<usize>,
    visited: &mut usize,
  ) -> Result<usize, InvariantError> {
    if id == NIL {
      return Ok(1);
    }
    *visited += 1;
    if *visited > self.len() {
      return Err(InvariantError::UnreachableNode);
    }

    let node = self.nodes[id];
    if node.parent != parent {
      return Err(InvariantError::ParentMismatch);
    }
    let anchor = node.edit.anchor;
    if lower.is_some_and(|lower| anchor <= lower) || upper.is_some_and(|upper| anchor >= upper) {
      return Err(InvariantError::OutOfOrder);
    }

    let left = self.nodes[node.left];
    let right = self.nodes[node.right];
    if node.color == Color::Red && (left.color == Color::Red || right.color == Color::Red) {
      return Err(InvariantError::RedRed);
    }

    let left_height = self.check_subtree(node.left, id, lower, Some(anchor), visited)?;
    let right_height = self.check_subtree(node.right, id, Some(anchor), upper, visited)?;
    if left_height != right_height {
      return Err(InvariantError::BlackHeight);
    }

    if node.sum != node.edit.delta + left.sum + right.sum {
      return Err(InvariantError::StaleSum);
    }
    let reach = node
      .edit
      .removal_end()
      .unwrap_or(0)
      .max(left.reach)
      .max(right.reach);
    if node.reach != reach {
      return Err(InvariantError::StaleReach);
    }

    Ok(left_height + usize::from(node.color == Color::Black))
  }
}
