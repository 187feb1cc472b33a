use std::collections::VecDeque;

use crate::models::Turn;

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Sliding window of the most recent turns. Oldest turns are evicted first.
#[derive(Debug, Clone)]
pub struct History {
  turns: VecDeque<Turn>,
  capacity: usize,
}

impl History {
  /// A capacity of zero is raised to one so the newest turn always survives.
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      turns: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub fn push(&mut self, turn: Turn) {
    self.turns.push_back(turn);
    while self.turns.len() > self.capacity {
      self.turns.pop_front();
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &Turn> {
    self.turns.iter()
  }

  pub fn len(&self) -> usize {
    self.turns.len()
  }

  pub fn is_empty(&self) -> bool {
    self.turns.is_empty()
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn clear(&mut self) {
    self.turns.clear();
  }
}

impl Default for History {
  fn default() -> Self {
    Self::new(DEFAULT_HISTORY_LIMIT)
  }
}
