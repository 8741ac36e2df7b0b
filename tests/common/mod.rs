//! Shared helpers for the integration suites.
#![allow(dead_code)]

use std::hash::BuildHasher;
use std::hash::Hasher;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// Hashes integer keys to themselves, making bucket placement scriptable
/// from test code.
#[derive(Clone, Default)]
pub struct IdentityState;

pub struct IdentityHasher {
  state: u64,
}

impl BuildHasher for IdentityState {
  type Hasher = IdentityHasher;

  fn build_hasher(&self) -> IdentityHasher {
    IdentityHasher { state: 0 }
  }
}

impl Hasher for IdentityHasher {
  fn finish(&self) -> u64 {
    self.state
  }

  fn write(&mut self, bytes: &[u8]) {
    for &byte in bytes {
      self.state = (self.state << 8) | u64::from(byte);
    }
  }

  fn write_u64(&mut self, value: u64) {
    self.state = value;
  }

  fn write_usize(&mut self, value: usize) {
    self.state = value as u64;
  }
}

/// An identity hasher that can be told to start panicking, for exercising
/// user-code failure during migrations.
#[derive(Clone, Default)]
pub struct FlakyState {
  pub poisoned: Arc<AtomicBool>,
}

impl BuildHasher for FlakyState {
  type Hasher = IdentityHasher;

  fn build_hasher(&self) -> IdentityHasher {
    assert!(
      !self.poisoned.load(Ordering::Relaxed),
      "hasher poisoned by the test",
    );

    IdentityHasher { state: 0 }
  }
}
