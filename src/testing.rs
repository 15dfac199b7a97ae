//! Helpers for building wire-format traces in tests.

use super::*;
use byteorder::WriteBytesExt;

/// Frame the builder puts in front of every stack, standing in for the
/// instrumentation layer's own return address.
pub(crate) const HOOK_FRAME: u64 = 0xdead_0000;

#[derive(Debug, Default)]
pub(crate) struct TraceBuilder {
  bytes: Vec<u8>,
}

impl TraceBuilder {
  pub(crate) fn alloc(self, address: u64, size: u64, stack: &[u64]) -> Self {
    self.record(EventKind::Allocation, &[address, size], stack)
  }

  pub(crate) fn end(mut self) -> Self {
    self.bytes.write_u32::<LittleEndian>(END_OF_TRACE).unwrap();
    self.bytes.write_u32::<LittleEndian>(0).unwrap();
    self
  }

  pub(crate) fn finish(self) -> Vec<u8> {
    self.bytes
  }

  pub(crate) fn free(self, address: u64, stack: &[u64]) -> Self {
    self.record(EventKind::Deallocation, &[address], stack)
  }

  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn realloc(
    self,
    original: u64,
    address: u64,
    size: u64,
    stack: &[u64],
  ) -> Self {
    self.record(EventKind::Reallocation, &[original, address, size], stack)
  }

  fn record(mut self, kind: EventKind, fields: &[u64], stack: &[u64]) -> Self {
    let frame_count = u32::try_from(stack.len() + 1).unwrap();
    self.bytes.write_u32::<LittleEndian>(kind.code()).unwrap();
    self.bytes.write_u32::<LittleEndian>(frame_count).unwrap();

    for field in fields {
      self.bytes.write_u64::<LittleEndian>(*field).unwrap();
    }

    self.bytes.write_u64::<LittleEndian>(HOOK_FRAME).unwrap();
    for frame in stack {
      self.bytes.write_u64::<LittleEndian>(*frame).unwrap();
    }

    self
  }
}

/// Stack helper for events built directly in Rust.
pub(crate) fn stack(addresses: &[u64]) -> CallStack {
  CallStack::from_addresses(addresses.iter().copied())
}
