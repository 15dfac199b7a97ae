use super::*;

/// Size of one raw stack frame address in a trace.
pub const FRAME_SIZE: usize = size_of::<u64>();

/// Size of the header shared by every record: kind followed by frame count.
pub const HEADER_SIZE: usize = 2 * size_of::<u32>();

/// Kind code that terminates a trace.
pub const END_OF_TRACE: u32 = 0;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EventKind {
  Allocation,
  Deallocation,
  Reallocation,
}

impl EventKind {
  /// Size of the kind-specific fields between the header and the frames.
  #[must_use]
  pub fn body_size(self) -> usize {
    match self {
      Self::Allocation => 2 * size_of::<u64>(),
      Self::Deallocation => size_of::<u64>(),
      Self::Reallocation => 3 * size_of::<u64>(),
    }
  }

  #[must_use]
  pub fn code(self) -> u32 {
    match self {
      Self::Allocation => 1,
      Self::Deallocation => 2,
      Self::Reallocation => 3,
    }
  }

  #[must_use]
  pub fn from_code(code: u32) -> Option<Self> {
    match code {
      1 => Some(Self::Allocation),
      2 => Some(Self::Deallocation),
      3 => Some(Self::Reallocation),
      _ => None,
    }
  }
}

/// Return addresses stored inline in a trace record, still borrowed from the
/// mapped buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawFrames<'a> {
  bytes: &'a [u8],
}

impl<'a> RawFrames<'a> {
  /// `bytes` must hold a whole number of frames.
  pub(crate) fn new(bytes: &'a [u8]) -> Self {
    debug_assert_eq!(bytes.len() % FRAME_SIZE, 0);
    Self { bytes }
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = u64> + 'a {
    self.bytes.chunks_exact(FRAME_SIZE).map(LittleEndian::read_u64)
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.bytes.len() / FRAME_SIZE
  }
}

/// A decoded trace record whose call stack still points into the trace.
#[derive(Debug, Clone, Copy)]
pub enum RawEvent<'a> {
  Allocation {
    address: u64,
    size: u64,
    frames: RawFrames<'a>,
  },
  Deallocation {
    address: u64,
    frames: RawFrames<'a>,
  },
  Reallocation {
    original: u64,
    address: u64,
    size: u64,
    frames: RawFrames<'a>,
  },
}

impl<'a> RawEvent<'a> {
  #[must_use]
  pub fn frames(&self) -> RawFrames<'a> {
    match self {
      Self::Allocation { frames, .. }
      | Self::Deallocation { frames, .. }
      | Self::Reallocation { frames, .. } => *frames,
    }
  }

  #[must_use]
  pub fn kind(&self) -> EventKind {
    match self {
      Self::Allocation { .. } => EventKind::Allocation,
      Self::Deallocation { .. } => EventKind::Deallocation,
      Self::Reallocation { .. } => EventKind::Reallocation,
    }
  }
}

/// An event with its call stack copied out of the trace, ready for reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
  Allocation {
    address: u64,
    size: u64,
    stack: CallStack,
  },
  Deallocation {
    address: u64,
    stack: CallStack,
  },
  Reallocation {
    original: u64,
    address: u64,
    size: u64,
    stack: CallStack,
  },
}

impl From<RawEvent<'_>> for TraceEvent {
  fn from(raw: RawEvent<'_>) -> Self {
    let stack = CallStack::materialize(raw.frames());

    match raw {
      RawEvent::Allocation { address, size, .. } => {
        Self::Allocation {
          address,
          size,
          stack,
        }
      }
      RawEvent::Deallocation { address, .. } => {
        Self::Deallocation { address, stack }
      }
      RawEvent::Reallocation {
        original,
        address,
        size,
        ..
      } => Self::Reallocation {
        original,
        address,
        size,
        stack,
      },
    }
  }
}

impl TraceEvent {
  #[must_use]
  pub fn allocation(address: u64, size: u64, stack: CallStack) -> Self {
    Self::Allocation {
      address,
      size,
      stack,
    }
  }

  #[must_use]
  pub fn deallocation(address: u64, stack: CallStack) -> Self {
    Self::Deallocation { address, stack }
  }

  #[must_use]
  pub fn kind(&self) -> EventKind {
    match self {
      Self::Allocation { .. } => EventKind::Allocation,
      Self::Deallocation { .. } => EventKind::Deallocation,
      Self::Reallocation { .. } => EventKind::Reallocation,
    }
  }

  #[must_use]
  pub fn reallocation(
    original: u64,
    address: u64,
    size: u64,
    stack: CallStack,
  ) -> Self {
    Self::Reallocation {
      original,
      address,
      size,
      stack,
    }
  }
}
