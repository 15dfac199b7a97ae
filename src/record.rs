use super::*;

/// Stable handle to a record stored in an [`AllocationIndex`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub(crate) usize);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
  Live,
  Freed,
  /// Moved to a new record by a reallocation.
  Reallocated,
}

/// Where an operation happened: the return address of the call and, unless
/// it has been disposed, the full call stack.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Site {
  pub address: u64,
  pub stack: Option<CallStack>,
}

impl Site {
  /// Release the call stack, keeping only the site address.
  pub fn dispose_stack(&mut self) {
    self.stack = None;
  }

  #[must_use]
  pub fn new(stack: CallStack) -> Self {
    Self {
      address: stack.site(),
      stack: Some(stack),
    }
  }

  #[must_use]
  pub fn without_stack(address: u64) -> Self {
    Self {
      address,
      stack: None,
    }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Links {
  pub(crate) chain_next: Option<RecordId>,
  pub(crate) chain_prev: Option<RecordId>,
  pub(crate) lineage_next: Option<RecordId>,
  pub(crate) lineage_prev: Option<RecordId>,
}

/// One observed allocation, or in aggregated mode one family of allocations
/// sharing a call stack.
#[derive(Debug, Clone)]
pub struct AllocationRecord {
  pub address: u64,
  pub allocation_site: Site,
  pub free_site: Option<Site>,
  pub occurrences: u64,
  pub sequence_id: u64,
  pub size: u64,
  pub state: BlockState,
  pub(crate) links: Links,
}

impl AllocationRecord {
  #[must_use]
  pub fn is_live(&self) -> bool {
    self.state == BlockState::Live
  }

  /// Record that reallocated into this one, if any.
  #[must_use]
  pub fn lineage_prev(&self) -> Option<RecordId> {
    self.links.lineage_prev
  }

  /// Record this one was reallocated into, if any.
  #[must_use]
  pub fn lineage_next(&self) -> Option<RecordId> {
    self.links.lineage_next
  }

  #[must_use]
  pub fn new(
    address: u64,
    size: u64,
    sequence_id: u64,
    stack: CallStack,
  ) -> Self {
    Self {
      address,
      allocation_site: Site::new(stack),
      free_site: None,
      occurrences: 1,
      sequence_id,
      size,
      state: BlockState::Live,
      links: Links::default(),
    }
  }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// Free of an address with no live allocation. Without verbose retention
  /// freed records are disposed, so a repeated free lands here rather than
  /// in `DoubleFree`.
  UntrackedFree,
  DoubleFree,
  /// Reallocation of an address with no live allocation.
  UntrackedRealloc,
  /// Reallocation of a block that was already freed.
  ReallocAfterFree,
}

impl Display for ErrorKind {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    let label = match self {
      Self::UntrackedFree => "free of untracked address",
      Self::DoubleFree => "double free",
      Self::UntrackedRealloc => "realloc of untracked address",
      Self::ReallocAfterFree => "realloc of freed address",
    };
    f.write_str(label)
  }
}

/// A protocol violation spotted while reducing the trace.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
  pub address: u64,
  pub kind: ErrorKind,
  /// Address a failed reallocation asked for, `None` for a null request.
  pub new_address: Option<u64>,
  pub sequence_id: u64,
  pub site: Site,
  pub size: u64,
}
