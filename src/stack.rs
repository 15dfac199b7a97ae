use super::*;

/// A single return address, optionally resolved to a symbol and file.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct FrameDescriptor {
  pub address: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub file: Option<Arc<str>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub symbol: Option<Arc<str>>,
}

impl FrameDescriptor {
  #[must_use]
  pub fn is_resolved(&self) -> bool {
    self.symbol.is_some()
  }

  #[must_use]
  pub fn new(address: u64) -> Self {
    Self {
      address,
      file: None,
      symbol: None,
    }
  }
}

/// Owned call stack, deepest frame first.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CallStack {
  frames: Vec<FrameDescriptor>,
}

impl CallStack {
  pub fn addresses(&self) -> impl Iterator<Item = u64> + '_ {
    self.frames.iter().map(|frame| frame.address)
  }

  #[must_use]
  pub fn depth(&self) -> usize {
    self.frames.len()
  }

  #[must_use]
  pub fn frames(&self) -> &[FrameDescriptor] {
    &self.frames
  }

  pub fn frames_mut(&mut self) -> &mut [FrameDescriptor] {
    &mut self.frames
  }

  /// Build a stack from addresses that no longer include the
  /// instrumentation frame.
  pub fn from_addresses<I>(addresses: I) -> Self
  where
    I: IntoIterator<Item = u64>,
  {
    Self {
      frames: addresses.into_iter().map(FrameDescriptor::new).collect(),
    }
  }

  #[must_use]
  pub fn identity(&self) -> StackIdentity {
    StackIdentity {
      frames: self.addresses().collect(),
    }
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }

  /// Copy a record's inline frames, skipping the first one, which belongs to
  /// the instrumentation layer rather than the caller.
  #[must_use]
  pub fn materialize(raw: RawFrames<'_>) -> Self {
    Self::from_addresses(raw.iter().skip(1))
  }

  /// Return address of the call that triggered the event, 0 if unknown.
  #[must_use]
  pub fn site(&self) -> u64 {
    self.frames.first().map_or(0, |frame| frame.address)
  }
}

/// Addresses of a call stack, used to fold allocations by their site.
///
/// Two stacks are the same site when they have the same depth and the same
/// address in every frame. Ordering compares depth first, then the
/// allocation-site address, then the frames pairwise.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct StackIdentity {
  frames: Box<[u64]>,
}

impl Ord for StackIdentity {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .depth()
      .cmp(&other.depth())
      .then_with(|| self.site().cmp(&other.site()))
      .then_with(|| self.frames.cmp(&other.frames))
  }
}

impl PartialOrd for StackIdentity {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl StackIdentity {
  #[must_use]
  pub fn depth(&self) -> usize {
    self.frames.len()
  }

  #[must_use]
  pub fn frames(&self) -> &[u64] {
    &self.frames
  }

  #[must_use]
  pub fn site(&self) -> u64 {
    self.frames.first().copied().unwrap_or(0)
  }
}
