use super::*;

/// What the index knows about an address right now.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Lookup {
  Freed(RecordId),
  Live(RecordId),
  Untracked,
}

/// Applies trace events, in order, to an [`AllocationIndex`].
///
/// Protocol violations never interrupt the reduction: they are collected as
/// [`ErrorRecord`]s and leave the index and statistics untouched.
#[derive(Debug)]
pub struct Reducer {
  errors: Vec<ErrorRecord>,
  index: AllocationIndex,
  next_sequence: u64,
  stats: Statistics,
  verbose: bool,
}

impl Reducer {
  pub fn apply(&mut self, event: TraceEvent) {
    trace!(?event, "applying event");

    match event {
      TraceEvent::Allocation {
        address,
        size,
        stack,
      } => {
        self.on_allocation(address, size, stack);
      }
      TraceEvent::Deallocation { address, stack } => {
        self.on_deallocation(address, stack);
      }
      TraceEvent::Reallocation {
        original,
        address,
        size,
        stack,
      } => self.on_reallocation(original, address, size, stack),
    }
  }

  #[must_use]
  pub fn errors(&self) -> &[ErrorRecord] {
    &self.errors
  }

  #[must_use]
  pub fn index(&self) -> &AllocationIndex {
    &self.index
  }

  pub fn ingest<I>(&mut self, events: I)
  where
    I: IntoIterator<Item = TraceEvent>,
  {
    for event in events {
      self.apply(event);
    }
  }

  /// Decode and apply every record of a trace buffer, returning how many
  /// events were applied.
  ///
  /// # Errors
  ///
  /// Returns an error if the buffer holds a malformed record. Events decoded
  /// before the bad record have already been applied.
  pub fn ingest_bytes(&mut self, bytes: &[u8]) -> Result<u64, TraceError> {
    let mut applied = 0_u64;

    for event in EventReader::new(bytes) {
      self.apply(TraceEvent::from(event?));
      applied += 1;
    }

    Ok(applied)
  }

  /// Latest record holding `address`, whatever its state.
  #[must_use]
  pub fn latest_at(&self, address: u64) -> Option<&AllocationRecord> {
    let head = self.index.find_exact(&IndexKey::Address(address))?;
    self.index.get(head)
  }

  /// Live block starting at `address`, if any.
  #[must_use]
  pub fn live_at(&self, address: u64) -> Option<&AllocationRecord> {
    match self.lookup(address) {
      Lookup::Live(id) => self.index.get(id),
      Lookup::Freed(_) | Lookup::Untracked => None,
    }
  }

  #[must_use]
  pub fn mode(&self) -> IndexMode {
    self.index.mode()
  }

  #[must_use]
  pub fn new(mode: IndexMode, verbose: bool) -> Self {
    Self {
      errors: Vec::new(),
      index: AllocationIndex::new(mode),
      next_sequence: 0,
      stats: Statistics::default(),
      verbose,
    }
  }

  #[must_use]
  pub fn stats(&self) -> &Statistics {
    &self.stats
  }

  /// Remove `id` and every record it was reallocated from.
  fn dispose_lineage(&mut self, id: RecordId) {
    let lineage: Vec<RecordId> =
      self.index.lineage(id).map(|(id, _)| id).collect();

    for id in &lineage {
      self.index.unlink(*id);
    }

    debug!(records = lineage.len(), "disposed freed lineage");
  }

  /// Classify `address` by the most recent record stored under it. A record
  /// that was reallocated away no longer owns its address.
  fn lookup(&self, address: u64) -> Lookup {
    let Some(head) = self.index.find_exact(&IndexKey::Address(address)) else {
      return Lookup::Untracked;
    };

    match self.index.get(head).map(|record| record.state) {
      Some(BlockState::Live) => Lookup::Live(head),
      Some(BlockState::Freed) => Lookup::Freed(head),
      Some(BlockState::Reallocated) | None => Lookup::Untracked,
    }
  }

  fn next_sequence(&mut self) -> u64 {
    let sequence = self.next_sequence;
    self.next_sequence += 1;
    sequence
  }

  fn on_allocation(
    &mut self,
    address: u64,
    size: u64,
    stack: CallStack,
  ) -> RecordId {
    self.stats.on_allocation(address, size);

    let key = self.index.mode().key_for(address, &stack);

    if self.index.mode() == IndexMode::Aggregated {
      if let Some(id) = self.index.find_exact(&key) {
        if let Some(record) = self.index.get_mut(id) {
          record.size = record.size.saturating_add(size);
          record.occurrences = record.occurrences.saturating_add(1);
          return id;
        }
      }
    }

    let sequence = self.next_sequence();
    self
      .index
      .insert(key, AllocationRecord::new(address, size, sequence, stack))
  }

  fn on_deallocation(&mut self, address: u64, stack: CallStack) {
    if self.index.mode() == IndexMode::Aggregated {
      debug!(address, "ignoring deallocation in aggregated mode");
      return;
    }

    let id = match self.lookup(address) {
      Lookup::Live(id) => id,
      Lookup::Freed(_) => {
        self.push_error(ErrorKind::DoubleFree, address, None, 0, stack);
        return;
      }
      Lookup::Untracked => {
        self.push_error(ErrorKind::UntrackedFree, address, None, 0, stack);
        return;
      }
    };

    let verbose = self.verbose;
    let Some(record) = self.index.get_mut(id) else {
      return;
    };

    record.state = BlockState::Freed;
    record.free_site = Some(if verbose {
      Site::new(stack)
    } else {
      Site::without_stack(stack.site())
    });

    let size = record.size;
    self.stats.on_deallocation(size);

    if !verbose {
      self.dispose_lineage(id);
    }
  }

  fn on_reallocation(
    &mut self,
    original: u64,
    address: u64,
    size: u64,
    stack: CallStack,
  ) {
    if original == 0 {
      self.on_allocation(address, size, stack);
      return;
    }

    if self.index.mode() == IndexMode::Aggregated {
      if address == 0 {
        debug!(original, "ignoring null reallocation in aggregated mode");
      } else {
        self.on_allocation(address, size, stack);
      }
      return;
    }

    let new_address = (address != 0).then_some(address);
    let old = match self.lookup(original) {
      Lookup::Live(id) => id,
      Lookup::Freed(_) => {
        self.push_error(
          ErrorKind::ReallocAfterFree,
          original,
          new_address,
          size,
          stack,
        );
        return;
      }
      Lookup::Untracked => {
        self.push_error(
          ErrorKind::UntrackedRealloc,
          original,
          new_address,
          size,
          stack,
        );
        return;
      }
    };

    if address == 0 {
      if size == 0 {
        self.on_deallocation(original, stack);
      } else {
        debug!(original, size, "reallocation failed, block left in place");
      }
      return;
    }

    let Some(record) = self.index.get_mut(old) else {
      return;
    };
    record.state = BlockState::Reallocated;
    let old_size = record.size;
    self.stats.on_reallocation(old_size);

    let new = self.on_allocation(address, size, stack);
    if let Some(record) = self.index.get_mut(new) {
      record.links.lineage_prev = Some(old);
    }
    if let Some(record) = self.index.get_mut(old) {
      record.links.lineage_next = Some(new);
    }
  }

  fn push_error(
    &mut self,
    kind: ErrorKind,
    address: u64,
    new_address: Option<u64>,
    size: u64,
    stack: CallStack,
  ) {
    debug!(%kind, address, "protocol violation");

    let sequence_id = self.next_sequence();
    self.errors.push(ErrorRecord {
      address,
      kind,
      new_address,
      sequence_id,
      site: Site::new(stack),
      size,
    });
  }
}
