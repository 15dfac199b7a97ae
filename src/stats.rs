use super::*;

/// Live memory and the address range touched by every observed block.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct HeapExtent {
  pub bytes_live: u64,
  pub bytes_live_peak: u64,
  pub highest_address_plus_size: u64,
  pub lowest_address: u64,
  observed: bool,
}

impl Serialize for HeapExtent {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut state = serializer.serialize_struct("HeapExtent", 5)?;
    state.serialize_field("bytes_live", &self.bytes_live)?;
    state.serialize_field("bytes_live_peak", &self.bytes_live_peak)?;
    state.serialize_field("lowest_address", &self.lowest())?;
    state.serialize_field("highest_address", &self.highest())?;
    state.serialize_field("span", &self.span())?;
    state.end()
  }
}

impl HeapExtent {
  /// Exclusive end of the highest block, if any block was observed.
  #[must_use]
  pub fn highest(&self) -> Option<u64> {
    self.observed.then_some(self.highest_address_plus_size)
  }

  #[must_use]
  pub fn lowest(&self) -> Option<u64> {
    self.observed.then_some(self.lowest_address)
  }

  pub(crate) fn on_allocation(&mut self, address: u64, size: u64) {
    self.bytes_live = self.bytes_live.saturating_add(size);
    self.bytes_live_peak = self.bytes_live_peak.max(self.bytes_live);

    let end = address.saturating_add(size);
    if self.observed {
      self.lowest_address = self.lowest_address.min(address);
      self.highest_address_plus_size = self.highest_address_plus_size.max(end);
    } else {
      self.lowest_address = address;
      self.highest_address_plus_size = end;
      self.observed = true;
    }
  }

  pub(crate) fn on_release(&mut self, size: u64) {
    self.bytes_live = self.bytes_live.saturating_sub(size);
  }

  #[must_use]
  pub fn span(&self) -> u64 {
    self
      .highest_address_plus_size
      .saturating_sub(self.lowest_address)
  }
}

/// Event counters gathered alongside the heap extent.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct EventTotals {
  pub allocations: u64,
  pub deallocations: u64,
  pub reallocations: u64,
  pub total_allocated: u64,
  pub total_freed: u64,
}

/// Running statistics, mutated only by the reducer.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct Statistics {
  pub extent: HeapExtent,
  pub totals: EventTotals,
}

impl Statistics {
  pub(crate) fn on_allocation(&mut self, address: u64, size: u64) {
    self.extent.on_allocation(address, size);
    self.totals.allocations = self.totals.allocations.saturating_add(1);
    self.totals.total_allocated =
      self.totals.total_allocated.saturating_add(size);
  }

  pub(crate) fn on_deallocation(&mut self, size: u64) {
    self.extent.on_release(size);
    self.totals.deallocations = self.totals.deallocations.saturating_add(1);
    self.totals.total_freed = self.totals.total_freed.saturating_add(size);
  }

  /// Account for the old block of a successful reallocation. The new block
  /// goes through `on_allocation`.
  pub(crate) fn on_reallocation(&mut self, old_size: u64) {
    self.extent.on_release(old_size);
    self.totals.reallocations = self.totals.reallocations.saturating_add(1);
    self.totals.total_freed = self.totals.total_freed.saturating_add(old_size);
  }
}
