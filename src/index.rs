use super::*;

/// Selects how records are keyed, and therefore how they are folded.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
  /// One record per block, keyed by address.
  #[default]
  Exact,
  /// One record per allocation call stack.
  Aggregated,
}

impl IndexMode {
  #[must_use]
  pub fn key_for(self, address: u64, stack: &CallStack) -> IndexKey {
    match self {
      Self::Exact => IndexKey::Address(address),
      Self::Aggregated => IndexKey::Stack(stack.identity()),
    }
  }
}

/// Key of an index entry. A given index only ever holds one variant.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum IndexKey {
  Address(u64),
  Stack(StackIdentity),
}

/// Ordered index of allocation records.
///
/// Records live in an arena and are addressed by [`RecordId`]. Every key maps
/// to the head of a doubly linked chain holding all records sharing that key,
/// most recently inserted first.
#[derive(Debug, Default)]
pub struct AllocationIndex {
  entries: BTreeMap<IndexKey, RecordId>,
  len: usize,
  mode: IndexMode,
  slots: Vec<Option<AllocationRecord>>,
  vacant: Vec<RecordId>,
}

impl AllocationIndex {
  /// Walk the chain stored under `key`, most recent record first.
  pub fn chain(
    &self,
    key: &IndexKey,
  ) -> impl Iterator<Item = (RecordId, &AllocationRecord)> + '_ {
    self.walk(self.find_exact(key), |record| record.links.chain_next)
  }

  /// Head of the chain stored under `key`.
  #[must_use]
  pub fn find_exact(&self, key: &IndexKey) -> Option<RecordId> {
    self.entries.get(key).copied()
  }

  #[must_use]
  pub fn get(&self, id: RecordId) -> Option<&AllocationRecord> {
    self.slots.get(id.0).and_then(Option::as_ref)
  }

  pub fn get_mut(&mut self, id: RecordId) -> Option<&mut AllocationRecord> {
    self.slots.get_mut(id.0).and_then(Option::as_mut)
  }

  /// Insert a record under `key`. When the key is already present the record
  /// becomes the new head of its chain.
  pub fn insert(
    &mut self,
    key: IndexKey,
    record: AllocationRecord,
  ) -> RecordId {
    let id = self.store(record);

    match self.entries.entry(key) {
      btree_map::Entry::Vacant(entry) => {
        entry.insert(id);
      }
      btree_map::Entry::Occupied(mut entry) => {
        let head = *entry.get();

        if let Some(Some(previous)) = self.slots.get_mut(head.0) {
          previous.links.chain_prev = Some(id);
        }
        if let Some(Some(record)) = self.slots.get_mut(id.0) {
          record.links.chain_next = Some(head);
        }

        entry.insert(id);
      }
    }

    id
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Every record in key order, chains most recent first.
  pub fn iter(
    &self,
  ) -> impl Iterator<Item = (RecordId, &AllocationRecord)> + '_ {
    self.entries.values().flat_map(move |head| {
      self.walk(Some(*head), |record| record.links.chain_next)
    })
  }

  /// Key under which `record` is stored.
  #[must_use]
  pub fn key_of(&self, record: &AllocationRecord) -> IndexKey {
    match self.mode {
      IndexMode::Exact => IndexKey::Address(record.address),
      IndexMode::Aggregated => IndexKey::Stack(
        record
          .allocation_site
          .stack
          .as_ref()
          .map(CallStack::identity)
          .unwrap_or_else(|| CallStack::default().identity()),
      ),
    }
  }

  /// Number of distinct keys.
  #[must_use]
  pub fn key_count(&self) -> usize {
    self.entries.len()
  }

  /// Number of records, chained ones included.
  #[must_use]
  pub fn len(&self) -> usize {
    self.len
  }

  /// Walk the reallocation history of `id` backwards, starting with `id`.
  pub fn lineage(
    &self,
    id: RecordId,
  ) -> impl Iterator<Item = (RecordId, &AllocationRecord)> + '_ {
    self.walk(Some(id), |record| record.links.lineage_prev)
  }

  #[must_use]
  pub fn mode(&self) -> IndexMode {
    self.mode
  }

  #[must_use]
  pub fn new(mode: IndexMode) -> Self {
    Self {
      mode,
      ..Self::default()
    }
  }

  /// Drop the entry for `key` together with every record in its chain.
  pub fn remove(&mut self, key: &IndexKey) -> Vec<AllocationRecord> {
    let mut removed = Vec::new();
    let mut cursor = self.entries.remove(key);

    while let Some(id) = cursor {
      let Some(record) = self.release(id) else {
        break;
      };
      cursor = record.links.chain_next;
      removed.push(record);
    }

    removed
  }

  /// Detach a single record from its chain, dropping the key when the chain
  /// becomes empty.
  pub fn unlink(&mut self, id: RecordId) -> Option<AllocationRecord> {
    let record = self.get(id)?;
    let Links {
      chain_next,
      chain_prev,
      ..
    } = record.links;

    match chain_prev {
      Some(prev) => {
        if let Some(previous) = self.get_mut(prev) {
          previous.links.chain_next = chain_next;
        }
      }
      None => {
        let key = self.key_of(record);
        match chain_next {
          Some(next) => {
            self.entries.insert(key, next);
          }
          None => {
            self.entries.remove(&key);
          }
        }
      }
    }

    if let Some(next) = chain_next.and_then(|next| self.get_mut(next)) {
      next.links.chain_prev = chain_prev;
    }

    self.release(id)
  }

  /// Empty an arena slot, clearing lineage links that point at it.
  fn release(&mut self, id: RecordId) -> Option<AllocationRecord> {
    let record = self.slots.get_mut(id.0)?.take()?;

    if let Some(prev) = record.links.lineage_prev.and_then(|p| self.get_mut(p))
    {
      prev.links.lineage_next = None;
    }
    if let Some(next) = record.links.lineage_next.and_then(|n| self.get_mut(n))
    {
      next.links.lineage_prev = None;
    }

    self.vacant.push(id);
    self.len -= 1;
    Some(record)
  }

  fn store(&mut self, mut record: AllocationRecord) -> RecordId {
    record.links.chain_next = None;
    record.links.chain_prev = None;
    self.len += 1;

    match self.vacant.pop() {
      Some(id) => {
        self.slots[id.0] = Some(record);
        id
      }
      None => {
        self.slots.push(Some(record));
        RecordId(self.slots.len() - 1)
      }
    }
  }

  fn walk<F>(
    &self,
    start: Option<RecordId>,
    next: F,
  ) -> impl Iterator<Item = (RecordId, &AllocationRecord)> + '_
  where
    F: Fn(&AllocationRecord) -> Option<RecordId> + 'static,
  {
    let mut cursor = start;

    std::iter::from_fn(move || {
      let id = cursor?;
      let record = self.get(id)?;
      cursor = next(record);
      Some((id, record))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(address: u64, size: u64, sequence_id: u64) -> AllocationRecord {
    AllocationRecord::new(
      address,
      size,
      sequence_id,
      CallStack::from_addresses([0x400 + sequence_id]),
    )
  }

  fn sizes_at(index: &AllocationIndex, address: u64) -> Vec<u64> {
    index
      .chain(&IndexKey::Address(address))
      .map(|(_, record)| record.size)
      .collect()
  }

  #[test]
  fn equal_keys_chain_most_recent_first() {
    let mut index = AllocationIndex::new(IndexMode::Exact);
    index.insert(IndexKey::Address(0x10), record(0x10, 1, 0));
    index.insert(IndexKey::Address(0x10), record(0x10, 2, 1));
    let latest = index.insert(IndexKey::Address(0x10), record(0x10, 3, 2));

    assert_eq!(index.key_count(), 1);
    assert_eq!(index.len(), 3);
    assert_eq!(index.find_exact(&IndexKey::Address(0x10)), Some(latest));
    assert_eq!(sizes_at(&index, 0x10), vec![3, 2, 1]);
  }

  #[test]
  fn iterates_in_address_order() {
    let mut index = AllocationIndex::new(IndexMode::Exact);
    for (seq, address) in [0x30, 0x10, 0x20].into_iter().enumerate() {
      index.insert(IndexKey::Address(address), record(address, 1, seq as u64));
    }

    let addresses: Vec<_> = index.iter().map(|(_, r)| r.address).collect();
    assert_eq!(addresses, vec![0x10, 0x20, 0x30]);
  }

  #[test]
  fn unlinking_middle_of_chain_keeps_anchor() {
    let mut index = AllocationIndex::new(IndexMode::Exact);
    index.insert(IndexKey::Address(0x10), record(0x10, 1, 0));
    let middle = index.insert(IndexKey::Address(0x10), record(0x10, 2, 1));
    let head = index.insert(IndexKey::Address(0x10), record(0x10, 3, 2));

    let removed = index.unlink(middle).expect("middle record");
    assert_eq!(removed.size, 2);
    assert_eq!(index.find_exact(&IndexKey::Address(0x10)), Some(head));
    assert_eq!(sizes_at(&index, 0x10), vec![3, 1]);
  }

  #[test]
  fn unlinking_head_promotes_next_then_drops_key() {
    let mut index = AllocationIndex::new(IndexMode::Exact);
    let older = index.insert(IndexKey::Address(0x10), record(0x10, 1, 0));
    let head = index.insert(IndexKey::Address(0x10), record(0x10, 2, 1));

    index.unlink(head);
    assert_eq!(index.find_exact(&IndexKey::Address(0x10)), Some(older));

    index.unlink(older);
    assert_eq!(index.find_exact(&IndexKey::Address(0x10)), None);
    assert!(index.is_empty());
    assert!(index.unlink(older).is_none());
  }

  #[test]
  fn remove_drops_whole_chain() {
    let mut index = AllocationIndex::new(IndexMode::Exact);
    index.insert(IndexKey::Address(0x10), record(0x10, 1, 0));
    index.insert(IndexKey::Address(0x10), record(0x10, 2, 1));
    index.insert(IndexKey::Address(0x20), record(0x20, 4, 2));

    let removed = index.remove(&IndexKey::Address(0x10));
    assert_eq!(removed.len(), 2);
    assert_eq!(index.len(), 1);
    assert_eq!(index.key_count(), 1);
  }

  #[test]
  fn released_slots_are_reused_without_stale_links() {
    let mut index = AllocationIndex::new(IndexMode::Exact);
    let first = index.insert(IndexKey::Address(0x10), record(0x10, 1, 0));
    index.unlink(first);

    let second = index.insert(IndexKey::Address(0x20), record(0x20, 2, 1));
    assert_eq!(first, second);
    assert_eq!(sizes_at(&index, 0x20), vec![2]);
    assert!(index.chain(&IndexKey::Address(0x10)).next().is_none());
  }

  #[test]
  fn aggregated_keys_use_stack_identity() {
    let mut index = AllocationIndex::new(IndexMode::Aggregated);
    let stack = CallStack::from_addresses([0x1, 0x2]);
    let key = index.mode().key_for(0x9999, &stack);
    let id =
      index.insert(key, AllocationRecord::new(0x10, 8, 0, stack.clone()));

    let record = index.get(id).expect("record");
    assert_eq!(index.key_of(record), IndexMode::Aggregated.key_for(0, &stack));
    assert_eq!(index.find_exact(&IndexKey::Stack(stack.identity())), Some(id));
  }
}
