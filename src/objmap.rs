use super::*;

/// Fills in the symbolic side of stack frames.
pub trait Symbolizer {
  fn symbolize(&self, frame: &mut FrameDescriptor);
}

/// Binary images loaded in the traced process, keyed by load base.
#[derive(Debug, Clone, Default)]
pub struct ObjectMap {
  objects: BTreeMap<u64, Arc<str>>,
}

impl ObjectMap {
  pub fn entries(&self) -> impl Iterator<Item = (u64, &str)> + '_ {
    self
      .objects
      .iter()
      .map(|(base, path)| (*base, path.as_ref()))
  }

  pub fn insert(&mut self, base: u64, path: impl Into<Arc<str>>) {
    self.objects.insert(base, path.into());
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.objects.is_empty()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.objects.len()
  }

  /// Read an object map file.
  ///
  /// # Errors
  ///
  /// Returns an error if the file cannot be read or an entry is cut short.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, TraceError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|err| TraceError::io(path, err))?;
    let map = Self::parse(&bytes)?;

    info!(path = %path.display(), objects = map.len(), "loaded object map");
    Ok(map)
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Decode `{ base: u64, path_len: u32, path, NUL }` entries until the end
  /// of `bytes`.
  ///
  /// # Errors
  ///
  /// Returns an error if an entry is cut short.
  pub fn parse(bytes: &[u8]) -> Result<Self, TraceError> {
    const HEADER: usize = size_of::<u64>() + size_of::<u32>();

    let mut map = Self::new();
    let mut offset = 0;

    while offset < bytes.len() {
      let truncated = TraceError::ObjectMapTruncated { offset };
      let rest = &bytes[offset..];

      let Some(header) = rest.get(..HEADER) else {
        return Err(truncated);
      };
      let base = LittleEndian::read_u64(&header[..8]);
      let path_len = LittleEndian::read_u32(&header[8..]) as usize;

      let Some(path) = rest.get(HEADER..HEADER + path_len + 1) else {
        return Err(truncated);
      };
      let path = String::from_utf8_lossy(&path[..path_len]).into_owned();

      map.insert(base, path);
      offset += HEADER + path_len + 1;
    }

    Ok(map)
  }

  /// Object containing `address`, as `(path, offset from its base)`.
  #[must_use]
  pub fn resolve(&self, address: u64) -> Option<(&str, u64)> {
    self
      .objects
      .range(..=address)
      .next_back()
      .map(|(base, path)| (path.as_ref(), address - base))
  }
}

impl Symbolizer for ObjectMap {
  fn symbolize(&self, frame: &mut FrameDescriptor) {
    if frame.is_resolved() {
      return;
    }

    if let Some((path, offset)) = self.resolve(frame.address) {
      let name = path.rsplit('/').next().unwrap_or(path);
      frame.symbol = Some(Arc::from(format!("{name}+{offset:#x}")));
      frame.file = Some(Arc::from(path));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(base: u64, path: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&base.to_le_bytes());
    bytes.extend_from_slice(&(path.len() as u32).to_le_bytes());
    bytes.extend_from_slice(path.as_bytes());
    bytes.push(0);
    bytes
  }

  #[test]
  fn parses_entries_until_end() {
    let mut bytes = entry(0x400000, "/usr/bin/target");
    bytes.extend(entry(0x7f00_0000_0000, "/lib/libc.so.6"));

    let map = ObjectMap::parse(&bytes).expect("valid map");
    assert_eq!(
      map.entries().collect::<Vec<_>>(),
      vec![
        (0x400000, "/usr/bin/target"),
        (0x7f00_0000_0000, "/lib/libc.so.6")
      ]
    );
  }

  #[test]
  fn truncated_entry_is_fatal() {
    let mut bytes = entry(0x400000, "/usr/bin/target");
    let second = entry(0x500000, "/lib/libm.so");
    bytes.extend_from_slice(&second[..second.len() - 1]);

    assert!(matches!(
      ObjectMap::parse(&bytes),
      Err(TraceError::ObjectMapTruncated { offset: 28 })
    ));
  }

  #[test]
  fn resolves_to_closest_lower_base() {
    let mut map = ObjectMap::new();
    map.insert(0x1000, "/bin/a");
    map.insert(0x9000, "/lib/b.so");

    assert_eq!(map.resolve(0x1234), Some(("/bin/a", 0x234)));
    assert_eq!(map.resolve(0x9000), Some(("/lib/b.so", 0)));
    assert_eq!(map.resolve(0x0fff), None);
  }

  #[test]
  fn symbolizes_with_object_and_offset() {
    let mut map = ObjectMap::new();
    map.insert(0x1000, "/lib/libfoo.so");

    let mut frame = FrameDescriptor::new(0x1010);
    map.symbolize(&mut frame);
    assert_eq!(frame.symbol.as_deref(), Some("libfoo.so+0x10"));
    assert_eq!(frame.file.as_deref(), Some("/lib/libfoo.so"));

    let mut unknown = FrameDescriptor::new(0x10);
    map.symbolize(&mut unknown);
    assert!(!unknown.is_resolved());
  }
}
