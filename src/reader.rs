use super::*;

/// Lazily decodes the records of a trace buffer.
///
/// Iteration stops at the end-of-trace marker, at the end of the buffer when
/// it falls on a record boundary, or after the first error.
#[derive(Debug, Clone)]
pub struct EventReader<'a> {
  buffer: &'a [u8],
  done: bool,
  offset: usize,
}

impl<'a> EventReader<'a> {
  #[must_use]
  pub fn new(buffer: &'a [u8]) -> Self {
    Self {
      buffer,
      done: false,
      offset: 0,
    }
  }

  /// Offset of the next record to decode.
  #[must_use]
  pub fn offset(&self) -> usize {
    self.offset
  }

  fn decode(&mut self) -> Result<Option<RawEvent<'a>>, TraceError> {
    let start = self.offset;
    let remaining = &self.buffer[start..];

    if remaining.is_empty() {
      return Ok(None);
    }

    let header = take(remaining, HEADER_SIZE, start)?;
    let code = LittleEndian::read_u32(&header[..4]);
    if code == END_OF_TRACE {
      return Ok(None);
    }

    let Some(kind) = EventKind::from_code(code) else {
      return Err(TraceError::UnknownEventKind {
        offset: start,
        kind: code,
      });
    };

    let frame_count = LittleEndian::read_u32(&header[4..]) as usize;
    // An unrepresentable size can never fit in the buffer.
    let record_size = frame_count
      .checked_mul(FRAME_SIZE)
      .and_then(|frames| frames.checked_add(HEADER_SIZE + kind.body_size()))
      .unwrap_or(usize::MAX);
    let record = take(remaining, record_size, start)?;

    let body = &record[HEADER_SIZE..HEADER_SIZE + kind.body_size()];
    let frames = RawFrames::new(&record[HEADER_SIZE + kind.body_size()..]);
    let field = |n: usize| LittleEndian::read_u64(&body[n * 8..n * 8 + 8]);

    let event = match kind {
      EventKind::Allocation => RawEvent::Allocation {
        address: field(0),
        size: field(1),
        frames,
      },
      EventKind::Deallocation => RawEvent::Deallocation {
        address: field(0),
        frames,
      },
      EventKind::Reallocation => RawEvent::Reallocation {
        original: field(0),
        address: field(1),
        size: field(2),
        frames,
      },
    };

    self.offset = start + record_size;
    Ok(Some(event))
  }
}

impl<'a> Iterator for EventReader<'a> {
  type Item = Result<RawEvent<'a>, TraceError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }

    match self.decode() {
      Ok(Some(event)) => Some(Ok(event)),
      Ok(None) => {
        self.done = true;
        None
      }
      Err(err) => {
        self.done = true;
        Some(Err(err))
      }
    }
  }
}

impl std::iter::FusedIterator for EventReader<'_> {}

/// The first `len` bytes of `bytes`, which start at trace offset `offset`.
fn take(bytes: &[u8], len: usize, offset: usize) -> Result<&[u8], TraceError> {
  bytes.get(..len).ok_or(TraceError::Truncated {
    offset,
    needed: len,
    available: bytes.len(),
  })
}
