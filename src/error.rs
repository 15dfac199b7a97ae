use super::*;

/// Conditions that make a trace or object map unusable.
///
/// Any of these aborts the whole run: a partially decoded trace cannot be
/// trusted to produce a meaningful leak report.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
  #[error("failed to read {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error(
    "record at offset {offset} needs {needed} bytes but only {available} remain"
  )]
  Truncated {
    offset: usize,
    needed: usize,
    available: usize,
  },
  #[error("unknown event kind {kind} at offset {offset}")]
  UnknownEventKind { offset: usize, kind: u32 },
  #[error("object map entry at offset {offset} is truncated")]
  ObjectMapTruncated { offset: usize },
}

impl TraceError {
  pub(crate) fn io(path: &Path, source: io::Error) -> Self {
    Self::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Errors that can occur when exporting a report.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
  #[error("failed to encode report as pprof: {0}")]
  Encode(#[from] prost::EncodeError),
  #[error("i/o error during export: {0}")]
  Io(#[from] io::Error),
  #[error("failed to encode report as json: {0}")]
  Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn io_error_names_the_file() {
    let err = TraceError::io(
      Path::new("/tmp/ml.trace"),
      io::Error::new(io::ErrorKind::NotFound, "gone"),
    );

    let message = err.to_string();
    assert!(message.contains("/tmp/ml.trace"), "{message}");
    assert!(message.contains("gone"), "{message}");
  }

  #[test]
  fn truncation_reports_sizes() {
    let err = TraceError::Truncated {
      offset: 24,
      needed: 16,
      available: 3,
    };

    assert_eq!(
      err.to_string(),
      "record at offset 24 needs 16 bytes but only 3 remain"
    );
  }
}
