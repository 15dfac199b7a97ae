use super::*;

/// Controls how traces are reduced and reported.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
  /// Maximum number of frames emitted per site in reports.
  pub max_report_frames: usize,
  /// Exact per-block lifecycle, or one record per allocation call stack.
  pub mode: IndexMode,
  /// Keep freed records and their stacks instead of disposing them.
  pub verbose: bool,
}

impl Default for AnalyzerConfig {
  fn default() -> Self {
    Self {
      max_report_frames: 16,
      mode: IndexMode::Exact,
      verbose: false,
    }
  }
}

impl AnalyzerConfig {
  /// Fold leaks by allocation call stack.
  #[must_use]
  pub fn aggregated(mut self) -> Self {
    self.mode = IndexMode::Aggregated;
    self
  }

  #[must_use]
  pub fn with_max_report_frames(mut self, frames: usize) -> Self {
    self.max_report_frames = frames;
    self
  }

  #[must_use]
  pub fn with_verbose(mut self, verbose: bool) -> Self {
    self.verbose = verbose;
    self
  }
}
