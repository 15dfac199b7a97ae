use super::*;

/// Thin builder that customizes `AnalyzerConfig` without exposing all knobs
/// up front.
#[derive(Debug, Default)]
pub struct AnalyzerBuilder {
  config: AnalyzerConfig,
}

impl AnalyzerBuilder {
  #[must_use]
  pub fn aggregate(mut self, aggregate: bool) -> Self {
    self.config.mode = if aggregate {
      IndexMode::Aggregated
    } else {
      IndexMode::Exact
    };
    self
  }

  #[must_use]
  pub fn finish(self) -> Analyzer {
    Analyzer::with_config(self.config)
  }

  #[must_use]
  pub fn max_report_frames(mut self, frames: usize) -> Self {
    self.config.max_report_frames = frames;
    self
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn verbose(mut self, verbose: bool) -> Self {
    self.config.verbose = verbose;
    self
  }

  #[must_use]
  pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
    self.config = config;
    self
  }
}

/// Entry point for reducing traces and producing leak reports.
///
/// Traces are reduced into the same state in the order they are loaded, so
/// several files from one run can be analysed together.
#[derive(Debug)]
pub struct Analyzer {
  config: AnalyzerConfig,
  reducer: Reducer,
}

impl Default for Analyzer {
  fn default() -> Self {
    Self::new()
  }
}

impl Analyzer {
  #[must_use]
  pub fn builder() -> AnalyzerBuilder {
    AnalyzerBuilder::new()
  }

  #[must_use]
  pub fn config(&self) -> &AnalyzerConfig {
    &self.config
  }

  /// Reduce an in-memory trace buffer.
  ///
  /// # Errors
  ///
  /// Returns an error if the buffer holds a malformed record.
  pub fn ingest_bytes(&mut self, bytes: &[u8]) -> Result<u64, TraceError> {
    self.reducer.ingest_bytes(bytes)
  }

  /// Map a trace file and reduce it, returning the number of events applied.
  ///
  /// # Errors
  ///
  /// Returns an error if the file cannot be opened or mapped, or if it holds
  /// a malformed record.
  pub fn load_trace(
    &mut self,
    path: impl AsRef<Path>,
  ) -> Result<u64, TraceError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|err| TraceError::io(path, err))?;
    let len = file
      .metadata()
      .map_err(|err| TraceError::io(path, err))?
      .len();

    if len == 0 {
      info!(path = %path.display(), "trace is empty");
      return Ok(0);
    }

    // SAFETY: the mapping is read-only and dropped before returning. The
    // trace is a finished artifact that nothing writes to while we read it.
    let map =
      unsafe { Mmap::map(&file) }.map_err(|err| TraceError::io(path, err))?;

    let events = self.reducer.ingest_bytes(&map)?;

    let stats = self.reducer.stats();
    info!(
      path = %path.display(),
      events,
      bytes_live = stats.extent.bytes_live,
      errors = self.reducer.errors().len(),
      "reduced trace"
    );

    Ok(events)
  }

  #[must_use]
  pub fn new() -> Self {
    Self::with_config(AnalyzerConfig::default())
  }

  /// Feed a pre-built event directly into the reducer.
  pub fn record_event(&mut self, event: TraceEvent) {
    self.reducer.apply(event);
  }

  #[must_use]
  pub fn reducer(&self) -> &Reducer {
    &self.reducer
  }

  /// Report over the current state, with unresolved frames.
  #[must_use]
  pub fn report(&self) -> LeakReport {
    LeakReport::build(&self.reducer, &self.config, None::<&ObjectMap>)
  }

  /// Report over the current state, resolving frames with `symbolizer`.
  #[must_use]
  pub fn report_with<S>(&self, symbolizer: &S) -> LeakReport
  where
    S: Symbolizer + ?Sized,
  {
    LeakReport::build(&self.reducer, &self.config, Some(symbolizer))
  }

  #[must_use]
  pub fn with_config(config: AnalyzerConfig) -> Self {
    let reducer = Reducer::new(config.mode, config.verbose);
    Self { config, reducer }
  }
}
