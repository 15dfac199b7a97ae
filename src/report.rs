use super::*;

/// A block, or in aggregated mode a call site, still live at the end of the
/// trace.
#[derive(Debug, Clone, Serialize)]
pub struct LeakEntry {
  pub address: u64,
  pub frames: Vec<FrameDescriptor>,
  pub occurrences: u64,
  pub sequence_id: u64,
  pub site: u64,
  pub size: u64,
}

/// A protocol violation as it appears in the report.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
  pub address: u64,
  pub frames: Vec<FrameDescriptor>,
  pub kind: ErrorKind,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub new_address: Option<u64>,
  pub sequence_id: u64,
  pub site: u64,
  pub size: u64,
}

/// Final view of a reduction: what leaked, what went wrong, and the heap
/// statistics.
///
/// Leaks are in index order: by address in exact mode, by call-stack
/// identity in aggregated mode.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LeakReport {
  errors: Vec<ErrorEntry>,
  leaks: Vec<LeakEntry>,
  mode: IndexMode,
  stats: Statistics,
}

impl LeakReport {
  pub(crate) fn build<S>(
    reducer: &Reducer,
    config: &AnalyzerConfig,
    symbolizer: Option<&S>,
  ) -> Self
  where
    S: Symbolizer + ?Sized,
  {
    let frames = |site: &Site| -> Vec<FrameDescriptor> {
      let Some(stack) = &site.stack else {
        return Vec::new();
      };

      stack
        .frames()
        .iter()
        .take(config.max_report_frames)
        .cloned()
        .map(|mut frame| {
          if let Some(symbolizer) = symbolizer {
            symbolizer.symbolize(&mut frame);
          }
          frame
        })
        .collect()
    };

    let leaks = reducer
      .index()
      .iter()
      .filter(|(_, record)| record.is_live())
      .map(|(_, record)| LeakEntry {
        address: record.address,
        frames: frames(&record.allocation_site),
        occurrences: record.occurrences,
        sequence_id: record.sequence_id,
        site: record.allocation_site.address,
        size: record.size,
      })
      .collect();

    let errors = reducer
      .errors()
      .iter()
      .map(|error| ErrorEntry {
        address: error.address,
        frames: frames(&error.site),
        kind: error.kind,
        new_address: error.new_address,
        sequence_id: error.sequence_id,
        site: error.site.address,
        size: error.size,
      })
      .collect();

    Self {
      errors,
      leaks,
      mode: reducer.mode(),
      stats: *reducer.stats(),
    }
  }

  #[must_use]
  pub fn errors(&self) -> &[ErrorEntry] {
    &self.errors
  }

  /// Serialize the report to JSON using the provided writer.
  ///
  /// # Errors
  ///
  /// Returns an error if serialization to JSON fails.
  pub fn export_json<W: Write>(&self, writer: W) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(writer, self)?;
    Ok(())
  }

  /// Serialize the leaks to the pprof proto format.
  ///
  /// # Errors
  ///
  /// Returns an error if the profile cannot be encoded or written to the
  /// provided writer.
  pub fn export_pprof<W: Write>(
    &self,
    mut writer: W,
  ) -> Result<(), ExportError> {
    let profile = build_pprof_profile(self);
    let mut buffer = Vec::with_capacity(4096);
    profile.encode(&mut buffer)?;
    writer.write_all(&buffer)?;
    Ok(())
  }

  /// True when nothing leaked and no protocol violation was seen.
  #[must_use]
  pub fn is_clean(&self) -> bool {
    self.leaks.is_empty() && self.errors.is_empty()
  }

  /// Leaks sorted by size, largest first.
  #[must_use]
  pub fn largest_leaks(&self) -> Vec<&LeakEntry> {
    let mut leaks: Vec<_> = self.leaks.iter().collect();
    leaks.sort_by(|a, b| {
      b.size.cmp(&a.size).then(a.sequence_id.cmp(&b.sequence_id))
    });
    leaks
  }

  /// Number of leaked blocks, counting every occurrence of a folded site.
  #[must_use]
  pub fn leaked_blocks(&self) -> u64 {
    self.leaks.iter().map(|leak| leak.occurrences).sum()
  }

  #[must_use]
  pub fn leaked_bytes(&self) -> u64 {
    self.leaks.iter().map(|leak| leak.size).sum()
  }

  #[must_use]
  pub fn leaks(&self) -> &[LeakEntry] {
    &self.leaks
  }

  #[must_use]
  pub fn mode(&self) -> IndexMode {
    self.mode
  }

  #[must_use]
  pub fn stats(&self) -> &Statistics {
    &self.stats
  }

  /// Human-readable rendering, leaks first, then errors, then totals.
  ///
  /// # Errors
  ///
  /// Returns an error if the writer fails.
  pub fn write_text<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
    writeln!(
      writer,
      "== {} leaked block(s), {} byte(s) ==",
      self.leaked_blocks(),
      self.leaked_bytes()
    )?;

    for leak in &self.leaks {
      match self.mode {
        IndexMode::Exact => writeln!(
          writer,
          "#{} {:#x}: {} byte(s)",
          leak.sequence_id, leak.address, leak.size
        )?,
        IndexMode::Aggregated => writeln!(
          writer,
          "#{} {} byte(s) in {} block(s), first at {:#x}",
          leak.sequence_id, leak.size, leak.occurrences, leak.address
        )?,
      }
      write_frames(&mut writer, leak.site, &leak.frames)?;
    }

    if !self.errors.is_empty() {
      writeln!(writer, "== {} error(s) ==", self.errors.len())?;
    }

    for error in &self.errors {
      match error.new_address {
        Some(new_address) => writeln!(
          writer,
          "#{} {} {:#x} -> {:#x} ({} byte(s))",
          error.sequence_id, error.kind, error.address, new_address, error.size
        )?,
        None => writeln!(
          writer,
          "#{} {} {:#x}",
          error.sequence_id, error.kind, error.address
        )?,
      }
      write_frames(&mut writer, error.site, &error.frames)?;
    }

    let extent = &self.stats.extent;
    writeln!(
      writer,
      "live: {} byte(s), peak: {} byte(s)",
      extent.bytes_live, extent.bytes_live_peak
    )?;

    if let (Some(lowest), Some(highest)) = (extent.lowest(), extent.highest()) {
      writeln!(
        writer,
        "heap: {lowest:#x}..{highest:#x} ({} byte(s))",
        extent.span()
      )?;
    }

    Ok(())
  }
}

fn write_frames<W: Write>(
  writer: &mut W,
  site: u64,
  frames: &[FrameDescriptor],
) -> io::Result<()> {
  if frames.is_empty() {
    return writeln!(writer, "    at {site:#x}");
  }

  for frame in frames {
    match (&frame.symbol, &frame.file) {
      (Some(symbol), Some(file)) => {
        writeln!(writer, "    at {:#x} {symbol} ({file})", frame.address)?
      }
      (Some(symbol), None) => {
        writeln!(writer, "    at {:#x} {symbol}", frame.address)?
      }
      _ => writeln!(writer, "    at {:#x}", frame.address)?,
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::stack;

  fn analyzer(config: AnalyzerConfig, events: Vec<TraceEvent>) -> Analyzer {
    let mut analyzer = Analyzer::with_config(config);
    for event in events {
      analyzer.record_event(event);
    }
    analyzer
  }

  fn scenario() -> Vec<TraceEvent> {
    vec![
      TraceEvent::allocation(0x1000, 16, stack(&[0xf1])),
      TraceEvent::allocation(0x2000, 32, stack(&[0xf2, 0xf20])),
      TraceEvent::deallocation(0x1000, stack(&[0xf3])),
    ]
  }

  #[test]
  fn reports_leaks_separately_from_errors() {
    let mut events = scenario();
    events.push(TraceEvent::deallocation(0x3000, stack(&[0xf4])));

    let report = analyzer(AnalyzerConfig::default(), events).report();
    assert_eq!(report.leaks().len(), 1);
    assert_eq!(report.leaks()[0].address, 0x2000);
    assert_eq!(report.leaks()[0].site, 0xf2);
    assert_eq!(report.errors().len(), 1);
    assert_eq!(report.errors()[0].kind, ErrorKind::UntrackedFree);
    assert!(!report.is_clean());
  }

  #[test]
  fn frames_are_capped() {
    let config = AnalyzerConfig::default().with_max_report_frames(1);
    let report = analyzer(config, scenario()).report();

    let frames = &report.leaks()[0].frames;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].address, 0xf2);
  }

  #[test]
  fn symbolizer_resolves_report_frames() {
    let mut objects = ObjectMap::new();
    objects.insert(0xf0, "/bin/app");

    let report = analyzer(AnalyzerConfig::default(), scenario())
      .report_with(&objects);
    let frame = &report.leaks()[0].frames[0];
    assert_eq!(frame.symbol.as_deref(), Some("app+0x2"));
  }

  #[test]
  fn aggregated_report_counts_blocks() {
    let events = vec![
      TraceEvent::allocation(0x10, 8, stack(&[0x1])),
      TraceEvent::allocation(0x20, 8, stack(&[0x1])),
      TraceEvent::allocation(0x30, 100, stack(&[0x2])),
    ];

    let report =
      analyzer(AnalyzerConfig::default().aggregated(), events).report();
    assert_eq!(report.mode(), IndexMode::Aggregated);
    assert_eq!(report.leaks().len(), 2);
    assert_eq!(report.leaked_blocks(), 3);
    assert_eq!(report.leaked_bytes(), 116);
    assert_eq!(report.largest_leaks()[0].site, 0x2);
  }

  #[test]
  fn text_report_lists_leaks_errors_and_totals() {
    let mut events = scenario();
    events.push(TraceEvent::deallocation(0x3000, stack(&[0xf4])));
    let report = analyzer(AnalyzerConfig::default(), events).report();

    let mut out = Vec::new();
    report.write_text(&mut out).expect("write text");
    let text = String::from_utf8(out).expect("utf8");

    assert!(text.contains("== 1 leaked block(s), 32 byte(s) =="), "{text}");
    assert!(text.contains("0x2000: 32 byte(s)"), "{text}");
    assert!(text.contains("free of untracked address 0x3000"), "{text}");
    assert!(text.contains("live: 32 byte(s), peak: 48 byte(s)"), "{text}");
    assert!(text.contains("heap: 0x1000..0x2020"), "{text}");
  }

  #[test]
  fn json_report_has_leaks_errors_and_stats() {
    let report = analyzer(AnalyzerConfig::default(), scenario()).report();

    let mut out = Vec::new();
    report.export_json(&mut out).expect("export json");
    let value: serde_json::Value =
      serde_json::from_slice(&out).expect("valid json");

    assert_eq!(value["mode"], "exact");
    assert_eq!(value["leaks"][0]["address"], 0x2000);
    assert_eq!(value["leaks"][0]["frames"][0]["address"], 0xf2);
    assert!(value["leaks"][0]["frames"][0].get("symbol").is_none());
    assert_eq!(value["errors"].as_array().map(Vec::len), Some(0));
    assert_eq!(value["stats"]["extent"]["bytes_live_peak"], 48);
  }
}
