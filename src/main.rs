use {
  clap::{Parser, ValueEnum},
  leakdump::{Analyzer, AnalyzerConfig, ExportError, LeakReport, ObjectMap},
  std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
  },
  tracing::{error, warn},
  tracing_subscriber::EnvFilter,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
  Text,
  Json,
  Pprof,
}

/// Report leaked blocks, peak usage and protocol errors from allocation
/// traces.
#[derive(Debug, Parser)]
#[command(name = "leakdump", version)]
struct Arguments {
  /// Fold leaks by allocation call stack instead of listing every block.
  #[arg(long)]
  aggregate: bool,
  #[arg(long, value_enum, default_value_t = Format::Text)]
  format: Format,
  /// Maximum number of frames printed per site.
  #[arg(long, default_value_t = 16)]
  max_frames: usize,
  /// Object map describing loaded binaries and their load addresses.
  #[arg(long)]
  objects: Option<PathBuf>,
  /// Write the report here instead of stdout.
  #[arg(long, short)]
  output: Option<PathBuf>,
  /// Trace files, reduced in the order given.
  #[arg(required = true)]
  traces: Vec<PathBuf>,
  /// More log output on stderr.
  #[arg(long, short, action = clap::ArgAction::Count)]
  verbose: u8,
  /// Keep freed blocks and their stacks for the whole run.
  #[arg(long)]
  verbose_retention: bool,
}

impl Arguments {
  fn config(&self) -> AnalyzerConfig {
    let config = AnalyzerConfig::default()
      .with_verbose(self.verbose_retention)
      .with_max_report_frames(self.max_frames);

    if self.aggregate {
      config.aggregated()
    } else {
      config
    }
  }
}

fn init_logging(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };

  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

fn emit(report: &LeakReport, arguments: &Arguments) -> Result<(), ExportError> {
  let writer: Box<dyn Write> = match &arguments.output {
    Some(path) => Box::new(File::create(path)?),
    None => Box::new(io::stdout().lock()),
  };
  let mut writer = BufWriter::new(writer);

  match arguments.format {
    Format::Text => report.write_text(&mut writer)?,
    Format::Json => report.export_json(&mut writer)?,
    Format::Pprof => report.export_pprof(&mut writer)?,
  }

  writer.flush()?;
  Ok(())
}

fn main() -> ExitCode {
  let arguments = Arguments::parse();
  init_logging(arguments.verbose);

  let mut analyzer = Analyzer::with_config(arguments.config());

  for trace in &arguments.traces {
    if let Err(err) = analyzer.load_trace(trace) {
      error!(%err, "trace is unusable, no report produced");
      return ExitCode::FAILURE;
    }
  }

  let report = match &arguments.objects {
    Some(path) => match ObjectMap::load(path) {
      Ok(objects) => analyzer.report_with(&objects),
      Err(err) => {
        error!(%err, "object map is unusable");
        return ExitCode::FAILURE;
      }
    },
    None => analyzer.report(),
  };

  if !report.errors().is_empty() {
    warn!(errors = report.errors().len(), "trace has protocol errors");
  }

  if let Err(err) = emit(&report, &arguments) {
    error!(%err, "failed to write report");
    return ExitCode::FAILURE;
  }

  if report.is_clean() {
    ExitCode::SUCCESS
  } else {
    ExitCode::from(2)
  }
}
