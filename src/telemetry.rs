use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::SystemConfig;

/// Guard for the non-blocking file writer; must stay alive for the
/// process lifetime or buffered log lines are dropped on exit.
pub struct TelemetryGuard {
  _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize tracing from the system config: `log_level` seeds the default
/// filter (RUST_LOG still wins) and `log_file` adds a plain-text file layer.
pub fn init(system: &SystemConfig) -> TelemetryGuard {
  let default_level = if system.log_level.is_empty() {
    "info"
  } else {
    system.log_level.as_str()
  };

  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(default_level))
    .add_directive("hyper=warn".parse().expect("valid directive"))
    .add_directive("reqwest=warn".parse().expect("valid directive"));

  let stdout_layer = fmt::layer().with_target(true);

  let registry = tracing_subscriber::registry().with(filter).with(stdout_layer);

  let mut file_guard = None;
  if let Some(log_file) = &system.log_file {
    let dir = log_file.parent().unwrap_or_else(|| std::path::Path::new("."));
    let name = log_file
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "corenvr.log".to_string());
    let appender = tracing_appender::rolling::never(dir, name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    file_guard = Some(guard);

    registry
      .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
      .init();
  } else {
    registry.init();
  }

  TelemetryGuard {
    _file_guard: file_guard,
  }
}
