//! Tracing setup: a console layer on non-blocking stderr plus optional
//! rotating JSON files routed by target prefix.

use crate::config::{LogSection, LoggingConfig};
use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static CONSOLE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

const DEFAULT_SECTION: &str = "default";
const DEFAULT_MAX_SIZE_MB: u64 = 100;

fn level_filter(level: &str) -> LevelFilter {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" | "none" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// `target` is `prefix` itself or a module below it.
fn under_prefix(target: &str, prefix: &str) -> bool {
    target
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

type Rotating = Arc<Mutex<FileRotate<AppendTimestamp>>>;

fn open_rotating(section: &LogSection, base_dir: &Path) -> std::io::Result<Rotating> {
    let path = {
        let p = Path::new(section.file.trim());
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            base_dir.join(p)
        }
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let limit = match (section.max_backups, section.max_age_days) {
        (Some(n), _) => FileLimit::MaxFiles(n),
        (None, days) => FileLimit::Age(chrono::Duration::days(i64::from(days.unwrap_or(1)))),
    };
    let max_bytes = section.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB) as usize * 1024 * 1024;
    Ok(Arc::new(Mutex::new(FileRotate::new(
        path,
        AppendTimestamp::default(limit),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        None,
    ))))
}

/// Writer for one record; `None` drops the bytes.
struct FileHandle(Option<Rotating>);

impl Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &self.0 {
            Some(file) => match file.lock() {
                Ok(mut f) => f.write(buf),
                Err(_) => Ok(buf.len()),
            },
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &self.0 {
            Some(file) => match file.lock() {
                Ok(mut f) => f.flush(),
                Err(_) => Ok(()),
            },
            None => Ok(()),
        }
    }
}

/// File sinks keyed by target prefix, longest prefix first.
#[derive(Clone, Default)]
struct FileSinks {
    fallback: Option<Rotating>,
    by_prefix: Vec<(String, Rotating)>,
}

impl FileSinks {
    fn from_config(cfg: &LoggingConfig, base_dir: &Path) -> Self {
        let mut sinks = FileSinks::default();
        for (target, section) in cfg {
            if section.file.trim().is_empty() {
                continue;
            }
            let file = match open_rotating(section, base_dir) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("log file '{}' for '{target}' unavailable: {e}", section.file);
                    continue;
                }
            };
            if target == DEFAULT_SECTION {
                sinks.fallback = Some(file);
            } else {
                sinks.by_prefix.push((target.clone(), file));
            }
        }
        sinks.by_prefix.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        sinks
    }

    fn is_empty(&self) -> bool {
        self.fallback.is_none() && self.by_prefix.is_empty()
    }

    fn for_target(&self, target: &str) -> Option<Rotating> {
        self.by_prefix
            .iter()
            .find(|(prefix, _)| under_prefix(target, prefix))
            .map(|(_, f)| f.clone())
            .or_else(|| self.fallback.clone())
    }
}

impl<'a> fmt::MakeWriter<'a> for FileSinks {
    type Writer = FileHandle;

    fn make_writer(&'a self) -> Self::Writer {
        FileHandle(self.fallback.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        FileHandle(self.for_target(meta.target()))
    }
}

fn console_targets(cfg: &LoggingConfig) -> Targets {
    let default = cfg
        .get(DEFAULT_SECTION)
        .map(|s| level_filter(&s.console_level))
        .unwrap_or(LevelFilter::INFO);
    cfg.iter()
        .filter(|(target, _)| target.as_str() != DEFAULT_SECTION)
        .fold(Targets::new().with_default(default), |t, (target, s)| {
            t.with_target(target.clone(), level_filter(&s.console_level))
        })
}

fn file_targets(cfg: &LoggingConfig, sinks: &FileSinks) -> Targets {
    let default = match (cfg.get(DEFAULT_SECTION), &sinks.fallback) {
        (Some(s), Some(_)) => level_filter(&s.file_level),
        _ => LevelFilter::OFF,
    };
    cfg.iter()
        .filter(|(target, s)| target.as_str() != DEFAULT_SECTION && !s.file.trim().is_empty())
        .fold(Targets::new().with_default(default), |t, (target, s)| {
            t.with_target(target.clone(), level_filter(&s.file_level))
        })
}

/// Installs the global subscriber. `RUST_LOG`, when set, caps every sink.
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place.
pub fn init_logging(cfg: Option<&LoggingConfig>, base_dir: &Path) {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("log bridge not installed: {e}");
    }

    let cfg = match cfg {
        Some(c) if !c.is_empty() => c,
        _ => {
            let _ = tracing_subscriber::registry()
                .with(EnvFilter::try_from_default_env().ok())
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_timer(fmt::time::UtcTime::rfc_3339())
                        .with_filter(LevelFilter::INFO),
                )
                .try_init();
            return;
        }
    };

    let sinks = FileSinks::from_config(cfg, base_dir);

    let (stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);
    let console = fmt::layer()
        .with_writer(stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets(cfg));

    let files = if sinks.is_empty() {
        None
    } else {
        let targets = file_targets(cfg, &sinks);
        Some(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_writer(sinks)
                .with_filter(targets),
        )
    };

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().ok())
        .with(console)
        .with(files)
        .try_init();
}
