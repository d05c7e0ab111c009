mod transport;

use clap::Parser;
use podflow_workflow::{
    CanvasSession, InMemoryRepositoryStore, LocalEventBus, RequestConfig, SessionConfig, SessionDeps,
    SocketConnectionBackend, SocketRequester, TracingNotifier, TrackerTimings,
};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};
use transport::Transport;
use url::Url;

const DEFAULT_URL: &str = "ws://127.0.0.1:3001/ws";
const DEFAULT_CANVAS: &str = "default";

#[derive(Parser, Debug)]
#[command(name = "podflow-session")]
struct Args {
    #[arg(long, default_value = "")]
    url: String,
    #[arg(long, default_value = "")]
    canvas: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = 10)]
    request_timeout: u64,
    #[arg(long, default_value_t = 60)]
    task_timeout: u64,
}

#[derive(Clone, Debug)]
struct Config {
    url: String,
    canvas_id: String,
    debug: bool,
    log_dir: String,
    request: RequestConfig,
    timings: TrackerTimings,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_file = init_logging(&config);
    let url = match Url::parse(&config.url) {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_url", url = %config.url, error = %err);
            return;
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let bus = LocalEventBus::with_outbound(outbound_tx);
    let inbound = Arc::new(Notify::new());
    let (connected_tx, mut connected_rx) = watch::channel(false);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let transport = Transport {
        url,
        bus: bus.clone(),
        outbound: outbound_rx,
        inbound: inbound.clone(),
        connected: connected_tx,
    };
    let transport_task = tokio::spawn(transport.run(shutdown_rx));

    let requester = SocketRequester::new(Arc::new(bus.clone()), config.request);
    let deps = SessionDeps {
        channel: Arc::new(bus.clone()),
        backend: Arc::new(SocketConnectionBackend::new(requester.clone())),
        notifier: Arc::new(TracingNotifier),
        repositories: Arc::new(InMemoryRepositoryStore::default()),
    };
    let mut session = CanvasSession::new(
        config.canvas_id.clone(),
        deps,
        SessionConfig {
            timings: config.timings,
        },
    );
    session.setup_listeners();
    info!(event = "session_start", canvas_id = %config.canvas_id, url = %config.url);

    let mut revision = session.graph().revision();
    loop {
        let deadline = session.next_deadline();
        tokio::select! {
            _ = inbound.notified() => {
                let applied = session.pump();
                debug!(event = "frames_applied", count = applied);
            }
            _ = sleep_until_deadline(deadline) => {
                session.poll_timers();
            }
            changed = connected_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected = *connected_rx.borrow_and_update();
                if connected {
                    session.setup_listeners();
                    let loaded = session.load_connections().await;
                    match (loaded.data, loaded.error) {
                        (Some(count), _) => info!(event = "connections_synced", count = count),
                        (None, error) => warn!(event = "connections_sync_failed", error = ?error),
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
        if session.graph().revision() != revision {
            revision = session.graph().revision();
            info!(
                event = "graph_changed",
                revision = revision,
                connections = session.graph().len()
            );
        }
        for task in session.progress_tasks() {
            debug!(
                event = "task_state",
                request_id = %task.request_id,
                title = %task.title,
                progress = task.progress,
                status = %task.status
            );
        }
    }

    session.cleanup_listeners();
    requester.close();
    let _ = shutdown_tx.send(true);
    let _ = transport_task.await;
    info!(event = "session_stop", canvas_id = %session.canvas_id());
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn load_config() -> Config {
    let args = Args::parse();
    let url = resolve_value(&args.url, "PODFLOW_URL", DEFAULT_URL);
    let canvas_id = resolve_value(&args.canvas, "PODFLOW_CANVAS", DEFAULT_CANVAS);
    let debug = args.debug || env_true("PODFLOW_DEBUG");
    let log_dir = resolve_value(&args.log_dir, "PODFLOW_LOG_DIR", "");
    let timings = TrackerTimings {
        timeout: Duration::from_secs(args.task_timeout.max(1)),
        ..TrackerTimings::default()
    };
    Config {
        url,
        canvas_id,
        debug,
        log_dir,
        request: RequestConfig {
            timeout: Duration::from_secs(args.request_timeout.max(1)),
        },
        timings,
    }
}

/// Flag first, then the environment, then `default`.
fn resolve_value(flag: &str, key: &str, default: &str) -> String {
    pick_value(flag, std::env::var(key).ok().as_deref(), default)
}

fn pick_value(flag: &str, env_value: Option<&str>, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    match env_value.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => default.to_string(),
    }
}

fn env_true(key: &str) -> bool {
    flag_enabled(std::env::var(key).ok().as_deref())
}

fn flag_enabled(value: Option<&str>) -> bool {
    value.is_some_and(|value| {
        matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

/// `--debug` wins over `PODFLOW_LOG_LEVEL`; `RUST_LOG` still overrides both
/// when set.
fn log_directive(debug: bool, level: Option<&str>) -> String {
    if debug {
        return "debug".to_string();
    }
    match level.map(str::trim) {
        Some(level) if !level.is_empty() => level.to_string(),
        _ => "info".to_string(),
    }
}

/// Installs the global subscriber. A log file that cannot be opened is
/// reported through the subscriber itself and the session keeps logging to
/// stdout.
fn init_logging(config: &Config) -> Option<LogFile> {
    let level = std::env::var("PODFLOW_LOG_LEVEL").ok();
    let directive = log_directive(config.debug, level.as_deref());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));
    let (log_file, open_error) = match open_log_file(&config.log_dir, &config.canvas_id) {
        Ok(log_file) => (log_file, None),
        Err(err) => (LogFile::default(), Some(err)),
    };
    let file = log_file.handle.clone();
    let make_writer = BoxMakeWriter::new(move || Tee::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(log_file.path.is_none())
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    if let Some(err) = open_error {
        warn!(event = "log_file_unavailable", log_dir = %config.log_dir, error = %err);
    }
    if let Some(path) = &log_file.path {
        debug!(event = "log_file_opened", path = %path.display());
    }
    Some(log_file)
}

type SharedFile = Arc<Mutex<std::fs::File>>;

/// Keeps the session log file open for the life of `main`.
#[derive(Default)]
struct LogFile {
    path: Option<PathBuf>,
    handle: Option<SharedFile>,
}

/// Copies every formatted line to stdout and, when present, the log file.
struct Tee {
    stdout: io::Stdout,
    file: Option<SharedFile>,
}

impl Tee {
    fn new(file: Option<SharedFile>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }

    fn with_file(&self, op: impl FnOnce(&mut std::fs::File) -> io::Result<()>) {
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = op(&mut file);
        }
    }
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        self.with_file(|file| file.write_all(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        self.with_file(|file| file.flush());
        Ok(())
    }
}

/// Canvas ids come from the backend; keep only characters safe in a file name.
fn log_file_name(canvas_id: &str) -> String {
    let safe: String = canvas_id
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    format!("podflow-session-{safe}.log")
}

/// An empty `log_dir` means stdout only. Directory and open failures are
/// returned so the caller can report them once logging is up.
fn open_log_file(log_dir: &str, canvas_id: &str) -> io::Result<LogFile> {
    if log_dir.trim().is_empty() {
        return Ok(LogFile::default());
    }
    let dir = PathBuf::from(log_dir.trim());
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(log_file_name(canvas_id));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(LogFile {
        path: Some(path),
        handle: Some(Arc::new(Mutex::new(file))),
    })
}
