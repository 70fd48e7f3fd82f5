//! Activity logger: a dedicated thread owns the [`JsonlWriter`].
//!
//! Phase code sends [`ActivityEvent`]s through a bounded crossbeam channel with
//! `try_send()`, so a slow log destination never stalls runtime or state calls.
//! Each handle carries the phase/node/run context stamped onto every line.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::LoggingConfig;
use crate::core::errors::{EraserError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by the three phases.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    PhaseStarted {
        version: String,
        config_hash: String,
    },
    PhaseCompleted {
        count: usize,
        duration_ms: u64,
        ok: bool,
        details: String,
    },
    ExclusionLoaded {
        rules: usize,
        sources: usize,
    },
    ExclusionMissing {
        path: String,
    },
    CandidatesPublished {
        count: usize,
    },
    ImageVerified {
        digest: String,
        reference: String,
    },
    ImageVulnerable {
        digest: String,
        reference: String,
    },
    VerificationFailed {
        digest: String,
        reference: String,
        error_code: String,
        error_message: String,
    },
    ImageRemoved {
        digest: String,
        handle: String,
        duration_ms: u64,
        dry_run: bool,
    },
    ImageNotFound {
        digest: String,
    },
    ImageSkipped {
        digest: String,
        reason: String,
    },
    RemovalFailed {
        digest: String,
        error_code: String,
        error_message: String,
    },
    EventEmitted {
        digest: String,
        reference: String,
        reason: String,
    },
    EventEmitFailed {
        digest: String,
        error_message: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

/// Fields stamped on every line sent through one handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    pub phase: Option<String>,
    pub node: Option<String>,
    pub run_id: Option<String>,
}

#[derive(Debug)]
struct Record {
    context: Option<Arc<LogContext>>,
    event: ActivityEvent,
}

/// Cheaply-cloneable handle for sending log events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<Record>,
    dropped_events: Arc<AtomicU64>,
    context: Option<Arc<LogContext>>,
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread. Non-blocking; a full channel drops
    /// the event and bumps the dropped counter.
    pub fn send(&self, event: ActivityEvent) {
        let record = Record {
            context: self.context.clone(),
            event,
        };
        if let Err(TrySendError::Full(_)) = self.tx.try_send(record) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A handle that stamps `context` onto every line it sends.
    #[must_use]
    pub fn with_context(&self, context: LogContext) -> Self {
        Self {
            tx: self.tx.clone(),
            dropped_events: Arc::clone(&self.dropped_events),
            context: Some(Arc::new(context)),
        }
    }

    /// Number of events dropped due to channel back-pressure.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only until the sentinel is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Record {
            context: None,
            event: ActivityEvent::Shutdown,
        });
    }
}

/// Options for the logger thread.
#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for ActivityLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl_config: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

impl From<&LoggingConfig> for ActivityLoggerConfig {
    fn from(cfg: &LoggingConfig) -> Self {
        Self {
            jsonl_config: JsonlConfig::from(cfg),
            channel_capacity: cfg.channel_capacity.max(1),
        }
    }
}

/// Spawn the logger thread and return a handle plus its join handle.
///
/// The thread runs until `handle.shutdown()` is called or every sender is dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<Record>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
        context: None,
    };

    let join = thread::Builder::new()
        .name("eraser-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.jsonl_config, &dropped_clone))
        .map_err(|source| EraserError::io("eraser-logger thread", source))?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<Record>, jsonl_config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(record) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(record.event, ActivityEvent::Shutdown) {
            break;
        }

        let mut entry = event_to_log_entry(&record.event);
        if let Some(ctx) = record.context.as_deref() {
            entry.phase.clone_from(&ctx.phase);
            entry.node.clone_from(&ctx.node);
            entry.run_id.clone_from(&ctx.run_id);
        }
        jsonl.write_entry(&entry);
    }

    jsonl.flush();
    jsonl.fsync();
}

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::PhaseStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::PhaseStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e
        }
        ActivityEvent::PhaseCompleted {
            count,
            duration_ms,
            ok,
            details,
        } => {
            let severity = if *ok { Severity::Info } else { Severity::Critical };
            let mut e = LogEntry::new(EventType::PhaseComplete, severity);
            e.count = Some(*count as u64);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*ok);
            e.details = Some(details.clone());
            e
        }
        ActivityEvent::ExclusionLoaded { rules, sources } => {
            let mut e = LogEntry::new(EventType::ExclusionLoaded, Severity::Info);
            e.count = Some(*rules as u64);
            e.details = Some(format!("sources={sources}"));
            e
        }
        ActivityEvent::ExclusionMissing { path } => {
            let mut e = LogEntry::new(EventType::ExclusionMissing, Severity::Info);
            e.details = Some(format!("no exclusion artifact at {path}; excluding nothing"));
            e
        }
        ActivityEvent::CandidatesPublished { count } => {
            let mut e = LogEntry::new(EventType::CandidatesPublished, Severity::Info);
            e.count = Some(*count as u64);
            e.ok = Some(true);
            e
        }
        ActivityEvent::ImageVerified { digest, reference } => {
            let mut e = LogEntry::new(EventType::ImageVerified, Severity::Info);
            e.digest = Some(digest.clone());
            e.image = Some(reference.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::ImageVulnerable { digest, reference } => {
            let mut e = LogEntry::new(EventType::ImageVulnerable, Severity::Warning);
            e.digest = Some(digest.clone());
            e.image = Some(reference.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::VerificationFailed {
            digest,
            reference,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::VerificationFailed, Severity::Warning);
            e.digest = Some(digest.clone());
            e.image = Some(reference.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::ImageRemoved {
            digest,
            handle,
            duration_ms,
            dry_run,
        } => {
            let mut e = LogEntry::new(EventType::ImageRemoved, Severity::Info);
            e.digest = Some(digest.clone());
            e.image = Some(handle.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            if *dry_run {
                e.details = Some("dry_run".to_string());
            }
            e
        }
        ActivityEvent::ImageNotFound { digest } => {
            let mut e = LogEntry::new(EventType::ImageNotFound, Severity::Info);
            e.digest = Some(digest.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::ImageSkipped { digest, reason } => {
            let mut e = LogEntry::new(EventType::ImageSkipped, Severity::Info);
            e.digest = Some(digest.clone());
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::RemovalFailed {
            digest,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::RemovalFailed, Severity::Warning);
            e.digest = Some(digest.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::EventEmitted {
            digest,
            reference,
            reason,
        } => {
            let mut e = LogEntry::new(EventType::EventEmitted, Severity::Info);
            e.digest = Some(digest.clone());
            e.image = Some(reference.clone());
            e.details = Some(format!("reason={reason}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::EventEmitFailed {
            digest,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::EventEmitFailed, Severity::Warning);
            e.digest = Some(digest.clone());
            e.ok = Some(false);
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        // Handled by the thread loop before conversion.
        ActivityEvent::Shutdown => LogEntry::new(EventType::PhaseComplete, Severity::Info),
    }
}

// ──────────────────── tests ────────────────────
