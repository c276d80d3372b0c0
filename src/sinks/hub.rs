//! # Sink hub: broadcast to every sink, coordinated shutdown.
//!
//! [`SinkHub`] is the entry point of the event stream. It forwards every event,
//! unmodified and in arrival order, to every registered sink, and negotiates
//! the final exit code when the run is over.
//!
//! ## Architecture
//! ```text
//! publish(event) ──► hub ──┬──► sink #1 worker
//!                          ├──► sink #2 worker
//!                          └──► sink #N worker
//!
//! close_all():
//!   N = sinks.len()   (snapshot)
//!   per sink, concurrently:
//!     request_exit_code ──► ExitCode ──► hub inbox   (last write wins)
//!     close             ──► SinkClosed ─► hub inbox   (count acks)
//!   acks == N ──► store exit code ──► cancel shutdown token
//! ```
//!
//! ## Rules
//! - `close_all` is idempotent; only the first call starts the shutdown
//! - sinks enabled while closing are closed right away and do not count
//! - with zero sinks the shutdown completes immediately with exit code `0`

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::shutdown::wait_for_termination;
use crate::error::SinkError;
use crate::events::{BeginSpec, EndSpec, Event, LineParser};
use crate::model::LogLevel;
use crate::sinks::pipeline::SinkHandle;
use crate::sinks::sink::Sink;

enum HubCommand {
    Enable(SinkHandle),
    Publish(Arc<Event>),
    CloseAll,
    ExitCode {
        sink: &'static str,
        code: Result<i32, SinkError>,
    },
    SinkClosed {
        sink: &'static str,
        result: Result<(), SinkError>,
    },
}

type Opener = Box<dyn FnOnce(&Config, Option<Arc<dyn LineParser>>) -> SinkHandle + Send>;

/// Builder for a [`SinkHub`].
pub struct SinkHubBuilder {
    cfg: Config,
    parser: Option<Arc<dyn LineParser>>,
    openers: Vec<Opener>,
}

impl SinkHubBuilder {
    /// Registers a sink; it is opened by [`build`](Self::build).
    pub fn with_sink<S: Sink>(mut self, sink: S) -> Self {
        self.openers.push(Box::new(
            move |cfg: &Config, parser: Option<Arc<dyn LineParser>>| open_sink(sink, cfg, parser),
        ));
        self
    }

    /// Registers a sink that was opened elsewhere.
    pub fn with_handle(mut self, handle: SinkHandle) -> Self {
        self.openers
            .push(Box::new(move |_: &Config, _: Option<Arc<dyn LineParser>>| handle));
        self
    }

    /// Parser handed to every sink the hub opens.
    pub fn with_parser(mut self, parser: Arc<dyn LineParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Opens every registered sink and starts the hub. Must be called within a tokio runtime.
    pub fn build(self) -> SinkHub {
        let cfg = Arc::new(self.cfg);
        let sinks: Vec<SinkHandle> = self
            .openers
            .into_iter()
            .map(|open| open(&cfg, self.parser.clone()))
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let exit_code = Arc::new(AtomicI32::new(0));

        let actor = HubActor {
            sinks,
            closing: false,
            pending: 0,
            exit_code: 0,
            shared_code: exit_code.clone(),
            shutdown: shutdown.clone(),
            inbox: tx.downgrade(),
        };
        tokio::spawn(actor.run(rx));

        SinkHub {
            tx,
            shutdown,
            exit_code,
            cfg,
            parser: self.parser,
        }
    }
}

fn open_sink<S: Sink>(sink: S, cfg: &Config, parser: Option<Arc<dyn LineParser>>) -> SinkHandle {
    let builder = SinkHandle::builder(sink);
    match parser {
        Some(parser) => builder.with_parser(parser).open(cfg),
        None => builder.open(cfg),
    }
}

/// Handle to the sink hub.
#[derive(Clone)]
pub struct SinkHub {
    tx: mpsc::UnboundedSender<HubCommand>,
    shutdown: CancellationToken,
    exit_code: Arc<AtomicI32>,
    cfg: Arc<Config>,
    parser: Option<Arc<dyn LineParser>>,
}

impl SinkHub {
    pub fn builder(cfg: Config) -> SinkHubBuilder {
        SinkHubBuilder {
            cfg,
            parser: None,
            openers: Vec::new(),
        }
    }

    /// Opens and registers another sink.
    pub fn enable<S: Sink>(&self, sink: S) -> SinkHandle {
        let handle = open_sink(sink, &self.cfg, self.parser.clone());
        self.enable_handle(handle.clone());
        handle
    }

    /// Registers a sink that was opened elsewhere.
    pub fn enable_handle(&self, handle: SinkHandle) {
        if let Err(mpsc::error::SendError(HubCommand::Enable(handle))) =
            self.tx.send(HubCommand::Enable(handle))
        {
            close_late(handle);
        }
    }

    /// Broadcasts an event to every sink.
    pub fn publish(&self, event: Event) {
        if self.tx.send(HubCommand::Publish(Arc::new(event))).is_err() {
            debug!("hub shut down; event dropped");
        }
    }

    /// Broadcasts a raw text line.
    pub fn offer(&self, line: impl Into<String>) {
        self.publish(Event::Raw(line.into()));
    }

    pub fn begin_spec(&self, spec: BeginSpec) {
        self.publish(Event::BeginSpec(spec));
    }

    pub fn end_spec(&self, spec: EndSpec) {
        self.publish(Event::EndSpec(spec));
    }

    pub fn node_log(&self, node_index: usize, role: impl Into<String>, text: impl Into<String>) {
        self.publish(Event::node_log(node_index, role, text));
    }

    pub fn node_pass(&self, node_index: usize, role: impl Into<String>, text: impl Into<String>) {
        self.publish(Event::node_pass(node_index, role, text));
    }

    pub fn node_fail(&self, node_index: usize, role: impl Into<String>, text: impl Into<String>) {
        self.publish(Event::node_fail(node_index, role, text));
    }

    /// Publishes a runner message stamped with [`Config::runner_source`].
    pub fn runner_message(&self, text: impl Into<String>, level: LogLevel) {
        self.publish(Event::runner_log(text, self.cfg.runner_source.clone(), level));
    }

    pub fn end_run(&self) {
        self.publish(Event::EndRun);
    }

    /// Starts the coordinated shutdown. Repeated calls are ignored.
    pub fn close_all(&self) {
        let _ = self.tx.send(HubCommand::CloseAll);
    }

    /// Waits until every sink acknowledged `close` and returns the final exit code.
    pub async fn closed(&self) -> i32 {
        self.shutdown.cancelled().await;
        self.exit_code.load(Ordering::Acquire)
    }

    /// Token cancelled once the shutdown completed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Closes every sink on the first termination signal.
    ///
    /// Returns the final exit code, also when the hub was closed by other means first.
    pub async fn close_on_signal(&self) -> std::io::Result<i32> {
        tokio::select! {
            signal = wait_for_termination() => {
                let signal = signal?;
                info!(signal, "termination requested; closing sinks");
                self.close_all();
            }
            _ = self.shutdown.cancelled() => {}
        }
        Ok(self.closed().await)
    }
}

struct HubActor {
    sinks: Vec<SinkHandle>,
    closing: bool,
    /// Close acknowledgments still outstanding.
    pending: usize,
    /// Last exit code received.
    exit_code: i32,
    shared_code: Arc<AtomicI32>,
    shutdown: CancellationToken,
    inbox: mpsc::WeakUnboundedSender<HubCommand>,
}

impl HubActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                HubCommand::Enable(handle) => {
                    if self.closing {
                        close_late(handle);
                    } else {
                        self.sinks.push(handle);
                    }
                }
                HubCommand::Publish(event) => {
                    for sink in &self.sinks {
                        if !sink.send_arc(event.clone()) {
                            debug!(sink = sink.name(), event = event.as_label(), "sink not accepting events");
                        }
                    }
                }
                HubCommand::CloseAll => {
                    if self.closing {
                        debug!("close already in progress");
                        continue;
                    }
                    if self.close_all() {
                        break;
                    }
                }
                HubCommand::ExitCode { sink, code } => match code {
                    Ok(code) => self.exit_code = code,
                    Err(err) => warn!(sink, label = err.as_label(), error = %err, "no exit code from sink"),
                },
                HubCommand::SinkClosed { sink, result } => {
                    if let Err(err) = result {
                        warn!(sink, label = err.as_label(), error = %err, "sink did not close cleanly");
                    }
                    self.pending = self.pending.saturating_sub(1);
                    if self.pending == 0 {
                        self.finish();
                        break;
                    }
                }
            }
        }

        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            if let HubCommand::Enable(handle) = cmd {
                close_late(handle);
            }
        }
    }

    /// Starts closing every sink; returns `true` when nothing is left to wait for.
    fn close_all(&mut self) -> bool {
        self.closing = true;
        self.pending = self.sinks.len();
        info!(sinks = self.pending, "closing sinks");

        let Some(inbox) = self.inbox.upgrade() else {
            self.finish();
            return true;
        };
        if self.pending == 0 {
            self.finish();
            return true;
        }

        for sink in self.sinks.drain(..) {
            let inbox = inbox.clone();
            tokio::spawn(async move {
                let name = sink.name();
                let code = sink.request_exit_code().await;
                let _ = inbox.send(HubCommand::ExitCode { sink: name, code });
                let result = sink.close().await;
                let _ = inbox.send(HubCommand::SinkClosed { sink: name, result });
            });
        }
        false
    }

    fn finish(&mut self) {
        self.shared_code.store(self.exit_code, Ordering::Release);
        info!(exit_code = self.exit_code, "all sinks closed");
        self.shutdown.cancel();
    }
}

fn close_late(handle: SinkHandle) {
    warn!(sink = handle.name(), "sink enabled while closing; closing it");
    tokio::spawn(async move {
        let _ = handle.close().await;
    });
}
