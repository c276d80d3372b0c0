//! # Per-sink pipeline: one worker task per opened sink.
//!
//! [`SinkHandle`] is the caller side of an opened [`Sink`]. Every call is a
//! message to the sink's worker, which owns the sink and drives it in order.
//!
//! ## Architecture
//! ```text
//! SinkHandle ── SinkCommand ──► worker ──► sink.on_*()
//!                                 │
//!                                 │ (Coordination::Embedded only)
//!                                 ├──► RunCoordinator (private)
//!                                 │        └─ completed spec ─► worker inbox ─► sink.on_spec_completed()
//!                                 │
//!                                 └─ EndRun / RequestExitCode / Terminate:
//!                                      end_run ─► sink.on_tree_summary(tree) ─► exit code
//! ```
//!
//! ## Rules
//! - raw lines go through the configured [`LineParser`]; unparsed lines reach `on_unrecognized`
//! - the exit code is computed once and cached: `0` iff the embedded run passed;
//!   standalone sinks always report `0`
//! - `close` is idempotent and bounded by [`Config::sink_close_timeout`]
//! - a panicking handler is logged; the worker keeps going

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::core::{RunCoordinator, SpecListener};
use crate::error::SinkError;
use crate::events::{BeginSpec, EndSpec, Event, LineParser, NodeResult};
use crate::model::{RunnerMessage, SpecRecord};
use crate::sinks::sink::{Coordination, Sink};

pub(crate) enum SinkCommand {
    Event(Arc<Event>),
    SpecCompleted(SpecRecord),
    RequestExitCode(oneshot::Sender<i32>),
    Terminate(oneshot::Sender<()>),
}

struct SinkState {
    closing: AtomicBool,
    closed: AtomicBool,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Caller side of an opened sink.
#[derive(Clone)]
pub struct SinkHandle {
    name: &'static str,
    tx: mpsc::UnboundedSender<SinkCommand>,
    state: Arc<SinkState>,
    reply_timeout: Duration,
    grace: Duration,
}

/// Configures a sink before it is opened.
pub struct SinkBuilder<S: Sink> {
    sink: S,
    parser: Option<Arc<dyn LineParser>>,
}

impl<S: Sink> SinkBuilder<S> {
    /// Parser used for raw lines offered to this sink.
    pub fn with_parser(mut self, parser: Arc<dyn LineParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Spawns the sink worker. Must be called within a tokio runtime.
    pub fn open(self, cfg: &Config) -> SinkHandle {
        let name = self.sink.name();
        let (tx, rx) = mpsc::unbounded_channel();

        let run = match self.sink.coordination() {
            Coordination::Embedded => {
                let run = RunCoordinator::spawn(cfg.clone());
                run.subscribe(Arc::new(InboxListener {
                    inbox: tx.downgrade(),
                }));
                Some(run)
            }
            Coordination::Standalone => None,
        };

        let worker = Worker {
            sink: self.sink,
            parser: self.parser,
            run,
            delivered: 0,
            exit_code: None,
        };
        let join = tokio::spawn(worker.run(rx));
        debug!(sink = name, "sink opened");

        SinkHandle {
            name,
            tx,
            state: Arc::new(SinkState {
                closing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                join: Mutex::new(Some(join)),
            }),
            reply_timeout: cfg.sink_close_timeout,
            grace: cfg.grace,
        }
    }
}

impl SinkHandle {
    pub fn builder<S: Sink>(sink: S) -> SinkBuilder<S> {
        SinkBuilder { sink, parser: None }
    }

    /// Opens `sink` without a line parser.
    pub fn open<S: Sink>(sink: S, cfg: &Config) -> SinkHandle {
        Self::builder(sink).open(cfg)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `true` until `close` was requested and while the worker is alive.
    pub fn is_open(&self) -> bool {
        !self.state.closing.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// `true` once `close` completed or the worker is gone.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Queues an event; returns `false` when the sink no longer accepts events.
    pub fn send(&self, event: Event) -> bool {
        self.send_arc(Arc::new(event))
    }

    pub(crate) fn send_arc(&self, event: Arc<Event>) -> bool {
        if self.state.closing.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(SinkCommand::Event(event)).is_ok()
    }

    pub fn begin_test(&self, spec: BeginSpec) -> bool {
        self.send(Event::BeginSpec(spec))
    }

    pub fn end_test(&self, spec: EndSpec) -> bool {
        self.send(Event::EndSpec(spec))
    }

    pub fn success(&self, result: NodeResult) -> bool {
        self.send(Event::NodePass(result))
    }

    pub fn fail(&self, result: NodeResult) -> bool {
        self.send(Event::NodeFail(result))
    }

    pub fn log_runner_message(&self, message: RunnerMessage) -> bool {
        self.send(Event::RunnerLog(message))
    }

    /// Offers a raw text line to the sink's parser.
    pub fn offer(&self, line: impl Into<String>) -> bool {
        self.send(Event::Raw(line.into()))
    }

    /// Asks the sink for its recommended exit code.
    ///
    /// For embedded sinks this ends the private run.
    pub async fn request_exit_code(&self) -> Result<i32, SinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(SinkCommand::RequestExitCode(reply_tx)).is_err() {
            return Err(self.closed_error());
        }
        self.await_reply(reply_rx).await
    }

    /// Terminates the sink and reclaims its worker. Later calls return `Ok(())`.
    pub async fn close(&self) -> Result<(), SinkError> {
        self.state.closing.store(true, Ordering::Release);

        let mut guard = self.state.join.lock().await;
        let Some(mut join) = guard.take() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        let acked = if self.tx.send(SinkCommand::Terminate(ack_tx)).is_err() {
            Err(self.closed_error())
        } else {
            self.await_reply(ack_rx).await
        };

        if tokio::time::timeout(self.grace, &mut join).await.is_err() {
            warn!(sink = self.name, "sink worker did not exit in time; aborting");
            join.abort();
        }
        self.state.closed.store(true, Ordering::Release);
        acked
    }

    async fn await_reply<R>(&self, reply: oneshot::Receiver<R>) -> Result<R, SinkError> {
        match tokio::time::timeout(self.reply_timeout, reply).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(SinkError::NoReply {
                sink: self.name.to_string(),
            }),
            Err(_) => Err(SinkError::CloseTimeout {
                sink: self.name.to_string(),
                timeout: self.reply_timeout,
            }),
        }
    }

    fn closed_error(&self) -> SinkError {
        SinkError::Closed {
            sink: self.name.to_string(),
        }
    }
}

/// Feeds completed specs of the embedded run back into the sink's inbox.
struct InboxListener {
    inbox: mpsc::WeakUnboundedSender<SinkCommand>,
}

impl SpecListener for InboxListener {
    fn on_spec_completed(&self, spec: &SpecRecord) {
        if let Some(inbox) = self.inbox.upgrade() {
            let _ = inbox.send(SinkCommand::SpecCompleted(spec.clone()));
        }
    }
}

struct Worker<S: Sink> {
    sink: S,
    parser: Option<Arc<dyn LineParser>>,
    /// Embedded run; taken when the run ends.
    run: Option<RunCoordinator>,
    /// Completed specs already handed to the sink.
    delivered: usize,
    exit_code: Option<i32>,
}

impl<S: Sink> Worker<S> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SinkCommand>) {
        let name = self.sink.name();
        while let Some(cmd) = rx.recv().await {
            match AssertUnwindSafe(self.handle(cmd)).catch_unwind().await {
                Ok(true) => break,
                Ok(false) => {}
                Err(panic) => {
                    let info = if let Some(msg) = panic.downcast_ref::<&'static str>() {
                        (*msg).to_string()
                    } else if let Some(msg) = panic.downcast_ref::<String>() {
                        msg.clone()
                    } else {
                        "unknown panic".to_string()
                    };
                    error!(sink = name, panic = %info, "sink handler panicked");
                }
            }
        }
        debug!(sink = name, "sink worker stopped");
    }

    /// Returns `true` when the worker must exit.
    async fn handle(&mut self, cmd: SinkCommand) -> bool {
        match cmd {
            SinkCommand::Event(event) => self.dispatch(&event).await,
            SinkCommand::SpecCompleted(spec) => {
                if self.run.is_some() {
                    self.delivered += 1;
                    self.sink.on_spec_completed(&spec).await;
                }
            }
            SinkCommand::RequestExitCode(reply) => {
                let code = self.finish().await;
                let _ = reply.send(code);
            }
            SinkCommand::Terminate(ack) => {
                self.finish().await;
                self.sink.on_close().await;
                let _ = ack.send(());
                return true;
            }
        }
        false
    }

    async fn dispatch(&mut self, event: &Event) {
        let Event::Raw(line) = event else {
            return self.dispatch_structured(event).await;
        };
        let parsed = self
            .parser
            .as_ref()
            .and_then(|parser| parser.parse(line))
            .filter(|parsed| !matches!(parsed, Event::Raw(_)));
        match parsed {
            Some(parsed) => self.dispatch_structured(&parsed).await,
            None => self.sink.on_unrecognized(line).await,
        }
    }

    async fn dispatch_structured(&mut self, event: &Event) {
        match event {
            Event::BeginSpec(spec) => {
                self.sink.on_begin_spec(spec).await;
                if let Some(run) = &self.run {
                    if let Err(err) = run.begin_spec(spec.clone()).await {
                        warn!(sink = self.sink.name(), label = err.as_label(), error = %err, "embedded run rejected spec");
                    }
                }
            }
            Event::EndSpec(spec) => {
                self.sink.on_end_spec(spec).await;
                if let Some(run) = &self.run {
                    if let Err(err) = run.end_spec().await {
                        warn!(sink = self.sink.name(), label = err.as_label(), error = %err, "embedded run could not end spec");
                    }
                }
            }
            Event::NodeLog(fragment) => {
                self.sink.on_node_log(fragment).await;
                self.mirror_node(event);
            }
            Event::NodePass(result) => {
                self.sink.on_node_pass(result).await;
                self.mirror_node(event);
            }
            Event::NodeFail(result) => {
                self.sink.on_node_fail(result).await;
                self.mirror_node(event);
            }
            Event::RunnerLog(message) => {
                self.sink.on_runner_log(message).await;
                if let Some(run) = &self.run {
                    run.runner_message(message.clone());
                }
            }
            Event::EndRun => {
                self.sink.on_end_run().await;
                self.finish().await;
            }
            Event::Raw(line) => self.sink.on_unrecognized(line).await,
        }
    }

    fn mirror_node(&self, event: &Event) {
        if let (Some(run), Some(index), Some(message)) =
            (&self.run, event.node_index(), event.to_node_message())
        {
            run.route_node_message(index, message);
        }
    }

    /// Ends the embedded run once and caches the exit code.
    async fn finish(&mut self) -> i32 {
        if let Some(code) = self.exit_code {
            return code;
        }
        let code = match self.run.take() {
            None => 0,
            Some(run) => match run.end_run().await {
                Ok(tree) => {
                    for spec in tree.specs().iter().skip(self.delivered) {
                        self.sink.on_spec_completed(spec).await;
                    }
                    self.delivered = tree.specs().len();
                    self.sink.on_tree_summary(&tree).await;
                    tree.exit_code()
                }
                Err(err) => {
                    warn!(sink = self.sink.name(), label = err.as_label(), error = %err, "embedded run lost");
                    1
                }
            },
        };
        self.exit_code = Some(code);
        code
    }
}
