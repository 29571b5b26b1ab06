//! Session controller actor.
//!
//! One task owns every piece of session state. Start requests, update
//! events, timer fires, stream drops, subscribe results and status queries
//! all arrive as [`Trigger`]s on a single queue and are handled one at a
//! time without awaiting, so no two triggers ever race on the state.
//!
//! Timers, subscribe attempts, stream pumps and reconnect delays run as
//! separate tasks that report back through the same queue. Each report is
//! tagged: timer fires with the timer epoch, stream traffic with the link
//! number of the subscription that produced it. A report whose tag no
//! longer matches the controller's current one is stale and dropped.

use std::sync::Arc;
use std::time::Instant as StdInstant;

use chrono::Utc;
use fleetwatch_core::{Imo, SessionId};
use fleetwatch_telemetry::MetricsRecorder;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::ReconnectBackoff;
use crate::config::TrackerConfig;
use crate::continuation::ContinuationSink;
use crate::error::TrackerError;
use crate::session::{Phase, SessionOutcome, SessionSnapshot, Step, TerminationReason, TrackingSession};
use crate::source::{Subscription, UpdateSource};

const TRIGGER_QUEUE: usize = 256;

enum Trigger {
    Start {
        candidates: Vec<Imo>,
        ack: oneshot::Sender<SessionId>,
    },
    Update {
        link: u64,
        imo: Imo,
    },
    StreamClosed {
        link: u64,
    },
    Subscribed {
        link: u64,
        result: Result<Subscription, TrackerError>,
    },
    TimerFired {
        epoch: u64,
    },
    ReconnectDue {
        link: u64,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Client side of the controller. Cheap to clone.
#[derive(Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<Trigger>,
}

impl TrackerHandle {
    /// Start a new tracking session, replacing any active one.
    ///
    /// An empty candidate list tracks every vessel.
    pub async fn start(&self, candidates: Vec<Imo>) -> Result<SessionId, TrackerError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(Trigger::Start { candidates, ack })
            .await
            .map_err(|_| TrackerError::ControllerStopped)?;
        rx.await.map_err(|_| TrackerError::ControllerStopped)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Trigger::Snapshot { reply })
            .await
            .map_err(|_| TrackerError::ControllerStopped)?;
        rx.await.map_err(|_| TrackerError::ControllerStopped)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// A live subscription and the task draining it into the trigger queue.
struct Link {
    id: u64,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

impl Link {
    fn close(self) {
        self.cancel.cancel();
        self.pump.abort();
    }
}

pub struct SessionController {
    config: TrackerConfig,
    source: Arc<dyn UpdateSource>,
    sink: Arc<dyn ContinuationSink>,
    metrics: Option<Arc<MetricsRecorder>>,
    tx: mpsc::Sender<Trigger>,

    session: Option<TrackingSession>,
    last_outcome: Option<SessionOutcome>,

    timer: Option<JoinHandle<()>>,
    timer_epoch: u64,

    link: u64,
    subscription: Option<Link>,
    connecting: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    backoff: ReconnectBackoff,
}

impl SessionController {
    /// Spawn the controller task. It runs until `shutdown` is cancelled.
    pub fn spawn(
        config: TrackerConfig,
        source: Arc<dyn UpdateSource>,
        sink: Arc<dyn ContinuationSink>,
        metrics: Option<Arc<MetricsRecorder>>,
        shutdown: CancellationToken,
    ) -> (TrackerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(TRIGGER_QUEUE);
        let backoff = ReconnectBackoff::new(config.reconnect_backoff, config.max_reconnect_backoff);
        let controller = Self {
            config,
            source,
            sink,
            metrics,
            tx: tx.clone(),
            session: None,
            last_outcome: None,
            timer: None,
            timer_epoch: 0,
            link: 0,
            subscription: None,
            connecting: None,
            reconnect: None,
            backoff,
        };
        let task = tokio::spawn(controller.run(rx, shutdown));
        (TrackerHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Trigger>, shutdown: CancellationToken) {
        info!(
            primary_ms = self.config.primary_window.as_millis() as u64,
            grace_ms = self.config.grace_window.as_millis() as u64,
            "session controller started"
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                trigger = rx.recv() => match trigger {
                    Some(trigger) => self.handle(trigger),
                    None => break,
                },
            }
        }

        if let Some(session) = self.session.take() {
            info!(session_id = %session.id(), phase = session.phase().as_str(), "active session abandoned on shutdown");
        }
        self.teardown();
        rx.close();
        info!("session controller stopped");
    }

    fn handle(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::Start { candidates, ack } => {
                let id = self.start(candidates);
                let _ = ack.send(id);
            }
            Trigger::Update { link, imo } => self.on_update(link, imo),
            Trigger::StreamClosed { link } => self.on_stream_closed(link),
            Trigger::Subscribed { link, result } => self.on_subscribed(link, result),
            Trigger::TimerFired { epoch } => self.on_timer(epoch),
            Trigger::ReconnectDue { link } => self.on_reconnect_due(link),
            Trigger::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn start(&mut self, candidates: Vec<Imo>) -> SessionId {
        if let Some(previous) = self.session.take() {
            info!(
                session_id = %previous.id(),
                phase = previous.phase().as_str(),
                seen = previous.seen().len(),
                "superseding active tracking session"
            );
            self.count("tracker.sessions.superseded", &[]);
        }
        self.teardown();
        self.backoff.reset();

        let session = TrackingSession::begin(candidates, Instant::now(), self.config.primary_window);
        let id = session.id().clone();
        let deadline = session.deadline();
        info!(
            session_id = %id,
            candidates = ?session.candidates(),
            primary_ms = self.config.primary_window.as_millis() as u64,
            "tracking session started"
        );
        self.session = Some(session);
        self.count("tracker.sessions.started", &[]);

        self.arm_timer(deadline);
        self.connect();
        id
    }

    fn on_update(&mut self, link: u64, imo: Imo) {
        if link != self.link {
            debug!(imo = %imo, link, current = self.link, "update from stale link dropped");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.record(imo) {
            Step::Accumulated { fresh: true } => {
                debug!(session_id = %session.id(), imo = %imo, "vessel reported update");
                self.count("tracker.updates.accepted", &[]);
            }
            Step::Terminate { reported, reason } => self.terminate(reported, reason),
            Step::Accumulated { fresh: false } | Step::Ignored | Step::EnterGrace { .. } => {}
        }
    }

    fn on_timer(&mut self, epoch: u64) {
        if epoch != self.timer_epoch {
            debug!(epoch, current = self.timer_epoch, "stale timer fire ignored");
            return;
        }
        self.timer = None;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match session.deadline_elapsed(Instant::now(), self.config.grace_window) {
            Step::EnterGrace { deadline } => {
                info!(
                    session_id = %session.id(),
                    grace_ms = self.config.grace_window.as_millis() as u64,
                    "no updates in primary window, entering grace window"
                );
                self.arm_timer(deadline);
            }
            Step::Terminate { reported, reason } => self.terminate(reported, reason),
            Step::Accumulated { .. } | Step::Ignored => {}
        }
    }

    fn on_subscribed(&mut self, link: u64, result: Result<Subscription, TrackerError>) {
        if link != self.link || !self.is_waiting() {
            debug!(link, current = self.link, "stale subscribe result discarded");
            return;
        }
        self.connecting = None;

        match result {
            Ok(subscription) => {
                self.backoff.reset();
                let cancel = CancellationToken::new();
                let pump = spawn_pump(link, subscription, self.tx.clone(), cancel.clone());
                self.subscription = Some(Link {
                    id: link,
                    cancel,
                    pump,
                });
                info!(link, "update stream subscribed");
            }
            Err(e) => {
                warn!(link, error = %e, kind = e.error_kind(), "update stream subscribe failed");
                self.count("tracker.subscribe.failures", &[]);
                self.schedule_reconnect(link);
            }
        }
    }

    fn on_stream_closed(&mut self, link: u64) {
        let current = self.subscription.as_ref().map(|l| l.id);
        if current != Some(link) || !self.is_waiting() {
            // Our own teardown, or a link we already replaced.
            debug!(link, "stream close ignored");
            return;
        }
        if let Some(closed) = self.subscription.take() {
            closed.close();
        }
        warn!(link, "update stream closed while tracking");
        self.schedule_reconnect(link);
    }

    fn on_reconnect_due(&mut self, link: u64) {
        if link != self.link || !self.is_waiting() || self.subscription.is_some() {
            return;
        }
        self.reconnect = None;
        info!(link, attempts = self.backoff.attempts(), "resubscribing to update stream");
        self.connect();
    }

    /// Close the session and send its continuation request, if any.
    fn terminate(&mut self, reported: Vec<Imo>, reason: TerminationReason) {
        let Some(session) = self.session.take() else {
            return;
        };
        debug_assert_eq!(session.phase(), Phase::Terminating);
        self.teardown();

        let session_id = session.id().clone();
        info!(
            session_id = %session_id,
            reason = reason.as_str(),
            reported = ?reported,
            "tracking session terminated"
        );
        self.count("tracker.sessions.terminated", &[("reason", reason.as_str())]);

        if reported.is_empty() {
            info!(session_id = %session_id, "no vessels reported updates, continuation request skipped");
        } else {
            self.dispatch_continuation(session_id.clone(), reported.clone());
        }

        self.last_outcome = Some(SessionOutcome {
            session_id,
            reported,
            reason,
            finished_at: Utc::now(),
        });
    }

    /// Send the continuation request on its own task. Failures are logged
    /// and counted, never retried: the window it describes is already closed.
    fn dispatch_continuation(&self, session_id: SessionId, imos: Vec<Imo>) {
        let sink = Arc::clone(&self.sink);
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let started = StdInstant::now();
            let result = sink.send(&imos).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            match &result {
                Ok(()) => {
                    info!(session_id = %session_id, imos = ?imos, "continuation request sent");
                }
                Err(e) => {
                    error!(
                        session_id = %session_id,
                        imos = ?imos,
                        error = %e,
                        kind = e.error_kind(),
                        "continuation request failed, dropped without retry"
                    );
                }
            }

            if let Some(metrics) = metrics {
                let name = if result.is_ok() {
                    "tracker.continuation.sent"
                } else {
                    "tracker.continuation.failures"
                };
                metrics.counter_inc(name, &[], 1);
                metrics.histogram_observe("tracker.continuation.duration_ms", &[], elapsed_ms);
            }
        });
    }

    fn arm_timer(&mut self, deadline: Instant) {
        self.cancel_timer();
        let epoch = self.timer_epoch;
        let tx = self.tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(Trigger::TimerFired { epoch }).await;
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer_epoch += 1;
    }

    /// Begin a new subscribe attempt under a fresh link number.
    fn connect(&mut self) {
        self.link += 1;
        let link = self.link;
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        self.connecting = Some(tokio::spawn(async move {
            let result = source.subscribe().await;
            let _ = tx.send(Trigger::Subscribed { link, result }).await;
        }));
    }

    fn schedule_reconnect(&mut self, link: u64) {
        let delay = self.backoff.next_delay();
        info!(
            link,
            attempt = self.backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        self.count("tracker.reconnects", &[]);

        let tx = self.tx.clone();
        if let Some(previous) = self.reconnect.replace(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Trigger::ReconnectDue { link }).await;
        })) {
            previous.abort();
        }
    }

    /// Cancel the timer and every stream task, and retire the current link.
    fn teardown(&mut self) {
        self.cancel_timer();
        if let Some(link) = self.subscription.take() {
            link.close();
        }
        if let Some(connecting) = self.connecting.take() {
            connecting.abort();
        }
        if let Some(reconnect) = self.reconnect.take() {
            reconnect.abort();
        }
        self.link += 1;
    }

    fn is_waiting(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.phase().is_waiting())
    }

    fn snapshot(&self) -> SessionSnapshot {
        let now = Instant::now();
        match &self.session {
            Some(session) => SessionSnapshot {
                session_id: Some(session.id().clone()),
                phase: session.phase(),
                seen: session.seen(),
                candidates: session.candidates(),
                deadline: Some(session.deadline()),
                remaining_ms: Some(session.deadline().saturating_duration_since(now).as_millis() as u64),
                subscribed: self.subscription.is_some(),
                reconnect_attempts: self.backoff.attempts(),
                last_outcome: self.last_outcome.clone(),
            },
            None => SessionSnapshot {
                session_id: None,
                phase: Phase::Idle,
                seen: Vec::new(),
                candidates: Vec::new(),
                deadline: None,
                remaining_ms: None,
                subscribed: false,
                reconnect_attempts: 0,
                last_outcome: self.last_outcome.clone(),
            },
        }
    }

    fn count(&self, name: &str, labels: &[(&str, &str)]) {
        if let Some(metrics) = &self.metrics {
            metrics.counter_inc(name, labels, 1);
        }
    }
}

/// Forward a subscription's records into the trigger queue until it ends
/// or the link is cancelled. A natural end becomes `StreamClosed`.
fn spawn_pump(
    link: u64,
    mut subscription: Subscription,
    tx: mpsc::Sender<Trigger>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                next = subscription.next_update() => next,
            };

            match next {
                Some(vessel) => {
                    let update = Trigger::Update {
                        link,
                        imo: vessel.imo,
                    };
                    if tx.send(update).await.is_err() {
                        return;
                    }
                }
                None => {
                    let _ = tx.send(Trigger::StreamClosed { link }).await;
                    return;
                }
            }
        }
    })
}
