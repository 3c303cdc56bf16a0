use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use log::{debug, error, info, warn};
use tokio::{sync::Mutex as AsyncMutex, task::JoinHandle, time};
use uuid::Uuid;

use crate::{
    clock::Clock,
    duration::{calculate_actual_duration, format_duration},
    models::{PauseInterval, Session, SessionPatch},
    store::SessionStore,
};

use super::{
    reconcile::{clamp_forward, close_open_pause, pause_floor, repair_ledger},
    Reconciliation, TimerError, TimerState, TimerStatus,
};

/// Receives a fresh snapshot whenever the timer's state changes or is reconciled, and on
/// every display tick while running.
pub type UpdateCallback = Arc<dyn Fn(&TimerState) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TimerConfig {
    pub device_id: String,
    /// Cadence of display refreshes through the update callback. `None` disables them.
    /// Elapsed time never depends on these ticks.
    pub tick_interval: Option<Duration>,
    /// Gaps at least this long are flagged `notable` in a `Reconciliation`.
    pub reconcile_notice_ms: u64,
}

impl TimerConfig {
    pub fn for_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            tick_interval: Some(Duration::from_secs(1)),
            reconcile_notice_ms: 60_000,
        }
    }
}

#[derive(Default)]
struct Tracked {
    state: TimerState,
    session: Option<Session>,
    on_update: Option<UpdateCallback>,
    hidden_at: Option<i64>,
    elapsed_at_hide: u64,
    last_reconciliation: Option<Reconciliation>,
    /// Set by `destroy`; the ticker stays down until `start` or `restore_session` rearms it.
    released: bool,
}

struct Shared {
    tracked: Mutex<Tracked>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    config: TimerConfig,
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Tracked> {
        lock_unpoisoned(&self.tracked)
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    /// The callback runs outside the lock so it may call back into the timer.
    fn notify(&self) {
        let (callback, snapshot) = {
            let tracked = self.lock();
            (tracked.on_update.clone(), tracked.state.snapshot(self.now()))
        };
        if let Some(callback) = callback {
            callback(&snapshot);
        }
    }
}

fn tracked_session(tracked: &Tracked) -> Result<Session, TimerError> {
    tracked.session.clone().ok_or_else(|| {
        TimerError::CorruptRecord(format!(
            "timer is {:?} but holds no session record",
            tracked.state.status
        ))
    })
}

/// Drives the single active focus session of this device.
///
/// Transitions are serialised by an async lock and only commit in-memory state after the
/// store write settles, so a failed write leaves the previous state untouched. Reads go
/// through a plain mutex and never suspend.
#[derive(Clone)]
pub struct TimerController {
    shared: Arc<Shared>,
    transitions: Arc<AsyncMutex<()>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TimerController {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>, config: TimerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                tracked: Mutex::new(Tracked::default()),
                store,
                clock,
                config,
            }),
            transitions: Arc::new(AsyncMutex::new(())),
            ticker: Arc::new(Mutex::new(None)),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.shared.config.device_id
    }

    pub fn get_state(&self) -> TimerState {
        let tracked = self.shared.lock();
        tracked.state.snapshot(self.shared.now())
    }

    pub fn get_distraction_count(&self) -> u32 {
        self.shared.lock().state.distractions
    }

    /// Outcome of the most recent restore or return to the foreground.
    pub fn last_reconciliation(&self) -> Option<Reconciliation> {
        self.shared.lock().last_reconciliation
    }

    pub async fn start(
        &self,
        mode: &str,
        on_update: Option<UpdateCallback>,
    ) -> Result<String, TimerError> {
        let _transition = self.transitions.lock().await;

        {
            let tracked = self.shared.lock();
            if tracked.state.is_active() {
                return Err(TimerError::SessionAlreadyActive {
                    session_id: tracked.state.session_id.clone().unwrap_or_default(),
                });
            }
        }

        let device_id = self.device_id().to_string();
        if let Some(existing) = self.shared.store.find_running_for_device(&device_id).await? {
            warn!(
                "Refusing to start: session {} is still running on device {device_id}",
                existing.id
            );
            return Err(TimerError::SessionAlreadyActive {
                session_id: existing.id,
            });
        }

        let now = self.shared.now();
        let session = Session::begin(Uuid::new_v4().to_string(), device_id, mode.to_string(), now);
        self.shared.store.put(&session).await?;

        let session_id = session.id.clone();
        let backgrounded = {
            let mut tracked = self.shared.lock();
            let on_update = on_update.or_else(|| tracked.on_update.take());
            let backgrounded = tracked.state.is_backgrounded;
            let mut state = TimerState::from_session(&session);
            state.is_backgrounded = backgrounded;
            *tracked = Tracked {
                state,
                session: Some(session),
                on_update,
                hidden_at: tracked.hidden_at,
                ..Tracked::default()
            };
            backgrounded
        };

        if !backgrounded {
            self.spawn_ticker();
        }
        info!("Session {session_id} started in mode '{mode}'");
        self.shared.notify();
        Ok(session_id)
    }

    /// Opens a pause interval. Pausing an already paused session is a no-op.
    pub async fn pause(&self) -> Result<(), TimerError> {
        let _transition = self.transitions.lock().await;

        let (session, now) = {
            let tracked = self.shared.lock();
            match tracked.state.status {
                TimerStatus::Idle => return Err(TimerError::invalid("pause", TimerStatus::Idle)),
                TimerStatus::Paused => {
                    debug!("Pause ignored: session is already paused");
                    return Ok(());
                }
                TimerStatus::Running => {}
            }
            (tracked_session(&tracked)?, self.shared.now())
        };

        let start = clamp_forward(now, pause_floor(&session), "pause start");
        let mut pauses = session.pauses.clone();
        pauses.push(PauseInterval::open(start));
        let patch = SessionPatch {
            pauses: Some(pauses),
            ..SessionPatch::touched(now)
        };

        self.shared.store.update(&session.id, patch.clone()).await?;
        self.commit(&patch, |state| {
            state.status = TimerStatus::Paused;
            state.current_pause_start = Some(start);
        });

        info!("Session {} paused", session.id);
        self.shared.notify();
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), TimerError> {
        let _transition = self.transitions.lock().await;

        let (session, now) = {
            let tracked = self.shared.lock();
            let status = tracked.state.status;
            if status != TimerStatus::Paused {
                return Err(TimerError::invalid("resume", status));
            }
            (tracked_session(&tracked)?, self.shared.now())
        };

        let (pauses, paused_ms) = close_open_pause(&session, now).ok_or_else(|| {
            TimerError::CorruptRecord(format!(
                "session {} is paused but its ledger has no open pause",
                session.id
            ))
        })?;
        let patch = SessionPatch {
            pauses: Some(pauses),
            paused_ms: Some(paused_ms),
            ..SessionPatch::touched(now)
        };

        self.shared.store.update(&session.id, patch.clone()).await?;
        self.commit(&patch, |state| {
            state.status = TimerStatus::Running;
            state.current_pause_start = None;
            state.total_paused_ms = paused_ms;
        });

        info!(
            "Session {} resumed ({} paused so far)",
            session.id,
            format_duration(paused_ms)
        );
        self.shared.notify();
        Ok(())
    }

    /// Finalises the session. An open pause is closed first, so a stopped record never
    /// carries an open interval.
    pub async fn stop(&self) -> Result<String, TimerError> {
        let _transition = self.transitions.lock().await;

        let (session, status, now) = {
            let tracked = self.shared.lock();
            let status = tracked.state.status;
            if status == TimerStatus::Idle {
                return Err(TimerError::invalid("stop", status));
            }
            (tracked_session(&tracked)?, status, self.shared.now())
        };

        let mut patch = SessionPatch::touched(now);
        match close_open_pause(&session, now) {
            Some((pauses, paused_ms)) => {
                patch.pauses = Some(pauses);
                patch.paused_ms = Some(paused_ms);
            }
            None if status == TimerStatus::Paused => warn!(
                "Session {} was paused without an open pause entry; stopping anyway",
                session.id
            ),
            None => {}
        }

        let mut finished = session.clone();
        finished.apply(&patch);
        let end_ts = clamp_forward(now, pause_floor(&finished), "stop");
        patch.end_ts = Some(end_ts);
        patch.running = Some(false);
        finished.apply(&patch);

        self.shared.store.update(&session.id, patch).await?;

        {
            let mut tracked = self.shared.lock();
            let mut state = TimerState::new();
            state.is_backgrounded = tracked.state.is_backgrounded;
            *tracked = Tracked {
                state,
                on_update: tracked.on_update.take(),
                hidden_at: tracked.hidden_at,
                ..Tracked::default()
            };
        }
        self.cancel_ticker();

        match calculate_actual_duration(&finished) {
            Ok(focused_ms) => info!(
                "Session {} stopped: {} focused, {} paused over {} pauses",
                session.id,
                format_duration(focused_ms),
                format_duration(finished.paused_ms),
                finished.pauses.len()
            ),
            Err(err) => warn!("{err}"),
        }
        self.shared.notify();
        Ok(session.id)
    }

    /// Rebuilds state from a session still flagged running for this device, e.g. after a
    /// process restart. Returns whether a session is now being tracked.
    ///
    /// If this timer already tracks a session the callback is simply reattached.
    pub async fn restore_session(
        &self,
        on_update: Option<UpdateCallback>,
    ) -> Result<bool, TimerError> {
        let _transition = self.transitions.lock().await;

        let reattached = {
            let mut tracked = self.shared.lock();
            if tracked.state.is_active() {
                if let Some(callback) = on_update.clone() {
                    tracked.on_update = Some(callback);
                }
                tracked.released = false;
                Some(tracked.state.is_backgrounded)
            } else {
                None
            }
        };
        if let Some(backgrounded) = reattached {
            debug!("Timer already tracks a session; reattached");
            if !backgrounded {
                self.spawn_ticker();
            }
            self.shared.notify();
            return Ok(true);
        }

        let device_id = self.device_id().to_string();
        let now = self.shared.now();
        // Half-finished records are closed out until a restorable one (or none) remains.
        let mut session = loop {
            let Some(session) = self.shared.store.find_running_for_device(&device_id).await? else {
                debug!("No running session to restore for device {device_id}");
                return Ok(false);
            };
            let Some(end_ts) = session.end_ts else {
                break session;
            };

            warn!(
                "Session {} has endTs {end_ts} but is still flagged running; closing it out",
                session.id
            );
            let patch = SessionPatch {
                running: Some(false),
                ..SessionPatch::touched(now)
            };
            if let Err(err) = self.shared.store.update(&session.id, patch).await {
                error!("Failed to close out session {}: {err:#}", session.id);
                return Ok(false);
            }
        };

        let repairs = repair_ledger(&mut session);
        if !repairs.is_empty() {
            for repair in &repairs {
                warn!("Integrity: session {}: {repair}", session.id);
            }
            let patch = SessionPatch {
                pauses: Some(session.pauses.clone()),
                paused_ms: Some(session.paused_ms),
                ..SessionPatch::touched(now)
            };
            match self.shared.store.update(&session.id, patch.clone()).await {
                Ok(()) => session.apply(&patch),
                Err(err) => error!(
                    "Failed to persist ledger repairs for session {}: {err:#}",
                    session.id
                ),
            }
        }

        let last_touched = session.last_touched_ms();
        if now < last_touched {
            warn!(
                "Clock skew: now {now} is {} ms before session {} was last written",
                last_touched - now,
                session.id
            );
        }

        let mut state = TimerState::from_session(&session);
        let gap_ms = (now - last_touched).max(0) as u64;
        let reconciliation = Reconciliation {
            gap_ms,
            elapsed_before_ms: state.elapsed_at(last_touched),
            elapsed_after_ms: state.elapsed_at(now),
            notable: gap_ms >= self.shared.config.reconcile_notice_ms,
            checkpoint_failed: false,
        };

        info!(
            "Restored session {} (started {}, {:?}): {} elapsed, {} since last write",
            session.id,
            session
                .started_at()
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| session.start_ts.to_string()),
            state.status,
            format_duration(reconciliation.elapsed_after_ms),
            format_duration(gap_ms)
        );

        let backgrounded = {
            let mut tracked = self.shared.lock();
            let backgrounded = tracked.state.is_backgrounded;
            state.is_backgrounded = backgrounded;
            let on_update = on_update.or_else(|| tracked.on_update.take());
            *tracked = Tracked {
                state,
                session: Some(session),
                on_update,
                hidden_at: tracked.hidden_at,
                elapsed_at_hide: 0,
                last_reconciliation: Some(reconciliation),
                released: false,
            };
            backgrounded
        };

        if !backgrounded {
            self.spawn_ticker();
        }
        self.shared.notify();
        Ok(true)
    }

    /// Lifecycle hook. Going to the background checkpoints the record; coming back
    /// recomputes elapsed time from timestamps so suspended time is accounted for.
    pub async fn handle_visibility_change(&self, became_visible: bool) -> Reconciliation {
        let _transition = self.transitions.lock().await;
        let now = self.shared.now();
        if became_visible {
            self.return_to_foreground(now)
        } else {
            self.go_to_background(now).await
        }
    }

    async fn go_to_background(&self, now: i64) -> Reconciliation {
        let (session, elapsed) = {
            let mut tracked = self.shared.lock();
            tracked.state.is_backgrounded = true;
            if tracked.hidden_at.is_none() {
                tracked.hidden_at = Some(now);
                tracked.elapsed_at_hide = tracked.state.elapsed_at(now);
            }
            (tracked.session.clone(), tracked.elapsed_at_hide)
        };
        self.cancel_ticker();

        let mut reconciliation = Reconciliation {
            elapsed_before_ms: elapsed,
            elapsed_after_ms: elapsed,
            ..Reconciliation::default()
        };

        if let Some(session) = session {
            let patch = SessionPatch {
                paused_ms: Some(session.paused_ms),
                pauses: Some(session.pauses.clone()),
                distractions: Some(session.distractions),
                ..SessionPatch::touched(now)
            };
            match self.shared.store.update(&session.id, patch.clone()).await {
                Ok(()) => {
                    self.commit(&patch, |_| {});
                    debug!(
                        "Checkpointed session {} entering background at {} elapsed",
                        session.id,
                        format_duration(elapsed)
                    );
                }
                Err(err) => {
                    error!(
                        "Background checkpoint failed for session {}: {err:#}",
                        session.id
                    );
                    reconciliation.checkpoint_failed = true;
                }
            }
        }

        reconciliation
    }

    fn return_to_foreground(&self, now: i64) -> Reconciliation {
        let (reconciliation, active, released) = {
            let mut tracked = self.shared.lock();
            let hidden_at = tracked.hidden_at.take();
            tracked.state.is_backgrounded = false;

            let active = tracked.state.is_active();
            let elapsed_after = tracked.state.elapsed_at(now);
            let gap_ms = match hidden_at {
                Some(hidden) if now >= hidden => (now - hidden) as u64,
                Some(hidden) => {
                    warn!(
                        "Clock skew: clock moved back {} ms while in background",
                        hidden - now
                    );
                    0
                }
                None => 0,
            };

            let reconciliation = Reconciliation {
                gap_ms,
                elapsed_before_ms: if hidden_at.is_some() {
                    tracked.elapsed_at_hide
                } else {
                    elapsed_after
                },
                elapsed_after_ms: elapsed_after,
                notable: active && gap_ms >= self.shared.config.reconcile_notice_ms,
                checkpoint_failed: false,
            };
            if active {
                tracked.last_reconciliation = Some(reconciliation);
            }
            (reconciliation, active, tracked.released)
        };

        if active {
            if !released {
                self.spawn_ticker();
            }
            if reconciliation.notable {
                info!(
                    "Reconciled after {} in background: elapsed {} -> {}",
                    format_duration(reconciliation.gap_ms),
                    format_duration(reconciliation.elapsed_before_ms),
                    format_duration(reconciliation.elapsed_after_ms)
                );
            }
        }
        self.shared.notify();
        reconciliation
    }

    /// Auxiliary counter. The in-memory count always advances; persisting it is best-effort.
    pub async fn log_distraction(&self) -> Result<u32, TimerError> {
        let _transition = self.transitions.lock().await;

        let (session_id, count, now) = {
            let mut tracked = self.shared.lock();
            let status = tracked.state.status;
            if status == TimerStatus::Idle {
                return Err(TimerError::invalid("log a distraction", status));
            }
            let session_id = tracked_session(&tracked)?.id;
            let count = tracked.state.distractions.saturating_add(1);
            tracked.state.distractions = count;
            if let Some(session) = tracked.session.as_mut() {
                session.distractions = count;
            }
            (session_id, count, self.shared.now())
        };

        let patch = SessionPatch {
            distractions: Some(count),
            ..SessionPatch::touched(now)
        };
        if let Err(err) = self.shared.store.update(&session_id, patch).await {
            warn!("Failed to persist distraction count for session {session_id}: {err:#}");
        }
        Ok(count)
    }

    /// Releases the ticker and the update callback. The session itself is left running so
    /// a later `restore_session` can pick it up.
    pub fn destroy(&self) {
        let had_callback = {
            let mut tracked = self.shared.lock();
            tracked.released = true;
            tracked.on_update.take().is_some()
        };
        self.cancel_ticker();
        if had_callback {
            debug!("Timer destroyed; update callback released");
        }
    }

    fn commit(&self, patch: &SessionPatch, update: impl FnOnce(&mut TimerState)) {
        let mut tracked = self.shared.lock();
        if let Some(session) = tracked.session.as_mut() {
            session.apply(patch);
        }
        update(&mut tracked.state);
    }

    fn spawn_ticker(&self) {
        let Some(period) = self
            .shared
            .config
            .tick_interval
            .filter(|period| !period.is_zero())
        else {
            return;
        };

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                // Every controller handle is gone.
                if Arc::strong_count(&shared) == 1 {
                    break;
                }
                let status = shared.lock().state.status;
                match status {
                    TimerStatus::Idle => break,
                    TimerStatus::Paused => continue,
                    TimerStatus::Running => shared.notify(),
                }
            }
        });

        if let Some(previous) = lock_unpoisoned(&self.ticker).replace(handle) {
            previous.abort();
        }
    }

    fn cancel_ticker(&self) {
        if let Some(handle) = lock_unpoisoned(&self.ticker).take() {
            handle.abort();
        }
    }
}
