//! The SOS state machine.
//!
//! `SosController` owns all mutable state and is driven one [`Event`] at a
//! time, either by [`SosController::run`] on its own task or directly through
//! [`SosController::update`]. Timers, the location lookup and the dispatch
//! fan-out are tokio tasks that post events back into the same queue, so
//! every transition happens in one place. Shells talk to a running controller
//! through a cloneable [`SosHandle`] and observe it through a `watch` channel.

use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::capabilities::{
    Capabilities, FixRequest, KvStore, LocationError, VibrationPattern,
};
use crate::composer::AlertComposer;
use crate::config::SosConfig;
use crate::contacts::{ContactError, ContactStore, KvContactStore, NewContact};
use crate::dispatch::{DispatchRun, DispatchScheduler};
use crate::event::Event;
use crate::history::{EventLog, HistoryError};
use crate::hold::{HoldGesture, HoldSignal};
use crate::model::{
    Contact, ContactId, DispatchProgress, FailureNotice, Identity, LocationFix, Owner, SessionId,
    SosEvent, SosState, SosView, TriggerPhase, TriggerSession, UserId,
};
use crate::profile::{resolve_owner, KvProfileStore, ProfileStore};
use crate::{AppError, AppResult};

/// Persistent collaborators, injected so shells and tests pick the backend.
#[derive(Clone)]
pub struct Stores {
    pub contacts: Arc<dyn ContactStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub history: EventLog,
}

impl Stores {
    /// All three stores over one key-value backend.
    pub fn over_kv(kv: Arc<dyn KvStore>, config: &SosConfig) -> Self {
        Self {
            contacts: Arc::new(
                KvContactStore::new(Arc::clone(&kv)).with_max_contacts(config.max_contacts),
            ),
            profiles: Arc::new(KvProfileStore::new(Arc::clone(&kv))),
            history: EventLog::with_capacity(kv, config.history_capacity),
        }
    }
}

pub struct SosController {
    config: SosConfig,
    caps: Capabilities,
    stores: Stores,
    owner: Owner,
    contacts: Vec<Contact>,

    state: SosState,
    session: Option<TriggerSession>,
    next_session: u64,
    hold: HoldGesture,
    composer: AlertComposer,
    scheduler: DispatchScheduler,
    runs: Vec<DispatchRun>,
    dispatch_progress: Option<DispatchProgress>,
    failure: Option<FailureNotice>,
    success_timer: Option<JoinHandle<()>>,
    location_task: Option<JoinHandle<()>>,
    unmounting: bool,

    events: UnboundedSender<Event>,
    view_tx: watch::Sender<SosView>,
}

impl SosController {
    /// Builds a controller in `NoContacts`. Call [`Self::reload_contacts`]
    /// before feeding it presses.
    pub fn new(
        config: SosConfig,
        caps: Capabilities,
        stores: Stores,
        owner: Owner,
    ) -> (Self, UnboundedReceiver<Event>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(SosView::default());
        let scheduler = DispatchScheduler::from_config(Arc::clone(&caps.channels), &config);

        let controller = Self {
            hold: HoldGesture::from_config(&config),
            composer: AlertComposer::from_config(&config),
            scheduler,
            config,
            caps,
            stores,
            owner,
            contacts: Vec::new(),
            state: SosState::NoContacts,
            session: None,
            next_session: 1,
            runs: Vec::new(),
            dispatch_progress: None,
            failure: None,
            success_timer: None,
            location_task: None,
            unmounting: false,
            events,
            view_tx,
        };
        (controller, events_rx)
    }

    /// Validates the configuration, resolves the owner's profile, loads
    /// contacts and spawns the event loop.
    #[instrument(skip_all, fields(owner = %identity.user_id))]
    pub async fn start(
        config: SosConfig,
        caps: Capabilities,
        stores: Stores,
        identity: &Identity,
    ) -> AppResult<SosHandle> {
        config.validate()?;
        let owner = resolve_owner(stores.profiles.as_ref(), identity, caps.clock.as_ref()).await?;

        let (mut controller, events_rx) = Self::new(config, caps, stores, owner);
        controller.reload_contacts().await;
        let handle = controller.handle();
        tokio::spawn(controller.run(events_rx));
        info!("sos controller started");
        Ok(handle)
    }

    #[must_use]
    pub fn handle(&self) -> SosHandle {
        SosHandle {
            events: self.events.clone(),
            view: self.view_tx.subscribe(),
            contacts: Arc::clone(&self.stores.contacts),
            history: self.stores.history.clone(),
            owner: self.owner.id.clone(),
        }
    }

    /// Processes events until unmounted.
    pub async fn run(mut self, mut events: UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            if !self.update(event).await {
                break;
            }
        }
        info!("sos controller stopped");
    }

    /// Applies one event. Returns false once the controller should stop.
    pub async fn update(&mut self, event: Event) -> bool {
        if event.is_noisy() {
            trace!(event = event.name(), state = ?self.state, "event");
        } else {
            debug!(event = event.name(), state = ?self.state, "event");
        }

        let keep_running = match event {
            Event::PressStarted => {
                self.press_start();
                true
            }
            Event::PressEnded => {
                self.press_end();
                true
            }
            Event::ContactsChanged => {
                self.reload_contacts().await;
                true
            }
            Event::CancelDispatch { reply } => {
                let cancelled = self.cancel_dispatch();
                if let Some(reply) = reply {
                    let _ = reply.send(cancelled);
                }
                true
            }
            Event::Unmount => self.unmount(),
            Event::HoldTick { session } => {
                if self.state == SosState::Holding {
                    let signal = self.hold.on_tick(session);
                    self.on_hold_signal(session, signal);
                }
                true
            }
            Event::HoldThresholdReached { session } => {
                if self.state == SosState::Holding {
                    let signal = self.hold.on_threshold(session);
                    self.on_hold_signal(session, signal);
                }
                true
            }
            Event::LocationResolved { session, result } => {
                self.on_location(session, result).await;
                !self.unmounting
            }
            Event::SuccessWindowElapsed { session } => {
                self.on_success_elapsed(session);
                true
            }
            Event::InvocationReported(report) => {
                if let Some(progress) = self
                    .dispatch_progress
                    .as_mut()
                    .filter(|p| p.run == report.run)
                {
                    progress.record(report.contact_index, report.outcome.is_ok());
                    if progress.is_settled() {
                        info!(
                            run = %progress.run,
                            reached = progress.contacts_reached(),
                            total = progress.contacts_total(),
                            failed = progress.failed,
                            "dispatch settled"
                        );
                    }
                }
                true
            }
        };

        self.publish();
        keep_running
    }

    pub async fn reload_contacts(&mut self) {
        match self.stores.contacts.list(&self.owner.id).await {
            Ok(contacts) => self.contacts = contacts,
            Err(e) => {
                let err = AppError::from(e);
                error!(error = %err, "failed to load contacts");
            }
        }
        if matches!(self.state, SosState::NoContacts | SosState::Idle) {
            self.state = self.idle_state();
        }
        debug!(count = self.contacts.len(), state = ?self.state, "contacts loaded");
        self.publish();
    }

    /// Aborts every invocation that has not been issued yet, across all
    /// runs. Returns how many were aborted.
    pub fn cancel_dispatch(&mut self) -> usize {
        let mut total = 0;
        for run in &self.runs {
            let cancelled = run.cancel();
            if let Some(progress) = self
                .dispatch_progress
                .as_mut()
                .filter(|p| p.run == run.id())
            {
                progress.cancelled += cancelled;
            }
            total += cancelled;
        }
        self.runs.retain(|run| !run.is_finished() && run.pending() > 0);
        info!(cancelled = total, "dispatch cancel requested");
        total
    }

    #[must_use]
    pub fn state(&self) -> SosState {
        self.state
    }

    #[must_use]
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    #[must_use]
    pub fn view(&self) -> SosView {
        let progress_ratio = match self.state {
            SosState::Holding => self.hold.progress(),
            SosState::Dispatching | SosState::Success => 1.0,
            SosState::NoContacts | SosState::Idle => 0.0,
        };
        SosView {
            state: self.state,
            progress_ratio,
            contact_count: self.contacts.len(),
            button_label: self.state.button_label().to_string(),
            failure: self.failure.clone(),
            dispatch: self.dispatch_progress.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SosView> {
        self.view_tx.subscribe()
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.view());
    }

    fn idle_state(&self) -> SosState {
        if self.contacts.is_empty() {
            SosState::NoContacts
        } else {
            SosState::Idle
        }
    }

    fn press_start(&mut self) {
        if self.unmounting || !self.state.accepts_press() {
            debug!(state = ?self.state, "press ignored");
            return;
        }
        let id = SessionId(self.next_session);
        self.next_session += 1;

        self.session = Some(TriggerSession::start(id, self.caps.clock.now()));
        self.failure = None;
        self.hold.press_start(id, &self.events);
        self.state = SosState::Holding;
        self.caps
            .vibrate(&VibrationPattern::pulse(self.config.press_vibration_ms));
        info!(session = %id, "hold started");
    }

    fn press_end(&mut self) {
        if self.state != SosState::Holding {
            return;
        }
        self.hold.press_end();
        self.session = None;
        self.state = self.idle_state();
        info!("hold released early");
    }

    fn on_hold_signal(&mut self, session: SessionId, signal: Option<HoldSignal>) {
        match signal {
            Some(HoldSignal::Progress(ratio)) => {
                if let Some(current) = self.session.as_mut() {
                    current.progress_ratio = ratio;
                }
            }
            Some(HoldSignal::Confirmed) => self.begin_dispatch(session),
            None => {}
        }
    }

    fn begin_dispatch(&mut self, session: SessionId) {
        if let Some(current) = self.session.as_mut() {
            current.progress_ratio = 1.0;
            current.phase = TriggerPhase::Dispatching;
        }
        self.state = SosState::Dispatching;
        self.caps.vibrate(&VibrationPattern(
            self.config.trigger_vibration_pattern_ms.clone(),
        ));
        info!(%session, "hold confirmed, requesting location");

        let location = Arc::clone(&self.caps.location);
        let timeout = self.config.location_timeout();
        let events = self.events.clone();
        self.location_task = Some(tokio::spawn(async move {
            let request = FixRequest::fresh_high_accuracy(timeout);
            let result = tokio::time::timeout(timeout, location.get_fix(&request))
                .await
                .unwrap_or_else(|_| Err(LocationError::timeout(timeout)));
            let _ = events.send(Event::LocationResolved { session, result });
        }));
    }

    async fn on_location(&mut self, session: SessionId, result: Result<LocationFix, LocationError>) {
        let current = self.session.as_ref().map(|s| s.id);
        if self.state != SosState::Dispatching || current != Some(session) {
            warn!(%session, "stale location result dropped");
            return;
        }
        self.location_task = None;

        match result {
            Ok(fix) => self.complete_dispatch(session, fix).await,
            Err(cause) => {
                warn!(%session, error = %cause, "location failed, sos not sent");
                self.failure = Some(FailureNotice::from_location(cause));
                self.hold.reset();
                self.session = None;
                self.state = self.idle_state();
            }
        }
    }

    async fn complete_dispatch(&mut self, session: SessionId, fix: LocationFix) {
        let alert = self.composer.compose(&self.owner.display_name, fix);

        let record = SosEvent::active(&self.owner, fix, &alert.location_url, self.caps.clock.now());
        if let Err(e) = self.stores.history.append(record).await {
            let err = AppError::from(e);
            error!(error = %err, "failed to record sos event; dispatching anyway");
        }

        let mut run = self.scheduler.dispatch(&self.contacts, &alert);
        if let Some(mut reports) = run.take_reports() {
            let events = self.events.clone();
            tokio::spawn(async move {
                while let Some(report) = reports.recv().await {
                    if events.send(Event::InvocationReported(report)).is_err() {
                        break;
                    }
                }
            });
        }
        self.dispatch_progress = Some(DispatchProgress::new(
            run.id(),
            run.contacts(),
            run.len(),
        ));
        self.runs.retain(|r| !r.is_finished());
        self.runs.push(run);

        if let Some(current) = self.session.as_mut() {
            current.phase = TriggerPhase::Completed;
        }
        self.state = SosState::Success;
        info!(%session, contacts = self.contacts.len(), "sos dispatched");

        if self.unmounting {
            return;
        }
        let window = self.config.success_window();
        let events = self.events.clone();
        self.success_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = events.send(Event::SuccessWindowElapsed { session });
        }));
    }

    fn on_success_elapsed(&mut self, session: SessionId) {
        let current = self.session.as_ref().map(|s| s.id);
        if self.state != SosState::Success || current != Some(session) {
            return;
        }
        self.success_timer = None;
        self.hold.reset();
        self.session = None;
        self.state = self.idle_state();
        debug!(%session, "success window elapsed");
    }

    /// Stops timers. A trigger already waiting on location is allowed to
    /// finish dispatching first; scheduled invocations always keep running.
    fn unmount(&mut self) -> bool {
        self.hold.reset();
        if let Some(timer) = self.success_timer.take() {
            timer.abort();
        }
        if self.state == SosState::Holding {
            self.session = None;
            self.state = self.idle_state();
        }
        if self.state == SosState::Dispatching {
            self.unmounting = true;
            info!("unmount deferred until the pending sos is dispatched");
            return true;
        }
        info!(live_runs = self.runs.len(), "unmounted");
        false
    }
}

impl Drop for SosController {
    fn drop(&mut self) {
        if let Some(task) = self.location_task.take() {
            task.abort();
        }
        if let Some(timer) = self.success_timer.take() {
            timer.abort();
        }
    }
}

/// Front end to a running [`SosController`].
#[derive(Clone)]
pub struct SosHandle {
    events: UnboundedSender<Event>,
    view: watch::Receiver<SosView>,
    contacts: Arc<dyn ContactStore>,
    history: EventLog,
    owner: UserId,
}

impl SosHandle {
    pub fn press_start(&self) {
        self.send(Event::PressStarted);
    }

    pub fn press_end(&self) {
        self.send(Event::PressEnded);
    }

    /// Returns how many scheduled invocations were aborted.
    pub async fn cancel_dispatch(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(Event::CancelDispatch { reply: Some(reply) });
        rx.await.unwrap_or(0)
    }

    pub async fn contacts(&self) -> Result<Vec<Contact>, ContactError> {
        self.contacts.list(&self.owner).await
    }

    pub async fn add_contact(&self, contact: NewContact) -> Result<Contact, ContactError> {
        let added = self.contacts.add(&self.owner, contact).await?;
        self.send(Event::ContactsChanged);
        Ok(added)
    }

    pub async fn remove_contact(&self, id: &ContactId) -> Result<bool, ContactError> {
        let removed = self.contacts.remove(&self.owner, id).await?;
        if removed {
            self.send(Event::ContactsChanged);
        }
        Ok(removed)
    }

    pub async fn history(&self) -> Result<Vec<SosEvent>, HistoryError> {
        self.history.recent().await
    }

    #[must_use]
    pub fn view(&self) -> SosView {
        self.view.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SosView> {
        self.view.clone()
    }

    pub fn shutdown(&self) {
        self.send(Event::Unmount);
    }

    fn send(&self, event: Event) {
        let name = event.name();
        if self.events.send(event).is_err() {
            warn!(event = name, "controller stopped, event dropped");
        }
    }
}
