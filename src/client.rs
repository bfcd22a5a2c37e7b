// src/client.rs

//! Client engine and its coarse lock
//!
//! [`ClientState`] holds everything the engine mutates: the data model, the
//! scheduler, the bootstrap session and the collaborators. [`Client`] wraps
//! it in one `parking_lot::Mutex`; every public entry point locks once and
//! calls unlocked methods on the state, so scheduled jobs and foreground
//! requests are interleaved but never concurrent.
//!
//! ```text
//!   request layer ──▶ Client ──lock──▶ ClientState ──▶ DataModel
//!                       ▲                   │  ▲
//!        run() / run_pending()        arm   │  │ pop_due
//!                       └──────────── Scheduler
//! ```

use crate::bootstrap::{
    BackoffState, BootstrapAction, BootstrapRequest, BootstrapResponse, BootstrapSession,
    BootstrapState,
};
use crate::coap::{CoapClient, ExchangeId, ExchangeOutcome};
use crate::config::ClientConfig;
use crate::dm::{DataModel, WriteEntry};
use crate::error::Result;
use crate::notify::{self, DataModelHooks, NoHooks, NotifyContext, ScheduledNotify};
use crate::observe::{NoObservations, ObservationSink};
use crate::path::{Iid, Oid, Rid};
use crate::sched::{Job, Scheduler};
use crate::servers::{Connection, SSID_BOOTSTRAP, ServerManager, Ssid};
use crate::time::{Clock, SystemClock};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, trace, warn};

/// Engine state guarded by the client lock
pub(crate) struct ClientState {
    pub(crate) config: ClientConfig,
    pub(crate) dm: DataModel,
    pub(crate) sched: Scheduler,
    pub(crate) servers: Box<dyn ServerManager>,
    pub(crate) coap: Box<dyn CoapClient>,
    pub(crate) observer: Box<dyn ObservationSink>,
    pub(crate) hooks: Box<dyn DataModelHooks>,
    pub(crate) scheduled_notify: ScheduledNotify,
    pub(crate) bootstrap: BootstrapSession,
}

impl ClientState {
    /// Borrow the collaborators a notify flush needs
    pub(crate) fn notify_context(&mut self) -> NotifyContext<'_> {
        NotifyContext {
            dm: &mut self.dm,
            servers: self.servers.as_mut(),
            observer: self.observer.as_mut(),
            hooks: self.hooks.as_mut(),
            config: &self.config,
        }
    }

    fn run_job(&mut self, job: Job) {
        trace!(?job, "running job");
        match job {
            Job::FlushNotify => self.flush_scheduled_notify(),
            Job::PurgeBootstrap => self.purge_bootstrap_job(),
            Job::FinishTimeout => self.finish_timeout_job(),
            Job::RequestBootstrap => self.request_bootstrap_job(),
        }
    }

    fn flush_scheduled_notify(&mut self) {
        let mut queue = self.scheduled_notify.take();
        let mut ctx = self.notify_context();
        if let Err(err) = notify::flush(&mut ctx, SSID_BOOTSTRAP, &mut queue) {
            warn!(%err, "could not flush scheduled notifications");
        }
    }

    fn cleanup(&mut self) {
        self.bootstrap_cleanup();
        self.scheduled_notify.clear(&mut self.sched);
    }
}

/// Builder for [`Client`]
pub struct ClientBuilder {
    config: ClientConfig,
    servers: Box<dyn ServerManager>,
    coap: Box<dyn CoapClient>,
    clock: Arc<dyn Clock>,
    dm: DataModel,
    observer: Box<dyn ObservationSink>,
    hooks: Box<dyn DataModelHooks>,
}

impl ClientBuilder {
    pub fn new(
        config: ClientConfig,
        servers: Box<dyn ServerManager>,
        coap: Box<dyn CoapClient>,
    ) -> Self {
        Self {
            config,
            servers,
            coap,
            clock: Arc::new(SystemClock),
            dm: DataModel::new(),
            observer: Box::new(NoObservations),
            hooks: Box::new(NoHooks),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start from a data model with objects already registered
    pub fn with_data_model(mut self, dm: DataModel) -> Self {
        self.dm = dm;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn ObservationSink>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_hooks(mut self, hooks: Box<dyn DataModelHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn build(self) -> Client {
        let sched = Scheduler::new(self.clock, self.config.scheduler_capacity);
        let wakeup = sched.wakeup();
        let state = ClientState {
            config: self.config,
            dm: self.dm,
            sched,
            servers: self.servers,
            coap: self.coap,
            observer: self.observer,
            hooks: self.hooks,
            scheduled_notify: ScheduledNotify::new(),
            bootstrap: BootstrapSession::new(),
        };
        Client {
            state: Mutex::new(state),
            wakeup,
        }
    }
}

/// LwM2M client engine
///
/// All methods take `&self`; the client can be shared behind an `Arc`
/// between the request layer and the [`Client::run`] driver.
pub struct Client {
    state: Mutex<ClientState>,
    wakeup: Arc<Notify>,
}

impl Client {
    // =========================================================================
    // Bootstrap Interface
    // =========================================================================

    /// Handle a Bootstrap Interface request received on `conn`
    pub fn perform_bootstrap_action(
        &self,
        conn: &Connection,
        request: &BootstrapRequest,
    ) -> Result<BootstrapResponse> {
        self.state.lock().perform_bootstrap_action(conn, request)
    }

    /// Completion of a Request Bootstrap exchange
    pub fn on_bootstrap_response(&self, id: ExchangeId, outcome: ExchangeOutcome) {
        self.state.lock().on_bootstrap_response(id, outcome);
    }

    pub fn request_bootstrap_if_appropriate(&self, action: BootstrapAction) -> Result<()> {
        self.state.lock().request_bootstrap_if_appropriate(action)
    }

    /// Request bootstrap as soon as possible, resetting the backoff
    pub fn schedule_bootstrap_request(&self) -> Result<()> {
        self.state.lock().schedule_bootstrap_request()
    }

    pub fn notify_regular_connection_available(&self) -> Result<()> {
        self.state.lock().notify_regular_connection_available()
    }

    /// Factory-provisioning write; opens a bootstrap session if needed
    pub fn bootstrap_write_composite(&self, entries: &[WriteEntry]) -> Result<()> {
        self.state.lock().bootstrap_write_composite(entries)
    }

    /// Remove every instance of every object
    pub fn delete_everything(&self) -> Result<()> {
        self.state.lock().delete_everything()
    }

    /// Validate and commit an open bootstrap session without a server
    pub fn bootstrap_finish(&self) -> Result<()> {
        self.state.lock().bootstrap_finish_internal()
    }

    pub fn bootstrap_in_progress(&self) -> bool {
        self.state.lock().bootstrap.in_progress()
    }

    pub fn bootstrap_scheduled(&self) -> bool {
        self.state.lock().bootstrap.scheduled()
    }

    pub fn bootstrap_state(&self) -> BootstrapState {
        self.state.lock().bootstrap.state()
    }

    pub fn bootstrap_backoff(&self) -> BackoffState {
        *self.state.lock().bootstrap.backoff()
    }

    pub fn legacy_server_initiated_allowed(&self) -> bool {
        self.state.lock().config.allow_legacy_server_initiated_bootstrap
    }

    // =========================================================================
    // Change notification
    // =========================================================================

    /// A resource value changed outside of any transaction
    pub fn notify_changed(&self, oid: Oid, iid: Iid, rid: Rid) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.scheduled_notify.changed(&mut state.sched, oid, iid, rid)
    }

    /// The instance set of `oid` changed in an unknown way
    pub fn notify_instances_changed(&self, oid: Oid) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.scheduled_notify.instances_changed(&mut state.sched, oid)
    }

    pub fn notify_instance_created(&self, oid: Oid, iid: Iid) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.scheduled_notify.instance_created(&mut state.sched, oid, iid)
    }

    // =========================================================================
    // Data model access
    // =========================================================================

    /// Run `f` against the data model under the client lock
    pub fn with_data_model<R>(&self, f: impl FnOnce(&mut DataModel) -> R) -> R {
        f(&mut self.state.lock().dm)
    }

    /// Run `f` in a data model transaction and flush its changes on behalf
    /// of `origin`
    pub fn transaction<F>(&self, origin: Ssid, f: F) -> Result<()>
    where
        F: FnOnce(&mut DataModel) -> Result<()>,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(mut queue) = state.dm.with_transaction(f)? else {
            return Ok(());
        };
        let mut ctx = state.notify_context();
        notify::flush(&mut ctx, origin, &mut queue)
    }

    // =========================================================================
    // Driver
    // =========================================================================

    /// Run every job that is due, each under its own lock acquisition
    ///
    /// Returns the number of jobs run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let mut state = self.state.lock();
            let Some((_, job)) = state.sched.pop_due() else {
                break;
            };
            state.run_job(job);
            drop(state);
            ran += 1;
        }
        ran
    }

    /// Deadline of the earliest armed job
    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.lock().sched.next_deadline()
    }

    /// Number of armed jobs
    pub fn pending_jobs(&self) -> usize {
        self.state.lock().sched.len()
    }

    /// Service the scheduler until `shutdown` turns true or its sender is
    /// dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("client driver started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.run_pending();

            let delay = {
                let state = self.state.lock();
                state
                    .sched
                    .next_deadline()
                    .map(|deadline| deadline.saturating_duration_since(state.sched.now()))
            };
            let sleep = async {
                match delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = sleep => {}
                _ = self.wakeup.notified() => {
                    trace!("job armed, re-evaluating deadline");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("shutdown sender dropped");
                        break;
                    }
                }
            }
        }
        info!("client driver stopped");
    }

    /// Cancel every timer and exchange and abort an open bootstrap session
    pub fn cleanup(&self) {
        self.state.lock().cleanup();
        info!("client cleaned up");
    }
}
