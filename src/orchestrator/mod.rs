//! Installation/upgrade orchestrator
//!
//! [`InfraManager`] is the state-machine driver behind the `install` and
//! `upgrade` entry points. Each entry point validates preconditions
//! synchronously, seeds the component registry, then launches the pipeline
//! as a detached background task and returns — the caller learns whether the
//! *submission* was accepted, never whether the installation succeeded.
//! Progress is observed by polling [`InfraManager::get`] /
//! [`InfraManager::get_status`], which read the status store without
//! blocking on the pipeline.
//!
//! The background task is deliberately decoupled from the caller: a
//! cancelled or disconnected request must never cancel a cluster bootstrap
//! or a Helm operation mid-flight, because neither is abort-safe. `tokio::
//! spawn` gives the pipeline its own lifetime; no cancellation token from
//! the public methods is ever passed down. The only cancellable surface is
//! the synchronous pre-flight phase.
//!
//! Failure policy: the first hard error aborts the remaining stages, is
//! wrapped with the stage's name, and becomes the run's terminal status,
//! written exactly once by the deferred finalizer. Panics — including panics
//! from third-party client code — are recovered at the stage boundary and
//! again at the top level, never allowed to kill the task silently. The
//! diagnostics stage is the sole best-effort exception.

mod install;
mod upgrade;

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::addons::AddOnInstaller;
use crate::extensions::ExtensionsInstaller;
use crate::metadata::MetadataClient;
use crate::progress::spawn_progress_aggregator;
use crate::runtime::RuntimeClient;
use crate::status::{Infra, State, Status, StatusStore};
use crate::support::SupportBundleClient;
use crate::Error;

/// Overall description while the install pipeline runs
const INSTALL_RUNNING_DESC: &str = "Installation in progress";
/// Overall description while the upgrade pipeline runs
const UPGRADE_RUNNING_DESC: &str = "Upgrade in progress";
/// Fixed completion message for a successful install
const INSTALL_SUCCESS_DESC: &str = "Installation complete";
/// Fixed completion message for a successful upgrade
const UPGRADE_SUCCESS_DESC: &str = "Upgrade complete";

/// Deadline for the best-effort diagnostics stage. Deliberately short and
/// derived locally — never the caller's.
const SUPPORT_BUNDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// The orchestrator.
///
/// Cheap to clone: all fields are shared handles, and the clone that moves
/// into the background task observes the same store and run-once flag as the
/// instance the caller keeps. Construct a fresh instance per logical
/// installation attempt; the run-once guard is instance state, not process
/// state.
#[derive(Clone)]
pub struct InfraManager {
    store: Arc<StatusStore>,
    runtime: Arc<dyn RuntimeClient>,
    addons: Arc<dyn AddOnInstaller>,
    extensions: Arc<dyn ExtensionsInstaller>,
    metadata: Arc<dyn MetadataClient>,
    support: Arc<dyn SupportBundleClient>,
    install_started: Arc<AtomicBool>,
}

impl InfraManager {
    /// Wire an orchestrator over its collaborators.
    ///
    /// The overall status starts `Pending` until a run is accepted.
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        addons: Arc<dyn AddOnInstaller>,
        extensions: Arc<dyn ExtensionsInstaller>,
        metadata: Arc<dyn MetadataClient>,
        support: Arc<dyn SupportBundleClient>,
    ) -> Self {
        let store = Arc::new(StatusStore::new());
        store.set_status(State::Pending, "");
        Self {
            store,
            runtime,
            addons,
            extensions,
            metadata,
            support,
            install_started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Deep copy of the full aggregate.
    pub fn get(&self) -> Result<Infra, Error> {
        Ok(self.store.get()?)
    }

    /// Deep copy of the overall status.
    pub fn get_status(&self) -> Result<Status, Error> {
        Ok(self.store.get_status()?)
    }

    /// Submit an installation.
    ///
    /// Returns only submission-phase errors; by the time this returns `Ok`,
    /// the full component list is queryable (all `Pending`) and the pipeline
    /// is running detached.
    pub async fn install(&self, opts: crate::config::InstallOptions) -> Result<(), Error> {
        opts.validate()?;

        // Both guards run before any state mutation.
        if self.runtime.is_installed().await? {
            return Err(Error::AlreadyInstalled);
        }
        if self.install_started.swap(true, Ordering::SeqCst) {
            return Err(Error::InstallAlreadyStarted);
        }

        let names = crate::components::component_list(&self.addons.names_for_install(&opts));
        crate::components::register_components(&self.store, &names);
        self.store.set_status(State::Running, INSTALL_RUNNING_DESC);
        self.store
            .add_logs(format!("starting installation of version {}", opts.version));

        let manager = self.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(manager.install_pipeline(&opts))
                .catch_unwind()
                .await;
            manager.finalize(result, INSTALL_SUCCESS_DESC);
        });

        Ok(())
    }

    /// Submit an upgrade.
    ///
    /// Upgrades are repeatable: there is no run-once guard, the local
    /// aggregate is reset, and the component registry is rebuilt from the
    /// *target* options — airgap, DR, and multi-node flags may all differ
    /// from the currently running version.
    pub async fn upgrade(&self, opts: crate::config::InstallOptions) -> Result<(), Error> {
        opts.validate()?;

        self.store.reset();
        let names = crate::components::component_list(&self.addons.names_for_upgrade(&opts));
        crate::components::register_components(&self.store, &names);
        self.store.set_status(State::Running, UPGRADE_RUNNING_DESC);
        self.store
            .add_logs(format!("starting upgrade to version {}", opts.version));

        let manager = self.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(manager.upgrade_pipeline(&opts))
                .catch_unwind()
                .await;
            manager.finalize(result, UPGRADE_SUCCESS_DESC);
        });

        Ok(())
    }

    /// Write the terminal status exactly once.
    ///
    /// Catches anything the stage-level recovery missed. After this runs, no
    /// stage may overwrite the overall status — by construction none can,
    /// since every stage (and the progress aggregator) has finished by the
    /// time the pipeline future resolves.
    fn finalize(
        &self,
        result: Result<Result<(), Error>, Box<dyn Any + Send>>,
        success_desc: &str,
    ) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(payload) => Err(Error::panic("pipeline", panic_message(payload))),
        };

        match outcome {
            Ok(()) => {
                info!("run complete");
                self.store.set_status(State::Succeeded, success_desc);
                self.store.add_logs(success_desc);
            }
            Err(err) => {
                error!(error = %err, "run failed");
                self.store.set_status(State::Failed, err.to_string());
                self.store.add_logs(format!("run failed: {err}"));
            }
        }
    }

    /// Run one pipeline stage with component-status bookkeeping and panic
    /// recovery.
    ///
    /// The component goes `Running` before the work, `Succeeded` on success,
    /// `Failed` with the error text on error, and `Failed` with the
    /// recovered payload on panic. The returned error is wrapped with the
    /// component name; a panic also carries the captured backtrace for
    /// operator diagnosis.
    pub(crate) async fn run_stage<F, Fut>(
        &self,
        component: &str,
        running_desc: &str,
        done_desc: &str,
        op: F,
    ) -> Result<(), Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), Error>>,
    {
        self.set_component(component, Status::running(running_desc));

        match AssertUnwindSafe(op()).catch_unwind().await {
            Ok(Ok(())) => {
                self.set_component(component, Status::succeeded(done_desc));
                Ok(())
            }
            Ok(Err(err)) => {
                self.set_component(component, Status::failed(err.to_string()));
                Err(Error::stage(component, err))
            }
            Err(payload) => {
                let message = panic_message(payload);
                let trace = Backtrace::force_capture();
                self.set_component(component, Status::failed(format!("panicked: {message}")));
                Err(Error::panic(component, format!("{message}\n{trace}")))
            }
        }
    }

    /// Record a component transition, mirroring it into the log buffer.
    ///
    /// Bookkeeping errors are logged, never propagated — they must not mask
    /// or abort the operation they were trying to report on.
    pub(crate) fn set_component(&self, component: &str, status: Status) {
        self.store.add_logs(format!(
            "[{}] {component} {}",
            status.state, status.description
        ));
        if let Err(err) = self.store.set_component_status(component, status) {
            warn!(component = %component, error = %err, "component status not recorded");
        }
    }

    /// Stage (d): install or upgrade the managed add-ons with the progress
    /// aggregator attached.
    ///
    /// The sender is handed to the add-on installer by value, so it is
    /// dropped — and the channel closed — when the installer returns or
    /// unwinds. The aggregator is joined before this returns, which is what
    /// guarantees no progress write can race the finalizer.
    pub(crate) async fn run_addons(
        &self,
        opts: &crate::config::InstallOptions,
        upgrade: bool,
    ) -> Result<(), Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let aggregator = spawn_progress_aggregator(rx, self.store.clone());

        let result = if upgrade {
            AssertUnwindSafe(self.addons.upgrade(opts, tx)).catch_unwind().await
        } else {
            AssertUnwindSafe(self.addons.install(opts, tx)).catch_unwind().await
        };

        if let Err(err) = aggregator.await {
            warn!(error = %err, "progress aggregator task failed");
        }

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(Error::stage("add-ons", err)),
            Err(payload) => Err(Error::panic("add-ons", panic_message(payload))),
        }
    }

    /// Stage (g): best-effort diagnostics capture.
    ///
    /// Never fails the run. Uses a short locally-derived timeout rather than
    /// anything resembling the caller's deadline.
    pub(crate) async fn collect_diagnostics(&self) {
        match tokio::time::timeout(SUPPORT_BUNDLE_TIMEOUT, self.support.create()).await {
            Ok(Ok(())) => {
                self.store.add_logs("support bundle collected");
            }
            Ok(Err(err)) => {
                warn!(error = %err, "support bundle collection failed");
                self.store
                    .add_logs(format!("warning: support bundle collection failed: {err}"));
            }
            Err(_) => {
                warn!(timeout = ?SUPPORT_BUNDLE_TIMEOUT, "support bundle collection timed out");
                self.store
                    .add_logs("warning: support bundle collection timed out");
            }
        }
    }
}

/// Render a recovered panic payload.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
