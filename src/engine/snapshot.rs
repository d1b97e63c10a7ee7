//! Snapshot manager: owns the process-wide current engine plus the per-role
//! engine map, coordinates the periodic refresh loop, and serializes
//! concurrent rebuild requests through a single-flight slot. Readers never
//! block on a build; they keep serving the last-published snapshot.

use crate::engine::config::Config;
use crate::engine::database::mysql::{MySqlEndpoint, SessionOptions};
use crate::engine::database::QueryFacility;
use crate::engine::context::RequestContext;
use crate::engine::reflect;
use crate::engine::Engine;
use crate::error::Error;
use crate::server::metrics;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type RefreshOutcome = Result<bool, String>;

struct ManagerInner {
    endpoint: Arc<MySqlEndpoint>,
    config: Config,
    database: String,
    /// Writer takes the exclusive lock only for the pointer swap at publish
    /// time; readers copy the Arc under the shared lock.
    current: RwLock<Arc<Engine>>,
    /// Copy-on-write: rebuilt wholesale and swapped with the snapshot.
    role_engines: RwLock<Arc<HashMap<String, Arc<Engine>>>>,
    /// Single-flight slot: joiners subscribe to the in-flight build.
    in_flight: Mutex<Option<watch::Receiver<Option<RefreshOutcome>>>>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Process-wide snapshot coordinator. Cheap to clone; every clone shares the
/// same state.
#[derive(Clone)]
pub struct SnapshotManager {
    inner: Arc<ManagerInner>,
}

impl SnapshotManager {
    /// Builds the initial snapshot (and per-role snapshots when enabled).
    /// Failure here is fatal to startup.
    pub async fn new(endpoint: Arc<MySqlEndpoint>, config: Config) -> Result<SnapshotManager, Error> {
        let (database, source) = config.effective_database()?;
        info!("reflecting database {} (selected via {})", database, source);

        let (engine, role_engines) = build_engines(&endpoint, &config, &database).await?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(SnapshotManager {
            inner: Arc::new(ManagerInner {
                endpoint,
                config,
                database,
                current: RwLock::new(Arc::new(engine)),
                role_engines: RwLock::new(Arc::new(role_engines)),
                in_flight: Mutex::new(None),
                shutdown_tx,
                loop_handle: Mutex::new(None),
            }),
        })
    }

    /// Returns the engine bound to the snapshot appropriate for the caller's
    /// role. During a refresh in progress, this is the last-published engine.
    pub fn handler_for_context(&self, request: &RequestContext) -> Arc<Engine> {
        if self.inner.config.auth().db_roles.enabled {
            if let Some(role) = request.effective_role() {
                let map = self
                    .inner
                    .role_engines
                    .read()
                    .expect("role engine lock poisoned")
                    .clone();
                if let Some(engine) = map.get(role) {
                    return engine.clone();
                }
            }
        }
        self.inner
            .current
            .read()
            .expect("snapshot lock poisoned")
            .clone()
    }

    /// Fingerprint of the currently served default snapshot.
    pub fn fingerprint(&self) -> String {
        self.inner
            .current
            .read()
            .expect("snapshot lock poisoned")
            .snapshot()
            .fingerprint()
            .to_string()
    }

    /// Triggers an immediate rebuild. A refresh already in flight is joined
    /// rather than duplicated, and its outcome is shared.
    pub async fn refresh_now(&self) -> Result<(), Error> {
        self.refresh_inner().await.map(|_| ())
    }

    async fn refresh_inner(&self) -> Result<bool, Error> {
        // claim the single-flight slot, or join the refresh already in it
        let claimed = {
            let mut slot = self.inner.in_flight.lock().expect("refresh slot poisoned");
            match slot.clone() {
                Some(rx) => Err(rx),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx);
                    Ok(tx)
                }
            }
        };
        let tx = match claimed {
            Ok(tx) => tx,
            Err(mut rx) => {
                debug!("refresh already in flight; joining");
                loop {
                    if let Some(outcome) = rx.borrow().clone() {
                        return outcome.map_err(|message| Error::SnapshotNotBuilt { message });
                    }
                    if rx.changed().await.is_err() {
                        return Err(Error::SnapshotNotBuilt {
                            message: "in-flight refresh abandoned".to_string(),
                        });
                    }
                }
            }
        };

        let result = self.build_and_publish().await;
        let shared: RefreshOutcome = match &result {
            Ok(changed) => Ok(*changed),
            Err(e) => Err(e.to_string()),
        };
        let _ = tx.send(Some(shared));
        *self.inner.in_flight.lock().expect("refresh slot poisoned") = None;
        result
    }

    /// Rebuilds every snapshot and publishes atomically when the fingerprint
    /// moved. Returns whether anything changed.
    async fn build_and_publish(&self) -> Result<bool, Error> {
        let inner = &self.inner;
        let previous = self.fingerprint();
        let (engine, role_engines) =
            build_engines(&inner.endpoint, &inner.config, &inner.database).await?;
        let changed = engine.snapshot().fingerprint() != previous;

        if changed {
            info!(
                "publishing schema snapshot {} (was {})",
                engine.snapshot().fingerprint(),
                previous
            );
        } else {
            debug!("schema unchanged at fingerprint {}", previous);
        }

        // Publish unconditionally so role snapshots track grants; the
        // changed flag only drives the refresh cadence.
        {
            let mut current = inner.current.write().expect("snapshot lock poisoned");
            *current = Arc::new(engine);
        }
        {
            let mut roles = inner.role_engines.write().expect("role engine lock poisoned");
            *roles = Arc::new(role_engines);
        }
        metrics::refresh_succeeded();
        Ok(changed)
    }

    /// Starts the background refresh loop with its adaptive interval: reset
    /// to the minimum on change, doubled up to the maximum on no-change or
    /// failure.
    pub fn start(&self) {
        let manager = self.clone();
        let min = Duration::from_secs(self.inner.config.refresh().min_interval_secs);
        let max = Duration::from_secs(self.inner.config.refresh().max_interval_secs);
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval = min;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => {
                        debug!("refresh loop exiting");
                        break;
                    }
                }
                match manager.refresh_inner().await {
                    Ok(true) => {
                        interval = min;
                    }
                    Ok(false) => {
                        interval = (interval * 2).min(max);
                    }
                    Err(e) => {
                        // the previous snapshot keeps serving
                        error!("scheduled schema refresh failed: {}", e);
                        metrics::refresh_failed();
                        interval = (interval * 2).min(max);
                    }
                }
            }
        });
        *self
            .inner
            .loop_handle
            .lock()
            .expect("loop handle poisoned") = Some(handle);
    }

    /// Signals the background loop to stop at its next tick.
    pub fn stop(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }

    /// Blocks until the background loop has exited cleanly. Call after
    /// [`SnapshotManager::stop`].
    pub async fn wait(&self) {
        let handle = self
            .inner
            .loop_handle
            .lock()
            .expect("loop handle poisoned")
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("refresh loop join failed: {}", e);
            }
        }
    }
}

/// Builds the default engine and, when role schemas are enabled, one engine
/// per configured role using a session bound to that role.
async fn build_engines(
    endpoint: &Arc<MySqlEndpoint>,
    config: &Config,
    database: &str,
) -> Result<(Engine, HashMap<String, Arc<Engine>>), Error> {
    let roles_cfg = &config.auth().db_roles;

    // The introspection role is used solely for schema builds, never for
    // end-user requests.
    let default_opts = if roles_cfg.enabled && !roles_cfg.introspection_role.is_empty() {
        SessionOptions::new().with_role(roles_cfg.introspection_role.clone(), database.to_string())
    } else {
        SessionOptions::new()
    };
    let session = endpoint.session(default_opts).await?;
    let snapshot =
        reflect::build_snapshot(&session, database, config.schema(), None).await?;
    session.release().await.ok();
    let engine = Engine::new(Arc::new(snapshot), endpoint.clone(), config.clone());

    let mut role_engines = HashMap::new();
    if roles_cfg.enabled {
        for role in &roles_cfg.roles {
            let opts = SessionOptions::new().with_role(role.clone(), database.to_string());
            let session = endpoint.session(opts).await?;
            let snapshot = reflect::build_snapshot(
                &session,
                database,
                config.schema(),
                Some(role.clone()),
            )
            .await?;
            session.release().await.ok();
            role_engines.insert(
                role.clone(),
                Arc::new(Engine::new(Arc::new(snapshot), endpoint.clone(), config.clone())),
            );
        }
    }

    Ok((engine, role_engines))
}
