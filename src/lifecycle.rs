//! Process lifecycle: Init builds each component and pushes a named cleanup
//! onto a LIFO stack; Shutdown runs each cleanup exactly once in reverse
//! order. A failure during Init unwinds the stack immediately so no
//! component outlives a failed startup.

use crate::engine::config::Config;
use crate::engine::database::mysql::MySqlEndpoint;
use crate::engine::snapshot::SnapshotManager;
use crate::error::Error;
use crate::server;
use actix_web::dev::ServerHandle;
use futures::future::BoxFuture;
use log::{error, info};
use std::sync::Arc;

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Named cleanup closures, run last-in first-out.
#[derive(Default)]
pub struct CleanupStack {
    entries: Vec<(String, CleanupFn)>,
}

impl CleanupStack {
    pub fn new() -> CleanupStack {
        CleanupStack::default()
    }

    pub fn push<F>(&mut self, name: &str, cleanup: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.entries.push((name.to_string(), Box::new(cleanup)));
    }

    /// Runs every cleanup exactly once, most recent first.
    pub async fn unwind(mut self) {
        while let Some((name, cleanup)) = self.entries.pop() {
            info!("cleanup: {}", name);
            cleanup().await;
        }
    }
}

/// The running gateway: every long-lived component plus the cleanup stack
/// that tears them down.
pub struct Gateway {
    manager: SnapshotManager,
    server_handle: ServerHandle,
    cleanups: CleanupStack,
}

impl Gateway {
    /// Initializes the gateway: connects the pool, builds the initial
    /// snapshot, starts the refresh loop, and binds the HTTP listener. Any
    /// failure unwinds the cleanups pushed so far and is fatal.
    pub async fn init(config: Config) -> Result<Gateway, Error> {
        let mut cleanups = CleanupStack::new();

        let settings = match config.connect_settings() {
            Ok(s) => s,
            Err(e) => {
                cleanups.unwind().await;
                return Err(e);
            }
        };
        let endpoint = match MySqlEndpoint::connect(&settings).await {
            Ok(e) => Arc::new(e),
            Err(e) => {
                cleanups.unwind().await;
                return Err(e);
            }
        };
        {
            let pool = endpoint.pool().clone();
            cleanups.push("database pool", move || {
                Box::pin(async move {
                    pool.close().await;
                })
            });
        }

        let manager = match SnapshotManager::new(endpoint.clone(), config.clone()).await {
            Ok(m) => m,
            Err(e) => {
                cleanups.unwind().await;
                return Err(e);
            }
        };

        manager.start();
        {
            let manager = manager.clone();
            cleanups.push("schema refresh loop", move || {
                Box::pin(async move {
                    manager.stop();
                    manager.wait().await;
                })
            });
        }

        let server = match server::run(manager.clone(), endpoint.clone(), config.clone()) {
            Ok(s) => s,
            Err(e) => {
                cleanups.unwind().await;
                return Err(e);
            }
        };
        let server_handle = server.handle();
        tokio::spawn(server);
        {
            let handle = server_handle.clone();
            cleanups.push("http server", move || {
                Box::pin(async move {
                    handle.stop(true).await;
                })
            });
        }

        info!(
            "tigql listening on {}:{}",
            config.server().host,
            config.server().port
        );
        Ok(Gateway {
            manager,
            server_handle,
            cleanups,
        })
    }

    pub fn manager(&self) -> &SnapshotManager {
        &self.manager
    }

    pub fn server_handle(&self) -> &ServerHandle {
        &self.server_handle
    }

    /// Runs the registered cleanups in LIFO order.
    pub async fn shutdown(self) {
        info!("shutting down");
        self.cleanups.unwind().await;
    }
}

/// Blocks until SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::CleanupStack;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Passes if cleanups run exactly once in LIFO order
    #[tokio::test]
    async fn lifo_exactly_once() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let mut stack = CleanupStack::new();

        for name in ["first", "second", "third"] {
            let order = order.clone();
            let count = count.clone();
            stack.push(name, move || {
                Box::pin(async move {
                    order.lock().unwrap().push(name.to_string());
                    count.fetch_add(1, Ordering::SeqCst);
                })
            });
        }
        stack.unwind().await;

        assert_eq!(3, count.load(Ordering::SeqCst));
        assert_eq!(
            vec!["third".to_string(), "second".to_string(), "first".to_string()],
            *order.lock().unwrap()
        );
    }
}
