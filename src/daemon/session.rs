//! Dev session: the context object every component works through.
//!
//! Lifecycle is `create → run → dispose`. The session owns the module
//! cache, the incremental compiler, the broadcaster and the embedded
//! bundle. Nothing here is process-global, so tests can run several
//! sessions side by side.

use chrono::Local;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::broadcast::Broadcaster;
use super::protocol::UpdateEvent;
use crate::cache::ModuleCache;
use crate::client::{bootstrap_document, EmbeddedBundle};
use crate::compiler::{Diagnostics, IncrementalCompiler, SourceTransform};
use crate::config::DevConfig;
use crate::error::{HotpackError, Result};
use crate::graph::{GraphRegenerator, ModuleId, Snapshot};
use crate::watcher::{WatchEvent, WatchKind};

/// What handling one watch event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Rebuilt { modules: Vec<ModuleId> },
    CompileFailed { path: PathBuf },
    Unlinked { module: ModuleId },
    /// Already unlinked, or the rebuild could not run at all.
    Skipped,
}

pub struct DevSession {
    cache: Arc<RwLock<ModuleCache>>,
    compiler: Arc<IncrementalCompiler>,
    broadcaster: Arc<Broadcaster>,
    diagnostics: Diagnostics,
    bundle: Mutex<EmbeddedBundle>,
    built_at: String,
    fatal: Mutex<Option<mpsc::UnboundedReceiver<HotpackError>>>,
}

impl DevSession {
    /// Build a session around the host's initial snapshot.
    pub fn create(
        cwd: PathBuf,
        config: DevConfig,
        snapshot: Snapshot,
        regenerator: Arc<dyn GraphRegenerator>,
        transform: Arc<dyn SourceTransform>,
    ) -> Result<Self> {
        let cache = ModuleCache::new(snapshot.modules);
        let bundle = EmbeddedBundle::new(cache.initial_inits())?;

        let compiler = IncrementalCompiler::new(
            cwd.clone(),
            regenerator,
            transform,
            config.transform_options(),
        )
        .with_graph_dump(config.graph_dump.as_ref().map(|p| cwd.join(p)));

        let (broadcaster, fatal) =
            Broadcaster::new(config.socket_error_policy, config.client_side_logs);

        info!(
            cwd = %cwd.display(),
            modules = bundle.len(),
            policy = ?config.socket_error_policy,
            "dev session created"
        );

        Ok(Self {
            cache: Arc::new(RwLock::new(cache)),
            compiler: Arc::new(compiler),
            broadcaster: Arc::new(broadcaster),
            diagnostics: Diagnostics::new()?,
            bundle: Mutex::new(bundle),
            built_at: Local::now().to_rfc2822(),
            fatal: Mutex::new(Some(fatal)),
        })
    }

    pub fn cache(&self) -> &Arc<RwLock<ModuleCache>> {
        &self.cache
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Recompile or unlink in response to one watcher event, and tell every
    /// connected client about it. Compile errors are reported to clients
    /// and never returned.
    ///
    /// Calls for the same module must not overlap; [`DevSession::run`]
    /// guarantees that for watcher-driven events.
    pub async fn handle_watch_event(&self, event: WatchEvent) -> WatchOutcome {
        match event.kind {
            WatchKind::Change => self.rebuild(event.module_id, event.absolute_path).await,
            WatchKind::Unlink => self.unlink(event.module_id).await,
        }
    }

    async fn rebuild(&self, id: ModuleId, path: PathBuf) -> WatchOutcome {
        debug!(module = %id, file = %path.display(), "file changed");

        let compiler = Arc::clone(&self.compiler);
        let cache = Arc::clone(&self.cache);
        let task_id = id.clone();
        let task_path = path.clone();
        let joined = tokio::task::spawn_blocking(move || {
            compiler.recompile(&cache, &task_id, &task_path)
        })
        .await;

        let result = match joined {
            Ok(Ok(result)) => result,
            Ok(Err(HotpackError::Compile { path, message })) => {
                error!(file = %path.display(), "compile error:\n{}", message);
                let report = self.diagnostics.report(&message, &path);
                self.broadcaster
                    .broadcast(&UpdateEvent::error(report.console))
                    .await;
                self.broadcaster
                    .broadcast(&UpdateEvent::dialog(report.dialog_html))
                    .await;
                return WatchOutcome::CompileFailed { path };
            }
            Ok(Err(e)) => {
                warn!(module = %id, error = %e, "rebuild failed");
                return WatchOutcome::Skipped;
            }
            Err(e) => {
                warn!(module = %id, error = %e, "rebuild task did not complete");
                return WatchOutcome::Skipped;
            }
        };

        let modules: Vec<ModuleId> = result.records.iter().map(|r| r.id.clone()).collect();
        {
            let mut cache = match self.cache.write() {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "module cache lock poisoned, dropping rebuild");
                    return WatchOutcome::Skipped;
                }
            };
            cache.register_paths(result.path_index);
            for record in result.records {
                cache.put(record);
            }
        }

        self.broadcaster
            .broadcast(&UpdateEvent::module_update(&result.patch))
            .await;
        self.broadcaster
            .broadcast(&UpdateEvent::log(format!(
                "[hotpack] rebuilt {} module(s) in {:.3} s",
                modules.len(),
                result.elapsed.as_secs_f64()
            )))
            .await;

        WatchOutcome::Rebuilt { modules }
    }

    async fn unlink(&self, id: ModuleId) -> WatchOutcome {
        let removed = match self.cache.write() {
            Ok(mut cache) => cache.unlink(&id),
            Err(e) => {
                warn!(error = %e, "module cache lock poisoned, dropping unlink");
                return WatchOutcome::Skipped;
            }
        };
        if !removed {
            debug!(module = %id, "already unlinked");
            return WatchOutcome::Skipped;
        }

        let importers = self.compiler.regenerator().module_removed(&id);
        if importers.is_empty() {
            info!(module = %id, "module unlinked");
        } else {
            let importers: Vec<&str> = importers.iter().map(ModuleId::as_str).collect();
            warn!(module = %id, ?importers, "module unlinked while still imported");
        }

        self.broadcaster.broadcast(&UpdateEvent::unlink(id.clone())).await;
        WatchOutcome::Unlinked { module: id }
    }

    /// The bootstrap page for a fresh load, with every module cached so far
    /// folded into the embedded bundle first.
    pub fn bootstrap_html(&self, port: u16) -> Result<String> {
        let mut bundle = self
            .bundle
            .lock()
            .map_err(|e| HotpackError::Config(format!("bundle lock poisoned: {}", e)))?;

        let (inits, generation) = {
            let cache = self
                .cache
                .read()
                .map_err(|e| HotpackError::Config(format!("module cache lock poisoned: {}", e)))?;
            (cache.inits_since(bundle.watermark()), cache.generation())
        };
        if !inits.is_empty() {
            debug!(modules = inits.len(), generation, "embedding cached modules");
        }
        bundle.embed(inits, generation);

        Ok(bootstrap_document(&bundle, port, &self.built_at))
    }

    /// Dispatch watch events until `shutdown` resolves or a fatal socket
    /// error arrives.
    ///
    /// Every module id gets its own worker task fed by a channel. Events for
    /// one module are handled one at a time in arrival order, while a slow
    /// rebuild never holds up other files.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<WatchEvent>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let mut fatal = self
            .fatal
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| HotpackError::Config("dev session is already running".to_string()))?;

        tokio::pin!(shutdown);
        let mut watching = true;
        let mut workers = HashMap::new();

        loop {
            tokio::select! {
                event = events.recv(), if watching => match event {
                    Some(event) => self.dispatch(&mut workers, event),
                    None => {
                        debug!("watch channel closed");
                        watching = false;
                    }
                },
                Some(err) = fatal.recv() => {
                    error!(error = %err, "fatal error, stopping dev session");
                    return Err(err);
                }
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    /// Queue `event` on its module's worker, starting one if needed.
    fn dispatch(
        self: &Arc<Self>,
        workers: &mut HashMap<ModuleId, mpsc::UnboundedSender<WatchEvent>>,
        event: WatchEvent,
    ) {
        let event = match workers.get(&event.module_id) {
            Some(worker) => match worker.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (worker, mut queue) = mpsc::unbounded_channel::<WatchEvent>();
        let session = Arc::clone(self);
        let module = event.module_id.clone();
        debug!(module = %module, "starting module worker");
        tokio::spawn(async move {
            while let Some(event) = queue.recv().await {
                session.handle_watch_event(event).await;
            }
        });

        // The receiver was just moved into a live task, so this cannot fail.
        let _ = worker.send(event);
        workers.insert(module, worker);
    }

    /// Close every client connection. The cache goes away with the session.
    pub async fn dispose(&self) {
        let closed = self.broadcaster.close_all().await;
        info!(connections = closed, "dev session disposed");
    }
}
