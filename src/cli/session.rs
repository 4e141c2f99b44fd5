// CLI session: controller wiring, background persistence and event printing
// Author: kelexine (https://github.com/kelexine)

use crate::cache::VectorCache;
use crate::config::AppConfig;
use crate::controller::{
    ControllerConfig, ControllerEvent, NoopFunctionCallHandler, RequestOutcome,
    StreamingRequestController,
};
use crate::embedding::{EmbeddingClient, HttpEmbeddingClient};
use crate::error::Result;
use crate::persistence::{FileStore, PersistenceManager, PersistenceScheduler, SchedulerHandle};
use crate::transport::HttpTransport;
use std::io::Write;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Controller plus the background persistence it relies on.
pub struct Session {
    pub controller: Arc<StreamingRequestController>,
    scheduler: Option<SchedulerHandle>,
}

impl Session {
    pub async fn start(config: &AppConfig) -> Result<Self> {
        let embedder = Arc::new(HttpEmbeddingClient::new(&config.embedding)?);
        let ttl = chrono::Duration::seconds(config.persistence.ttl_seconds as i64);
        let cache = VectorCache::new(embedder.dimension(), config.cache.clone())
            .with_ttl(ttl)
            .into_shared();

        let scheduler = if config.cache.enabled && config.persistence.enabled {
            let manager = Arc::new(persistence_manager(config));
            let restored = manager.restore_into(&cache).await;
            info!("Restored {} cache entries", restored);
            Some(PersistenceScheduler::spawn(
                manager,
                cache.clone(),
                config.persistence.flush_interval(),
                config.persistence.cleanup_interval(),
            ))
        } else {
            None
        };

        let transport = Arc::new(HttpTransport::new(&config.generation)?);
        let controller = Arc::new(StreamingRequestController::new(
            ControllerConfig::from(config),
            cache,
            embedder,
            transport,
            Arc::new(NoopFunctionCallHandler),
        ));

        Ok(Self {
            controller,
            scheduler,
        })
    }

    /// A request ended; let the scheduler flush while the user types.
    pub fn request_finished(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.notify_idle();
        }
    }

    /// Close the event channel, let the printer drain, then run the final flush.
    pub async fn finish(self, printer: JoinHandle<()>) {
        let Session {
            controller,
            scheduler,
        } = self;
        drop(controller);
        let _ = printer.await;
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
    }
}

/// File-backed persistence as configured.
pub fn persistence_manager(config: &AppConfig) -> PersistenceManager {
    let store = Arc::new(FileStore::new(config.persistence.directory.clone()));
    PersistenceManager::new(store, &config.persistence)
}

/// Print controller events as they arrive. Content events carry the full
/// text so far; only the new suffix is written when possible.
pub fn spawn_printer(controller: &StreamingRequestController, show_thinking: bool) -> JoinHandle<()> {
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        let mut printed = String::new();
        loop {
            match events.recv().await {
                Ok(ControllerEvent::Thinking { content, .. }) if show_thinking => {
                    eprintln!("[thinking] {}", content);
                }
                Ok(ControllerEvent::Content { full_text, .. }) => {
                    match full_text.strip_prefix(printed.as_str()) {
                        Some(rest) => print!("{}", rest),
                        None => print!("\n{}", full_text),
                    }
                    let _ = std::io::stdout().flush();
                    printed = full_text;
                }
                Ok(ControllerEvent::Retrying {
                    attempt, delay, error, ..
                }) => {
                    eprintln!(
                        "\n[attempt {} failed: {}; retrying in {}ms]",
                        attempt,
                        error,
                        delay.as_millis()
                    );
                    printed.clear();
                }
                Ok(ControllerEvent::Completed {
                    response,
                    from_cache,
                    ..
                }) => {
                    if from_cache {
                        println!("{}", response);
                        eprintln!("[from cache]");
                    } else {
                        println!();
                    }
                    printed.clear();
                }
                Ok(ControllerEvent::Failed { .. }) | Ok(ControllerEvent::Cancelled { .. }) => {
                    if !printed.is_empty() {
                        println!();
                    }
                    printed.clear();
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Output fell behind, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Submit one prompt; Ctrl+C cancels it.
pub async fn submit_cancellable(
    controller: &StreamingRequestController,
    prompt: &str,
) -> Result<RequestOutcome> {
    let submit = controller.submit(prompt);
    tokio::pin!(submit);

    loop {
        tokio::select! {
            result = &mut submit => return result,
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C signal, cancelling request");
                controller.cancel();
            }
        }
    }
}
