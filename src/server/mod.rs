// HTTP service module

mod handlers;

pub use handlers::{create_router, ApiError};

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::data::TestSet;
use crate::models::MnistClassifier;
use crate::training::{CheckpointStore, TrainingOrchestrator};

/// Shared application state behind every handler.
pub struct DigitServer {
    /// The served classifier; replaced wholesale after a training run
    classifier: Arc<RwLock<MnistClassifier>>,
    /// Training run coordination and progress publication
    orchestrator: Arc<TrainingOrchestrator>,
    /// Checkpoint persistence
    checkpoints: Arc<CheckpointStore>,
    /// Held-out split for the random-sample endpoint, loaded on first use
    test_set: OnceCell<Arc<TestSet>>,
    /// Service configuration
    config: Config,
}

impl DigitServer {
    pub fn new(config: Config, checkpoints: CheckpointStore, classifier: MnistClassifier) -> Self {
        Self {
            classifier: Arc::new(RwLock::new(classifier)),
            orchestrator: Arc::new(TrainingOrchestrator::new()),
            checkpoints: Arc::new(checkpoints),
            test_set: OnceCell::new(),
            config,
        }
    }

    /// Start the HTTP server.
    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.config.bind_address))?;

        let app_state = Arc::new(self);
        let app = create_router(app_state).layer(TraceLayer::new_for_http());

        tracing::info!("Starting cifra server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    pub fn classifier(&self) -> &Arc<RwLock<MnistClassifier>> {
        &self.classifier
    }

    pub fn orchestrator(&self) -> &Arc<TrainingOrchestrator> {
        &self.orchestrator
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The held-out split, loading and caching it off the request thread on
    /// first access.
    pub async fn test_set(&self) -> Result<Arc<TestSet>> {
        let data_dir = self.config.data_dir.clone();
        let set = self
            .test_set
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || TestSet::load(&data_dir).map(Arc::new))
                    .await
                    .context("Test set loader task failed")?
            })
            .await?;
        Ok(Arc::clone(set))
    }
}
