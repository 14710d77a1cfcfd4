//! Application runtime.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tgate_control::DynControlHandle;
use tgate_telemetry::Metrics;

use crate::config::AppConfig;
use crate::controller::CycleController;
use crate::error::AppResult;
use crate::summary::CycleSummary;

/// Main application.
pub struct Application {
    config: AppConfig,
    controller: Arc<CycleController>,
}

impl Application {
    /// Create with file feeds and the paper adapter.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let controller = Arc::new(CycleController::from_config(&config)?);
        Ok(Self::with_controller(config, controller))
    }

    pub fn with_controller(config: AppConfig, controller: Arc<CycleController>) -> Self {
        Self { config, controller }
    }

    pub fn controller(&self) -> &Arc<CycleController> {
        &self.controller
    }

    /// Run a single cycle and flush journals.
    pub async fn run_once(&self) -> AppResult<CycleSummary> {
        let summary = self.controller.run_cycle(Utc::now()).await;
        self.controller.close()?;
        summary
    }

    /// Drive cycles on the configured interval until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        info!(
            mode = %self.config.mode,
            interval_secs = self.config.cycle.interval_secs,
            cycles_run = self.controller.cycles_run(),
            "Starting loop"
        );

        let shutdown = CancellationToken::new();
        let server = if self.config.control.enabled {
            let handle: DynControlHandle = self.controller.clone();
            let config = self.config.control.clone();
            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = tgate_control::run_server(handle, config, token).await {
                    error!(error = %e, "Control server failed");
                }
            }))
        } else {
            None
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.cycle.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.controller.run_cycle(Utc::now()).await {
                        Metrics::cycle_failed();
                        error!(error = %e, "Cycle failed");
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!(cycles_run = self.controller.cycles_run(), "Shutting down");
        shutdown.cancel();
        if let Some(server) = server {
            if let Err(e) = server.await {
                warn!(error = %e, "Control server task ended abnormally");
            }
        }
        self.controller.close()?;
        Ok(())
    }
}
