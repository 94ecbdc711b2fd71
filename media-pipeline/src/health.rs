//! Health check endpoint for the media pipeline
//!
//! Provides HTTP health check endpoint for orchestration and monitoring.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dispatcher::{DispatcherStats, JobIntake};

#[derive(Clone)]
struct HealthState {
    stats: Arc<DispatcherStats>,
    intake: JobIntake,
    workers: usize,
}

/// Health check server state
pub struct HealthServer {
    port: u16,
    state: HealthState,
}

impl HealthServer {
    /// Create a new health check server
    pub fn new(port: u16, stats: Arc<DispatcherStats>, intake: JobIntake, workers: usize) -> Self {
        Self {
            port,
            state: HealthState {
                stats,
                intake,
                workers,
            },
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/api/health", get(health_check))
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` fires
    pub async fn start(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = self.router();

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind health check server to {}: {}", addr, e))?;

        info!(port = self.port, "Health check server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| anyhow::anyhow!("Health check server error: {}", e))?;

        info!("Health check server stopped");
        Ok(())
    }
}

/// Health check handler
async fn health_check(State(state): State<HealthState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "media-pipeline",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "workers": state.workers,
        "active": state.stats.active(),
        "ready": state.stats.ready(),
        "failed": state.stats.failed(),
        "queue_depth": state.intake.depth(),
    }))
}
