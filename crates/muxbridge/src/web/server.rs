use anyhow::{Context, Result};
use colored::Colorize;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};

use crate::config::AppConfig;
use crate::web::routes::{self, AppState};

/// Web server instance
pub struct WebServer {
    state: AppState,
}

impl WebServer {
    /// Create a new web server
    pub fn new(config: AppConfig) -> Self {
        Self {
            state: AppState::new(config),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until Ctrl-C or SIGTERM, then tear down every session.
    pub async fn start(self) -> Result<()> {
        let config = self.state.config.clone();

        // Create router
        let mut app = routes::create_router(self.state.clone());

        // Serve static files if static_dir is provided
        if let Some(static_dir) = &config.static_dir {
            if static_dir.exists() {
                println!("Serving static files from: {}", static_dir.display());
                app = app.nest_service("/static", ServeDir::new(static_dir));
            } else {
                log::warn!("Static directory {} does not exist", static_dir.display());
            }
        }

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);

        let listener = tokio::net::TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind))?;

        println!(
            "{} {}",
            "🌐 muxbridge listening on".bright_green().bold(),
            format!("http://{}", config.bind).bright_cyan()
        );
        println!("   Control WebSocket:  ws://{}/ws/control/{{session}}", config.bind);
        println!("   Terminal WebSocket: ws://{}/ws/terminal/{{session}}", config.bind);
        println!("   API endpoints:      http://{}/api/control-sessions", config.bind);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        log::info!("Shutting down, destroying live sessions");
        self.state.shutdown();
        served.context("Web server failed")
    }
}

/// Resolve on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    println!("{}", "Received shutdown signal".yellow());
}
