//! Server context and startup.

use std::sync::Arc;

use jimaku_pipeline::{Coordinator, DictionaryService, Services};

use crate::routes::build_router;
use crate::state::AppState;

/// Everything the HTTP handlers need.
pub struct AppContext {
    pub services: Arc<Services>,
    pub coordinator: Arc<Coordinator>,
    pub dictionary: DictionaryService,
}

impl AppContext {
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        let coordinator = Arc::new(Coordinator::new(services.clone()));
        let dictionary =
            DictionaryService::new(services.chat.clone(), services.settings.llm_model.clone());
        Self {
            services,
            coordinator,
            dictionary,
        }
    }
}

/// Bind and serve until ctrl-c.
pub async fn start_server(context: AppContext, port: u16) -> anyhow::Result<()> {
    let state: AppState = Arc::new(context);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
