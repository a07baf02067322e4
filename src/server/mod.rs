//! HTTP 서버
//!
//! | Method | Path              | 설명                         |
//! |--------|-------------------|------------------------------|
//! | POST   | /sessions         | 새 세션                      |
//! | POST   | /upload           | PDF 업로드 (multipart)       |
//! | POST   | /chat             | 질문                         |
//! | DELETE | /sessions/:id     | 세션 삭제 (멱등)             |
//! | GET    | /health           | liveness                     |

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::error::{RagError, Result};
use crate::service::RagService;

/// 핸들러 공유 상태
pub type AppState = Arc<RagService>;

/// RAG HTTP 서버
pub struct RagServer {
    state: AppState,
}

impl RagServer {
    pub fn new(service: Arc<RagService>) -> Self {
        Self { state: service }
    }

    /// 전체 라우터
    pub fn build_router(&self) -> Router {
        build_router(Arc::clone(&self.state))
    }

    /// 설정된 주소에서 서버 시작 (Ctrl-C 시 종료)
    pub async fn start(self) -> Result<()> {
        let server = &self.state.config().server;
        let addr: SocketAddr = format!("{}:{}", server.host, server.port)
            .parse()
            .map_err(|e| RagError::Config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Listening on http://{}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

pub fn build_router(state: AppState) -> Router {
    let max_upload = state.config().server.max_upload_bytes;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/sessions", post(routes::create_session))
        .route("/sessions/:id", delete(routes::delete_session))
        .route(
            "/upload",
            post(routes::upload).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/chat", post(routes::chat))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
