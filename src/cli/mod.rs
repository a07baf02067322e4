//! CLI 모듈
//!
//! pdf-chat-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::answer::truncate_text;
use crate::config::{has_api_key, RagConfig};
use crate::knowledge::{IndexRegistry, Namespace, SessionId, SessionStore};
use crate::server::RagServer;
use crate::service::{ChatRequest, RagService};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "pdf-chat-rag")]
#[command(version, about = "PDF 문서 기반 RAG 질의응답 서비스", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// HTTP 서버 실행
    Serve {
        /// 바인드 주소
        #[arg(long)]
        host: Option<String>,

        /// 포트
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// PDF 파일을 세션 또는 글로벌 인덱스에 추가
    Ingest {
        /// 수집할 PDF 파일들
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// 대상 세션 id (없으면 새 세션 생성)
        #[arg(short, long, conflicts_with = "global")]
        session: Option<String>,

        /// 글로벌 코퍼스에 추가
        #[arg(short, long)]
        global: bool,
    },

    /// 질문하기
    Ask {
        /// 질문
        query: String,

        /// 세션 id
        #[arg(short, long)]
        session: Option<String>,

        /// 네임스페이스별 검색 개수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// 글로벌 코퍼스 검색 안 함
        #[arg(long)]
        no_global: bool,
    },

    /// 새 세션 생성
    NewSession,

    /// 세션 삭제 (인덱스 + 업로드)
    DeleteSession {
        /// 삭제할 세션 id
        id: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RagConfig::from_env().context("설정 로드 실패")?;

    match cli.command {
        Commands::Serve { host, port } => cmd_serve(config, host, port).await,
        Commands::Ingest {
            files,
            session,
            global,
        } => cmd_ingest(config, files, session, global).await,
        Commands::Ask {
            query,
            session,
            top_k,
            no_global,
        } => cmd_ask(config, query, session, top_k, no_global).await,
        Commands::NewSession => cmd_new_session(config),
        Commands::DeleteSession { id } => cmd_delete_session(config, &id).await,
        Commands::Status => cmd_status(config).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 서버 실행 (serve)
///
/// 글로벌 인덱스가 없으면 기본 코퍼스를 먼저 수집합니다.
async fn cmd_serve(mut config: RagConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let service = Arc::new(open_service(config)?);

    match service.bootstrap_global_corpus().await {
        Ok(Some(report)) => tracing::info!(
            "Global corpus ready: {} document(s), {} chunks",
            report.documents.len(),
            report.total_chunks
        ),
        Ok(None) => {}
        Err(e) => tracing::warn!("Default corpus not loaded: {}", e),
    }

    RagServer::new(service)
        .start()
        .await
        .context("서버 실행 실패")
}

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(
    config: RagConfig,
    files: Vec<PathBuf>,
    session: Option<String>,
    global: bool,
) -> Result<()> {
    let service = open_service(config)?;

    let ns = if global {
        Namespace::Global
    } else if let Some(id) = session {
        Namespace::Session(SessionId::parse(&id)?)
    } else {
        let id = service.create_session()?;
        println!("[*] 새 세션: {}", id);
        Namespace::Session(id)
    };

    println!("[*] {} 파일 수집 중 → {}", files.len(), ns);
    let report = service.ingest(&files, ns).await.context("수집 실패")?;

    for doc in &report.documents {
        println!("  [OK] {}", doc);
    }
    for failure in &report.failures {
        println!("  [!] {}: {}", failure.file, failure.error);
    }
    println!();
    println!(
        "[OK] {} 청크 추가 (총 {} 청크)",
        report.chunks_added, report.total_chunks
    );

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    config: RagConfig,
    query: String,
    session: Option<String>,
    top_k: Option<usize>,
    no_global: bool,
) -> Result<()> {
    let session_id = session.as_deref().map(SessionId::parse).transpose()?;
    let service = open_service(config)?;

    let request = ChatRequest {
        query,
        session_id,
        top_k,
        use_global: !no_global,
    };
    let response = service.chat(&request).await?;

    println!("[{}]", response.mode);
    println!();
    println!("{}", response.answer);

    if !response.sources.is_empty() {
        println!();
        println!("출처:");
        for (i, source) in response.sources.iter().enumerate() {
            println!(
                "{}. {} (p.{}) [{:.3}]",
                i + 1,
                source.doc_name,
                source.page,
                source.score
            );
            println!("   {}", truncate_text(&source.preview, 80));
        }
    }

    Ok(())
}

/// 세션 생성 명령어 (new-session)
fn cmd_new_session(config: RagConfig) -> Result<()> {
    let store = SessionStore::new(config.index_root(), config.upload_root());
    let id = store.create_session()?;
    println!("{}", id);
    Ok(())
}

/// 세션 삭제 명령어 (delete-session)
async fn cmd_delete_session(config: RagConfig, id: &str) -> Result<()> {
    let id = SessionId::parse(id)?;
    let registry = IndexRegistry::new(SessionStore::new(config.index_root(), config.upload_root()));
    registry.delete_session(&id).await?;
    println!("[OK] 세션 삭제: {}", id);
    Ok(())
}

/// 상태 확인 명령어 (status)
async fn cmd_status(config: RagConfig) -> Result<()> {
    println!("pdf-chat-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match &config.default_corpus {
        Some(path) => println!("[*] 기본 코퍼스: {}", path.display()),
        None => println!("[*] 기본 코퍼스: 없음"),
    }

    let registry = IndexRegistry::new(SessionStore::new(config.index_root(), config.upload_root()));
    let stats = registry.stats().await?;

    if stats.is_empty() {
        println!("[*] 인덱스 없음");
    }
    for ns in stats {
        println!(
            "[OK] {}: {} 청크 ({}, {} dims)",
            ns.namespace, ns.chunks, ns.embedding_model, ns.dimension
        );
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// API 키 확인 후 서비스 생성
fn open_service(config: RagConfig) -> Result<RagService> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }

    RagService::from_config(config).context("서비스 초기화 실패")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ingest_global() {
        let cli = Cli::try_parse_from(["pdf-chat-rag", "ingest", "a.pdf", "b.pdf", "--global"])
            .unwrap();
        match cli.command {
            Commands::Ingest {
                files,
                session,
                global,
            } => {
                assert_eq!(files.len(), 2);
                assert!(session.is_none());
                assert!(global);
            }
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn test_session_conflicts_with_global() {
        let id = SessionId::new().to_string();
        let result = Cli::try_parse_from([
            "pdf-chat-rag",
            "ingest",
            "a.pdf",
            "--global",
            "--session",
            id.as_str(),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_ingest_requires_files() {
        assert!(Cli::try_parse_from(["pdf-chat-rag", "ingest"]).is_err());
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from(["pdf-chat-rag", "ask", "what?", "-k", "2", "--no-global"])
            .unwrap();
        match cli.command {
            Commands::Ask {
                query,
                top_k,
                no_global,
                ..
            } => {
                assert_eq!(query, "what?");
                assert_eq!(top_k, Some(2));
                assert!(no_global);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_parse_delete_session() {
        let cli = Cli::try_parse_from(["pdf-chat-rag", "delete-session", "abc"]).unwrap();
        assert!(matches!(cli.command, Commands::DeleteSession { id } if id == "abc"));
    }
}
