//! 세션 저장소
//!
//! 세션 id 발급과 네임스페이스별 디렉토리 배치를 담당합니다.
//!
//! ```text
//! data_dir/
//! ├── indexes/
//! │   ├── global/          # 공용 코퍼스
//! │   └── {session_id}/    # 세션별 인덱스
//! └── uploads/
//!     └── {session_id}/    # 업로드된 원본 PDF
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RagError, Result};

const GLOBAL_DIR: &str = "global";

// ============================================================================
// Identifiers
// ============================================================================

/// 세션 id (UUID v4)
///
/// 파싱을 통과한 값만 존재하므로 경로 조작(`..` 등)이 불가능합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| RagError::InvalidSession(s.to_string()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = RagError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}

/// 인덱스 네임스페이스
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Global,
    Session(SessionId),
}

impl Namespace {
    /// 네임스페이스 디렉토리 이름
    pub fn dir_name(&self) -> String {
        match self {
            Self::Global => GLOBAL_DIR.to_string(),
            Self::Session(id) => id.to_string(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Session(id) => write!(f, "session:{}", id),
        }
    }
}

// ============================================================================
// SessionStore
// ============================================================================

/// 세션/네임스페이스 디렉토리 관리
#[derive(Debug, Clone)]
pub struct SessionStore {
    index_root: PathBuf,
    upload_root: PathBuf,
}

impl SessionStore {
    pub fn new(index_root: impl Into<PathBuf>, upload_root: impl Into<PathBuf>) -> Self {
        Self {
            index_root: index_root.into(),
            upload_root: upload_root.into(),
        }
    }

    /// 새 세션 id 발급
    pub fn new_session_id(&self) -> SessionId {
        SessionId::new()
    }

    /// 네임스페이스 인덱스 경로 (I/O 없음)
    pub fn namespace_path(&self, ns: &Namespace) -> PathBuf {
        self.index_root.join(ns.dir_name())
    }

    /// 세션 인덱스 경로 (I/O 없음)
    pub fn session_namespace_path(&self, id: &SessionId) -> PathBuf {
        self.namespace_path(&Namespace::Session(*id))
    }

    /// 세션 업로드 디렉토리 (I/O 없음)
    pub fn upload_dir(&self, id: &SessionId) -> PathBuf {
        self.upload_root.join(id.to_string())
    }

    pub fn index_root(&self) -> &Path {
        &self.index_root
    }

    /// 세션 생성 - id 발급 후 디렉토리 생성
    pub fn create_session(&self) -> Result<SessionId> {
        let id = self.new_session_id();
        self.ensure_session_dirs(&id)?;
        tracing::info!("Created session {}", id);
        Ok(id)
    }

    /// 세션 디렉토리가 없으면 생성
    pub fn ensure_session_dirs(&self, id: &SessionId) -> Result<()> {
        fs::create_dir_all(self.session_namespace_path(id))?;
        fs::create_dir_all(self.upload_dir(id))?;
        Ok(())
    }

    /// 세션 삭제 (인덱스 + 업로드). 없는 세션이어도 성공.
    pub fn delete_session(&self, id: &SessionId) -> Result<()> {
        remove_dir_if_exists(&self.session_namespace_path(id))?;
        remove_dir_if_exists(&self.upload_dir(id))?;
        tracing::info!("Deleted session {}", id);
        Ok(())
    }

    /// 인덱스 디렉토리가 있는 네임스페이스 목록
    pub fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let entries = match fs::read_dir(&self.index_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut namespaces = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == GLOBAL_DIR {
                namespaces.push(Namespace::Global);
            } else if let Ok(id) = SessionId::parse(&name) {
                namespaces.push(Namespace::Session(id));
            }
        }

        // global 먼저, 나머지는 이름순
        namespaces.sort_by_key(|ns| match ns {
            Namespace::Global => (0, String::new()),
            Namespace::Session(id) => (1, id.to_string()),
        });
        Ok(namespaces)
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Tests
// ============================================================================
