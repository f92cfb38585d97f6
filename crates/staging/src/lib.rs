//! Asset staging: copy bundled, read-only assets into writable scratch
//! storage and mint the session tokens the host places files from.

use std::{
    collections::HashMap,
    fmt,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::info;
use uuid::Uuid;

use shared::domain::SessionToken;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("bundled asset not found: {path}")]
    AssetMissing { path: String },
    #[error("staging i/o failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("session token mint failed: {0}")]
    TokenMint(String),
}

/// Read-only source of files shipped with the panel bundle.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Resolve `relative` inside the bundle and read its bytes.
    async fn read(&self, relative: &str) -> Result<Vec<u8>, StageError>;
}

/// Writable scratch area the host can place files from.
#[async_trait]
pub trait ScratchStore: Send + Sync {
    /// Write `bytes` to the entry `name`, overwriting any previous copy.
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StageError>;

    /// Mint a session token for a file previously written to this store.
    async fn mint_session_token(&self, path: &Path) -> Result<SessionToken, StageError>;
}

/// Bundle directory on local disk.
#[derive(Debug, Clone)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StageError> {
        let rel = Path::new(relative);
        let escapes = rel.is_absolute()
            || rel
                .components()
                .any(|component| matches!(component, Component::ParentDir));
        if escapes {
            // Anything outside the bundle namespace does not exist as far as
            // callers are concerned.
            return Err(StageError::AssetMissing {
                path: relative.to_string(),
            });
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl AssetSource for DirAssetSource {
    async fn read(&self, relative: &str) -> Result<Vec<u8>, StageError> {
        let path = self.resolve(relative)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StageError::AssetMissing {
                    path: relative.to_string(),
                })
            }
            Err(err) => Err(StageError::Io {
                path: path.display().to_string(),
                source: err,
            }),
        }
    }
}

/// Why a session token was refused at consume time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Unknown,
    AlreadyConsumed,
    CopyRemoved,
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            TokenRejection::Unknown => "token was never minted in this session",
            TokenRejection::AlreadyConsumed => "token was already consumed",
            TokenRejection::CopyRemoved => "scratch copy no longer exists",
        };
        f.write_str(reason)
    }
}

/// One host session's token registry.
///
/// A minted token resolves while its scratch copy still exists and is
/// consumed at most once. The registry dies with the process; tokens never
/// survive a session.
#[derive(Default)]
pub struct SessionLedger {
    entries: Mutex<HashMap<SessionToken, LedgerEntry>>,
}

struct LedgerEntry {
    path: PathBuf,
    consumed: bool,
}

impl SessionLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn mint(&self, path: &Path) -> SessionToken {
        let token = SessionToken(format!("sess-{}", Uuid::new_v4()));
        let mut entries = self.entries.lock().await;
        entries.insert(
            token.clone(),
            LedgerEntry {
                path: path.to_path_buf(),
                consumed: false,
            },
        );
        token
    }

    /// Resolve and consume a token the way the host's placement does.
    pub async fn consume(&self, token: &SessionToken) -> Result<PathBuf, TokenRejection> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(token).ok_or(TokenRejection::Unknown)?;
        if entry.consumed {
            return Err(TokenRejection::AlreadyConsumed);
        }
        if !entry.path.exists() {
            return Err(TokenRejection::CopyRemoved);
        }
        entry.consumed = true;
        Ok(entry.path.clone())
    }
}

/// Scratch directory on local disk plus the ledger tracking tokens minted
/// for files inside it.
pub struct DirScratchStore {
    root: PathBuf,
    ledger: Arc<SessionLedger>,
}

impl DirScratchStore {
    /// Opens the store, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>, ledger: Arc<SessionLedger>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("create scratch directory {}", root.display()))?;
        Ok(Self { root, ledger })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ScratchStore for DirScratchStore {
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, StageError> {
        let path = self.root.join(name);
        fs::write(&path, bytes).await.map_err(|source| StageError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(path)
    }

    async fn mint_session_token(&self, path: &Path) -> Result<SessionToken, StageError> {
        if !path.starts_with(&self.root) {
            return Err(StageError::TokenMint(format!(
                "{} is outside the scratch directory",
                path.display()
            )));
        }
        Ok(self.ledger.mint(path).await)
    }
}

/// Outcome of a completed staging pass.
#[derive(Debug, Clone)]
pub struct StagedAsset {
    pub token: SessionToken,
    pub scratch_path: PathBuf,
    pub byte_len: usize,
}

/// Composes the bundle source and the scratch store into the staging
/// operation: resolve, copy, mint.
pub struct AssetStager {
    assets: Arc<dyn AssetSource>,
    scratch: Arc<dyn ScratchStore>,
}

impl AssetStager {
    pub fn new(assets: Arc<dyn AssetSource>, scratch: Arc<dyn ScratchStore>) -> Self {
        Self { assets, scratch }
    }

    /// Copy `relative` out of the bundle into scratch storage and mint a
    /// session token for the copy. Nothing is retried and a failed pass
    /// leaves whatever it had written so far in place.
    pub async fn stage(&self, relative: &str) -> Result<StagedAsset, StageError> {
        info!(asset = relative, "staging: copying bundled asset to scratch");
        let bytes = self.assets.read(relative).await?;
        let path = self.scratch.write(&scratch_name(relative), &bytes).await?;
        info!(path = %path.display(), "staging: scratch copy written");
        let token = self.scratch.mint_session_token(&path).await?;
        info!(token = %token, "staging: session token minted");
        Ok(StagedAsset {
            token,
            scratch_path: path,
            byte_len: bytes.len(),
        })
    }

    /// Read the bundled asset without staging it, for preview purposes.
    pub async fn peek(&self, relative: &str) -> Result<Vec<u8>, StageError> {
        self.assets.read(relative).await
    }
}

/// Fixed per source name so repeated attempts overwrite one entry instead
/// of accumulating copies.
fn scratch_name(relative: &str) -> String {
    let file_name = Path::new(relative)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "asset".to_string());
    format!("staged-{file_name}")
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
