use std::path::{Path, PathBuf};

use tracing::error;

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "STORECHAT_DATA_DIR";

const APP_NAME: &str = "storechat";
const CONFIG_DB: &str = "config.redb";
const EMBEDDINGS_DB: &str = "embeddings.redb";
const CHAT_DB: &str = "chat.redb";

/// Where storechat keeps its three redb files.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve and create the data directory.
    ///
    /// `--data-dir` wins over `STORECHAT_DATA_DIR`, which wins over
    /// `$XDG_DATA_HOME/storechat`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let env = std::env::var_os(DATA_DIR_ENV_VAR).map(PathBuf::from);
        let root = match choose_root(explicit, env) {
            Some(root) => root,
            None => xdg_data_home()?,
        };
        Self::at(root)
    }

    /// Use `root` as-is, creating it if missing.
    pub fn at(root: PathBuf) -> Result<Self> {
        if let Err(e) = std::fs::create_dir_all(&root) {
            error!(path = %root.display(), "cannot create data dir: {e}");
            return Err(Error::DataDir(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join(CONFIG_DB)
    }

    /// Record embeddings, rebuilt by every reindex.
    pub fn embeddings_db(&self) -> PathBuf {
        self.root.join(EMBEDDINGS_DB)
    }

    /// Chat sessions and their messages.
    pub fn chat_db(&self) -> PathBuf {
        self.root.join(CHAT_DB)
    }
}

fn choose_root(explicit: Option<&Path>, env: Option<PathBuf>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env.filter(|p| !p.as_os_str().is_empty()))
}

fn xdg_data_home() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix(APP_NAME)
        .get_data_home()
        .ok_or_else(|| {
            Error::Config("could not determine XDG data home directory".into())
        })
}
