use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configures the file-backed `StateProvider`. `base_dir` holds one JSON
/// file per key (see `sa_domain::session::sanitize_key`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateProviderConfig {
    #[serde(default = "d_state_path")]
    pub base_dir: PathBuf,
}

impl Default for StateProviderConfig {
    fn default() -> Self {
        Self {
            base_dir: d_state_path(),
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data/state")
}
