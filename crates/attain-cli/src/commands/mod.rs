//! One module per subcommand, plus the wiring they share.

pub mod class;
pub mod finalize;
pub mod finalize_class;
pub mod init;
pub mod mark;
pub mod mark_all;
pub mod reopen;
pub mod report;
pub mod resolve;
pub mod show;
pub mod snapshot;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use attain_client::{create_backend, load_config_from};
use attain_core::model::{FinalResult, SnapshotId, StudentId};
use attain_core::{AuthObserver, EvaluationCoordinator, Session};

/// Logs rejected credentials; the token itself lives in config or env.
struct ExpiredTokenNotice;

impl AuthObserver for ExpiredTokenNotice {
    fn on_auth_failure(&self, status: u16) {
        warn!(
            status,
            "grading server rejected the token; update ATTAIN_TOKEN or attain.toml"
        );
    }
}

/// Build a coordinator from the resolved configuration.
pub(crate) fn connect(config_path: Option<PathBuf>) -> Result<EvaluationCoordinator> {
    let config = load_config_from(config_path.as_deref())?;
    debug!(?config, "loaded config");
    let backend = create_backend(&config)?;
    Ok(EvaluationCoordinator::new(backend)
        .with_config(config.coordinator_config())
        .with_auth_observer(Arc::new(ExpiredTokenNotice)))
}

pub(crate) async fn load_session(
    coordinator: &EvaluationCoordinator,
    student_id: StudentId,
    snapshot_id: SnapshotId,
) -> Result<Session> {
    coordinator
        .load(student_id, snapshot_id)
        .await
        .applied()
        .context("selection changed while loading")
}

pub(crate) fn print_result(result: &FinalResult) {
    println!(
        "Level {}: critical {}/{}, desirable {}/{} ({:.1}% complete)",
        result.level,
        result.critical_attained,
        result.critical_total,
        result.desirable_attained,
        result.desirable_total,
        result.completion_percent,
    );
}
