//! Fitness gateway abstraction and the file-watching production gateway.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use synthq_core::IndividualId;
use tracing::debug;

/// Opaque token identifying one submitted fitness measurement.
///
/// Produced by [`FitnessGateway::submit`] and handed back on every poll. The
/// content is gateway-specific; for [`FileGateway`] it is the sample
/// directory path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitnessHandle(pub String);

/// Error raised when the gateway itself misbehaves.
#[derive(Debug, thiserror::Error)]
#[error("fitness gateway failure: {0}")]
pub struct GatewayError(pub String);

/// Result of polling for a fitness value.
#[derive(Debug, Clone, PartialEq)]
pub enum FitnessPoll {
    /// The analysis pipeline produced a fitness value
    Ready(f64),
    /// Measurement still in progress
    Pending,
    /// The analysis pipeline reported a failure for this sample
    Failed(String),
}

/// Bridge to the external analysis pipeline that scores samples.
///
/// Submission registers a sample for measurement; polling is non-blocking
/// and the scheduler decides the polling cadence and the per-individual
/// deadline.
#[async_trait]
pub trait FitnessGateway: Send + Sync {
    /// Register an individual's sample for fitness measurement.
    async fn submit(&self, id: IndividualId) -> std::result::Result<FitnessHandle, GatewayError>;

    /// Check whether a fitness value is available yet.
    async fn poll(&self, handle: &FitnessHandle) -> std::result::Result<FitnessPoll, GatewayError>;
}

#[derive(Deserialize)]
struct FitnessRecord {
    fitness: f64,
}

/// File-watching gateway: one sample directory per individual.
///
/// `submit` creates `<root>/<individual-id>/`; the external analysis
/// pipeline drops a `fitness.json` (`{ "fitness": <number> }`) into that
/// directory once the spectrum has been processed. `poll` reports `Pending`
/// until that file exists and parses.
pub struct FileGateway {
    root: PathBuf,
}

impl FileGateway {
    /// Gateway rooted at the experiment's data directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FitnessGateway for FileGateway {
    async fn submit(&self, id: IndividualId) -> std::result::Result<FitnessHandle, GatewayError> {
        let dir = self.root.join(id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| GatewayError(format!("create sample dir {}: {e}", dir.display())))?;
        debug!(%id, dir = %dir.display(), "registered sample directory");
        Ok(FitnessHandle(dir.to_string_lossy().into_owned()))
    }

    async fn poll(&self, handle: &FitnessHandle) -> std::result::Result<FitnessPoll, GatewayError> {
        let path = Path::new(&handle.0).join("fitness.json");
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(FitnessPoll::Pending),
            Err(e) => return Err(GatewayError(format!("read {}: {e}", path.display()))),
        };

        // A half-written record does not parse; report it as not ready and
        // pick it up complete on the next poll.
        match serde_json::from_slice::<FitnessRecord>(&bytes) {
            Ok(record) if record.fitness.is_finite() => Ok(FitnessPoll::Ready(record.fitness)),
            Ok(record) => Ok(FitnessPoll::Failed(format!(
                "non-finite fitness {}",
                record.fitness
            ))),
            Err(_) => Ok(FitnessPoll::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_creates_sample_directory() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FileGateway::new(dir.path());
        let id = IndividualId::new();

        let handle = gateway.submit(id).await.unwrap();
        assert!(Path::new(&handle.0).is_dir());
        assert!(handle.0.contains(&id.to_string()));
    }

    #[tokio::test]
    async fn poll_pending_until_fitness_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FileGateway::new(dir.path());
        let handle = gateway.submit(IndividualId::new()).await.unwrap();

        assert_eq!(gateway.poll(&handle).await.unwrap(), FitnessPoll::Pending);

        std::fs::write(
            Path::new(&handle.0).join("fitness.json"),
            r#"{ "fitness": 4.2 }"#,
        )
        .unwrap();
        assert_eq!(
            gateway.poll(&handle).await.unwrap(),
            FitnessPoll::Ready(4.2)
        );
    }

    #[tokio::test]
    async fn poll_treats_unparseable_record_as_pending() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FileGateway::new(dir.path());
        let handle = gateway.submit(IndividualId::new()).await.unwrap();

        std::fs::write(Path::new(&handle.0).join("fitness.json"), "{ \"fitn").unwrap();
        assert_eq!(gateway.poll(&handle).await.unwrap(), FitnessPoll::Pending);
    }
}
