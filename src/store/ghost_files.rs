//! Ghost recording files on disk

use std::io::ErrorKind;
use std::path::Path;

use tracing::{info, warn};

use crate::game::ghost::{GhostError, GhostRecording};

/// Write `recording` to `path`, creating parent directories as needed.
/// The file is replaced through a rename so readers never see half a file.
pub async fn save_recording(path: &Path, recording: &GhostRecording) -> Result<(), GhostError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let json = recording.to_json()?;
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, json).await?;
    tokio::fs::rename(&staging, path).await?;

    info!(
        path = %path.display(),
        samples = recording.positions.len(),
        "Saved ghost recording"
    );
    Ok(())
}

/// Read a recording; a missing file is `Ok(None)`
pub async fn load_recording(path: &Path) -> Result<Option<GhostRecording>, GhostError> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    GhostRecording::from_json(&json).map(Some)
}

/// Startup load: anything unreadable is logged and skipped
pub async fn load_if_present(path: &Path) -> Option<GhostRecording> {
    match load_recording(path).await {
        Ok(Some(recording)) => {
            info!(
                path = %path.display(),
                samples = recording.positions.len(),
                "Loaded ghost recording"
            );
            Some(recording)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable ghost file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ghost::PositionSample;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("ghost-test-{}", Uuid::new_v4()))
            .join("best.json")
    }

    fn recording() -> GhostRecording {
        let mut recording = GhostRecording::new(1_700_000_000_000);
        recording.positions.push(PositionSample {
            t: 0.0,
            position: [0.0, 0.4, 0.0],
        });
        recording.positions.push(PositionSample {
            t: 8.5,
            position: [0.0, 0.4, 0.2],
        });
        recording
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let path = scratch_path();
        save_recording(&path, &recording()).await.unwrap();

        let loaded = load_recording(&path).await.unwrap();
        assert_eq!(loaded, Some(recording()));

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let path = scratch_path();
        assert!(load_recording(&path).await.unwrap().is_none());
        assert!(load_if_present(&path).await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_file_is_skipped() {
        let path = scratch_path();
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "{\"meta\":").await.unwrap();

        assert!(matches!(
            load_recording(&path).await,
            Err(GhostError::Parse(_))
        ));
        assert!(load_if_present(&path).await.is_none());

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }
}
