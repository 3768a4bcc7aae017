//! Vocal/background merging and speaker reference assembly.

use std::path::{Path, PathBuf};

use super::AudioComposer;
use crate::core::{CoreError, CoreResult};

impl AudioComposer {
    /// Merge the vocal track with an optional background track.
    ///
    /// Without a usable background the vocals are copied through unchanged.
    /// Otherwise the two are mixed and the vocal track sets the output length.
    pub async fn merge(
        &self,
        vocals: &Path,
        background: Option<&Path>,
        output: &Path,
    ) -> CoreResult<()> {
        if !vocals.exists() {
            return Err(CoreError::ValidationError(format!(
                "vocals file not found: {}",
                vocals.display()
            )));
        }

        match background {
            Some(bg) if bg.exists() => {
                self.media.mix_tracks(vocals, bg, output).await?;
                tracing::info!("Merged vocals and background into {}", output.display());
            }
            Some(bg) => {
                tracing::info!(
                    "Background file not found: {}, copying vocals directly",
                    bg.display()
                );
                self.media.stream_copy(vocals, output).await?;
            }
            None => {
                tracing::info!("No background track, copying vocals directly");
                self.media.stream_copy(vocals, output).await?;
            }
        }
        Ok(())
    }

    /// Join several source cuts into one reference clip.
    ///
    /// A single cut is returned as-is without touching `output`.
    pub async fn merge_reference(&self, cuts: &[PathBuf], output: &Path) -> CoreResult<PathBuf> {
        match cuts {
            [] => Err(CoreError::ValidationError(
                "no cuts to build a reference from".to_string(),
            )),
            [only] => Ok(only.clone()),
            _ => {
                self.media.concat_list(cuts, output).await?;
                Ok(output.to_path_buf())
            }
        }
    }
}
