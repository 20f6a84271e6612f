//! Upload of local template files to the rendering engine.

use std::path::{Component, Path, PathBuf};

use reportbridge_core::script::JobSpecification;
use reportbridge_engine::EngineError;

use crate::handlers::Orchestrator;

/// Scheme of template inputs that already live on the engine.
pub const ARTIFACT_SCHEME: &str = "artifact://";

impl Orchestrator {
    /// Upload every template input found under the template directory and
    /// point the report at the uploaded artifact.
    ///
    /// Ids of successful uploads are pushed to `uploaded` even when a later
    /// upload fails, so cleanup can still remove them.
    pub(crate) async fn upload_templates(
        &self,
        spec: &mut JobSpecification,
        uploaded: &mut Vec<String>,
    ) -> Result<(), EngineError> {
        let Some(dir) = self.config.template_dir.as_deref() else {
            return Ok(());
        };

        for report in spec.reports_mut() {
            let input = &report.template.input;
            if input.starts_with(ARTIFACT_SCHEME) {
                continue;
            }
            let Some(path) = template_path(dir, input) else {
                tracing::debug!(input = %input, "Template not found locally, leaving input as-is");
                continue;
            };

            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read template");
                    continue;
                }
            };
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| input.clone());

            let artifact_id = self.engine.upload_artifact(&filename, data).await?;
            tracing::info!(artifact_id = %artifact_id, filename = %filename, "Uploaded template");
            report.template.input = format!("{ARTIFACT_SCHEME}{artifact_id}/{filename}");
            uploaded.push(artifact_id);
        }
        Ok(())
    }
}

/// Existing file under `dir` named by `input`.
///
/// Absolute paths and paths leaving `dir` are never resolved.
pub fn template_path(dir: &Path, input: &str) -> Option<PathBuf> {
    let relative = Path::new(input);
    if relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return None;
    }
    let path = dir.join(relative);
    path.is_file().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_path_stays_inside_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sales.xlsx"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("q1.xlsx"), b"x").unwrap();

        assert!(template_path(dir.path(), "sales.xlsx").is_some());
        assert!(template_path(dir.path(), "nested/q1.xlsx").is_some());
        assert!(template_path(dir.path(), "missing.xlsx").is_none());
        assert!(template_path(dir.path(), "nested").is_none());
        assert!(template_path(dir.path(), "../sales.xlsx").is_none());
        assert!(template_path(dir.path(), "/etc/passwd").is_none());
    }
}
