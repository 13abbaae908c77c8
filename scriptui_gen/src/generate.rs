use crate::emit::{self, EmitError, WindowCodeBehind, WindowMarkup};
use crate::manifest::{self, ManifestDocument, ManifestError, PatchOutcome};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_GENERATED_FOLDER: &str = "Generated";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("failed to create generated folder {}: {source}", .path.display())]
    CreateFolder {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub manifest_path: PathBuf,
    pub generated_folder: String,
    pub code_behind: WindowCodeBehind,
    pub message: String,
}

impl GenerateRequest {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            generated_folder: DEFAULT_GENERATED_FOLDER.to_string(),
            code_behind: WindowCodeBehind::default(),
            message: String::new(),
        }
    }

    fn folder_path(&self) -> PathBuf {
        let project_dir = self.manifest_path.parent().unwrap_or(Path::new("."));
        project_dir.join(&self.generated_folder)
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedArtifacts {
    pub markup_path: PathBuf,
    pub code_behind_path: PathBuf,
    pub patch: PatchOutcome,
}

/// Emits the window markup and code-behind into the generated folder next
/// to the manifest, then registers that folder in the manifest.
///
/// The manifest is loaded first; nothing is written when it cannot be read
/// or parsed.
pub fn generate(request: &GenerateRequest) -> Result<GeneratedArtifacts, GenerateError> {
    let mut document = ManifestDocument::load(&request.manifest_path)?;

    let folder = request.folder_path();
    fs::create_dir_all(&folder).map_err(|source| GenerateError::CreateFolder {
        path: folder.clone(),
        source,
    })?;

    let class_name = &request.code_behind.class_name;
    let markup_path = folder.join(format!("{class_name}.xaml"));
    let code_behind_path = folder.join(format!("{class_name}.xaml.cs"));

    let markup = WindowMarkup::for_code_behind(&request.code_behind, request.message.clone());
    emit::emit_markup(&markup, &markup_path)?;
    emit::emit_code_behind(&request.code_behind, &code_behind_path)?;

    let patch = manifest::add_missing_references(
        &mut document,
        &request.manifest_path,
        &request.generated_folder,
    );
    document.save(&request.manifest_path)?;

    tracing::info!(
        manifest = %request.manifest_path.display(),
        folder = %folder.display(),
        page_added = patch.page_added,
        compile_added = patch.compile_added,
        "generated window artifacts"
    );

    Ok(GeneratedArtifacts {
        markup_path,
        code_behind_path,
        patch,
    })
}
