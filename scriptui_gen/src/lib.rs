//! Build-time half of ScriptUI: emits window code-behind and markup for a
//! DSL script and registers the generated folder in the project manifest.

pub mod emit;
pub mod generate;
pub mod manifest;

pub use emit::{
    EmitError, SourceBuilder, SourceOrigin, Statement, WindowCodeBehind, WindowMarkup, emit,
};
pub use generate::{GenerateError, GenerateRequest, GeneratedArtifacts, generate};
pub use manifest::{ItemKind, ItemReference, ManifestDocument, ManifestError, PatchOutcome, patch};
