//! Build manifest patching.
//!
//! The patcher makes sure a project file compiles the generated artifacts
//! folder: one `Page` glob for markup and one `Compile` glob for
//! code-behind. The document is kept as its original text and edits are
//! spliced in before the root closing tag, so nothing outside the insertion
//! point changes.
//!
//! Duplicate detection is a case-sensitive substring test on the `Include`
//! attribute. Any existing reference that merely contains the folder name
//! suppresses insertion, so a near-miss such as `generated\*.cs` or
//! `Generated/*.cs` for folder `Generated` is not detected. The patcher is
//! conservative about re-adding, not precise about matching.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_INDENT: &str = "  ";
const UTF8_BOM: char = '\u{feff}';

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse manifest {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: SyntaxError,
    },

    #[error("failed to write manifest {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("byte {position}: {message}")]
pub struct SyntaxError {
    pub position: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Page,
    Compile,
}

impl ItemKind {
    pub const ALL: [ItemKind; 2] = [ItemKind::Page, ItemKind::Compile];

    pub fn element_name(self) -> &'static str {
        match self {
            ItemKind::Page => "Page",
            ItemKind::Compile => "Compile",
        }
    }

    /// File extension globbed by the generated include pattern.
    pub fn extension(self) -> &'static str {
        match self {
            ItemKind::Page => "xaml",
            ItemKind::Compile => "cs",
        }
    }

    /// `Generated` becomes `Generated\*.xaml` or `Generated\*.cs`.
    pub fn include_pattern(self, generated_folder: &str) -> String {
        format!("{generated_folder}\\*.{}", self.extension())
    }

    fn from_element_name(name: &[u8]) -> Option<Self> {
        match name {
            b"Page" => Some(ItemKind::Page),
            b"Compile" => Some(ItemKind::Compile),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReference {
    pub kind: ItemKind,
    pub include: String,
}

impl ItemReference {
    pub fn references(&self, kind: ItemKind, generated_folder: &str) -> bool {
        self.kind == kind && self.include.contains(generated_folder)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    pub page_added: bool,
    pub compile_added: bool,
}

impl PatchOutcome {
    pub fn changed(&self) -> bool {
        self.page_added || self.compile_added
    }
}

#[derive(Debug, Clone)]
enum RootElement {
    Open { close_start: usize },
    SelfClosing { start: usize, end: usize, name: String },
}

#[derive(Debug, Clone)]
pub struct ManifestDocument {
    text: String,
    items: Vec<ItemReference>,
    root: RootElement,
    line_ending: &'static str,
    indent: String,
    pending: Vec<ItemReference>,
}

impl ManifestDocument {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ManifestError::NotFound {
                path: path.to_path_buf(),
            },
            io::ErrorKind::InvalidData => ManifestError::Parse {
                path: path.to_path_buf(),
                source: SyntaxError::new(0, "manifest is not valid UTF-8"),
            },
            _ => ManifestError::Read {
                path: path.to_path_buf(),
                source,
            },
        })?;

        Self::parse(text).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: String) -> Result<Self, SyntaxError> {
        let offset = if text.starts_with(UTF8_BOM) {
            UTF8_BOM.len_utf8()
        } else {
            0
        };
        let body = &text[offset..];

        let mut reader = Reader::from_str(body);
        let mut items = Vec::new();
        let mut root = None;
        let mut first_child_start = None;
        let mut depth = 0_usize;

        loop {
            let before = position(&reader)?;
            let event = reader
                .read_event()
                .map_err(|err| SyntaxError::new(offset + before, err.to_string()))?;

            match event {
                Event::Start(element) => {
                    if depth == 0 && root.is_some() {
                        return Err(SyntaxError::new(offset + before, "multiple root elements"));
                    }
                    if depth == 1 && first_child_start.is_none() {
                        first_child_start = Some(before);
                    }
                    if depth >= 1 {
                        collect_item(&element, &mut items, offset + before)?;
                    }
                    depth += 1;
                }
                Event::Empty(element) => {
                    if depth == 0 {
                        if root.is_some() {
                            return Err(SyntaxError::new(
                                offset + before,
                                "multiple root elements",
                            ));
                        }
                        let end = position(&reader)?;
                        root = Some(RootElement::SelfClosing {
                            start: offset + before,
                            end: offset + end,
                            name: String::from_utf8_lossy(element.name().as_ref()).into_owned(),
                        });
                        continue;
                    }
                    if depth == 1 && first_child_start.is_none() {
                        first_child_start = Some(before);
                    }
                    collect_item(&element, &mut items, offset + before)?;
                }
                Event::End(_) => {
                    if depth == 1 && root.is_none() {
                        root = Some(RootElement::Open {
                            close_start: offset + before,
                        });
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if depth != 0 {
            return Err(SyntaxError::new(text.len(), "unclosed root element"));
        }
        let root = root.ok_or_else(|| SyntaxError::new(0, "manifest has no root element"))?;

        let indent = first_child_start
            .map(|start| indent_before(body, start))
            .unwrap_or_else(|| DEFAULT_INDENT.to_string());
        let line_ending = if text.contains("\r\n") { "\r\n" } else { "\n" };

        Ok(Self {
            text,
            items,
            root,
            line_ending,
            indent,
            pending: Vec::new(),
        })
    }

    /// Item references in document order, followed by any appended ones.
    pub fn items(&self) -> impl Iterator<Item = &ItemReference> {
        self.items.iter().chain(self.pending.iter())
    }

    pub fn has_reference(&self, kind: ItemKind, generated_folder: &str) -> bool {
        self.items()
            .any(|item| item.references(kind, generated_folder))
    }

    /// Queues a new `<ItemGroup>` holding a single item of `kind`.
    pub fn append_item_group(&mut self, kind: ItemKind, include: impl Into<String>) {
        self.pending.push(ItemReference {
            kind,
            include: include.into(),
        });
    }

    pub fn render(&self) -> String {
        if self.pending.is_empty() {
            return self.text.clone();
        }

        let groups = self.render_item_groups();
        let mut out = String::with_capacity(self.text.len() + groups.len() + 16);

        match &self.root {
            RootElement::Open { close_start } => {
                let (head, tail) = self.text.split_at(*close_start);
                let trimmed = head.trim_end_matches([' ', '\t']);
                out.push_str(trimmed);
                if !trimmed.ends_with('\n') {
                    out.push_str(self.line_ending);
                }
                out.push_str(&groups);
                // Whitespace that indented the close tag moves with it.
                out.push_str(&head[trimmed.len()..]);
                out.push_str(tail);
            }
            RootElement::SelfClosing { start, end, name } => {
                let tag = &self.text[*start..*end];
                let open = tag.trim_end_matches("/>").trim_end();
                out.push_str(&self.text[..*start]);
                out.push_str(open);
                out.push('>');
                out.push_str(self.line_ending);
                out.push_str(&groups);
                out.push_str("</");
                out.push_str(name);
                out.push('>');
                out.push_str(&self.text[*end..]);
            }
        }

        out
    }

    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        fs::write(path, self.render()).map_err(|source| ManifestError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn render_item_groups(&self) -> String {
        let indent = &self.indent;
        let nl = self.line_ending;
        let mut out = String::new();

        for item in &self.pending {
            let name = item.kind.element_name();
            let include = escape(item.include.as_str());
            out.push_str(&format!("{indent}<ItemGroup>{nl}"));
            out.push_str(&format!("{indent}{indent}<{name} Include=\"{include}\" />{nl}"));
            out.push_str(&format!("{indent}</ItemGroup>{nl}"));
        }

        out
    }
}

/// Ensures `manifest_path` references `generated_folder` for both markup
/// pages and compiled sources, then writes the manifest back in place.
pub fn patch(
    manifest_path: impl AsRef<Path>,
    generated_folder: &str,
) -> Result<PatchOutcome, ManifestError> {
    let manifest_path = manifest_path.as_ref();
    let mut document = ManifestDocument::load(manifest_path)?;
    let outcome = add_missing_references(&mut document, manifest_path, generated_folder);
    document.save(manifest_path)?;
    Ok(outcome)
}

/// Queues an item group for each kind the document does not yet reference.
pub(crate) fn add_missing_references(
    document: &mut ManifestDocument,
    manifest_path: &Path,
    generated_folder: &str,
) -> PatchOutcome {
    let mut outcome = PatchOutcome::default();

    for kind in ItemKind::ALL {
        if document.has_reference(kind, generated_folder) {
            tracing::debug!(
                manifest = %manifest_path.display(),
                %kind,
                generated_folder,
                "manifest already references generated folder"
            );
            continue;
        }

        let include = kind.include_pattern(generated_folder);
        tracing::info!(
            manifest = %manifest_path.display(),
            %kind,
            include = %include,
            "adding item group"
        );
        document.append_item_group(kind, include);

        match kind {
            ItemKind::Page => outcome.page_added = true,
            ItemKind::Compile => outcome.compile_added = true,
        }
    }

    outcome
}

fn collect_item(
    element: &BytesStart<'_>,
    items: &mut Vec<ItemReference>,
    at: usize,
) -> Result<(), SyntaxError> {
    let Some(kind) = ItemKind::from_element_name(element.local_name().as_ref()) else {
        return Ok(());
    };

    for attr in element.attributes() {
        let attr = attr.map_err(|err| SyntaxError::new(at, err.to_string()))?;
        if attr.key.local_name().as_ref() != b"Include" {
            continue;
        }

        let include = attr
            .unescape_value()
            .map_err(|err| SyntaxError::new(at, err.to_string()))?;
        items.push(ItemReference {
            kind,
            include: include.into_owned(),
        });
        break;
    }

    Ok(())
}

fn position(reader: &Reader<&[u8]>) -> Result<usize, SyntaxError> {
    usize::try_from(reader.buffer_position())
        .map_err(|_| SyntaxError::new(usize::MAX, "manifest offset exceeds usize"))
}

fn indent_before(body: &str, start: usize) -> String {
    let line = match body[..start].rfind('\n') {
        Some(newline) => &body[newline + 1..start],
        None => return DEFAULT_INDENT.to_string(),
    };

    if !line.is_empty() && line.chars().all(|ch| ch == ' ' || ch == '\t') {
        line.to_string()
    } else {
        DEFAULT_INDENT.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SDK_PROJECT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Project Sdk="Microsoft.NET.Sdk">
  <!-- application settings -->
  <PropertyGroup>
    <OutputType>WinExe</OutputType>
    <TargetFramework>net8.0-windows10.0.19041.0</TargetFramework>
  </PropertyGroup>
  <ItemGroup>
    <Page Include="Views\Settings.xaml" />
    <Compile Include="Views\Settings.xaml.cs" />
    <PackageReference Include="Microsoft.WindowsAppSDK" Version="1.5.0" />
  </ItemGroup>
</Project>
"#;

    fn write_manifest(contents: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("App.csproj");
        fs::write(&path, contents).expect("write manifest");
        (dir, path)
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).expect("read manifest")
    }

    #[test]
    fn empty_project_gains_one_page_and_one_compile_group() {
        let (_dir, path) = write_manifest("<Project>\n</Project>\n");

        let outcome = patch(&path, "Generated").expect("patch");
        assert!(outcome.page_added);
        assert!(outcome.compile_added);

        let patched = read(&path);
        assert_eq!(
            patched,
            "<Project>\n  <ItemGroup>\n    <Page Include=\"Generated\\*.xaml\" />\n  </ItemGroup>\n  <ItemGroup>\n    <Compile Include=\"Generated\\*.cs\" />\n  </ItemGroup>\n</Project>\n"
        );

        let document = ManifestDocument::parse(patched).expect("reparse");
        let items: Vec<_> = document.items().cloned().collect();
        assert_eq!(
            items,
            vec![
                ItemReference {
                    kind: ItemKind::Page,
                    include: "Generated\\*.xaml".to_string(),
                },
                ItemReference {
                    kind: ItemKind::Compile,
                    include: "Generated\\*.cs".to_string(),
                },
            ]
        );
    }

    #[test]
    fn second_patch_is_byte_identical() {
        let (_dir, path) = write_manifest(SDK_PROJECT);

        patch(&path, "Generated").expect("first patch");
        let first = read(&path);

        let outcome = patch(&path, "Generated").expect("second patch");
        let second = read(&path);

        assert!(!outcome.changed());
        assert_eq!(first, second);
        assert_eq!(first.matches("Generated\\*.xaml").count(), 1);
        assert_eq!(first.matches("Generated\\*.cs").count(), 1);
    }

    #[test]
    fn unrelated_content_is_preserved() {
        let (_dir, path) = write_manifest(SDK_PROJECT);

        patch(&path, "Generated").expect("patch");
        let patched = read(&path);

        let close = SDK_PROJECT.rfind("</Project>").expect("root close");
        assert!(patched.starts_with(&SDK_PROJECT[..close]));
        assert!(patched.ends_with("</Project>\n"));
        assert!(patched.contains("<!-- application settings -->"));
        assert!(patched.contains(r#"<Page Include="Views\Settings.xaml" />"#));
    }

    #[test]
    fn existing_reference_containing_folder_suppresses_insertion() {
        let (_dir, path) = write_manifest(
            "<Project>\n  <ItemGroup>\n    <Page Include=\"Generated\\foo.xaml\" />\n  </ItemGroup>\n</Project>\n",
        );

        let outcome = patch(&path, "Generated").expect("patch");
        assert!(!outcome.page_added);
        assert!(outcome.compile_added);

        let patched = read(&path);
        assert_eq!(patched.matches("<Page ").count(), 1);
        assert!(!patched.contains("Generated\\*.xaml"));
        assert!(patched.contains("<Compile Include=\"Generated\\*.cs\" />"));
    }

    #[test]
    fn near_miss_reference_is_not_detected() {
        let (_dir, path) = write_manifest(
            "<Project>\n  <ItemGroup>\n    <Compile Include=\"generated\\*.cs\" />\n  </ItemGroup>\n</Project>\n",
        );

        let outcome = patch(&path, "Generated").expect("patch");
        assert!(outcome.compile_added);
        assert_eq!(read(&path).matches("<Compile ").count(), 2);
    }

    #[test]
    fn page_and_compile_are_checked_independently() {
        let (_dir, path) = write_manifest(
            "<Project>\n  <ItemGroup>\n    <Compile Include=\"Generated\\MainWindow.xaml.cs\" />\n  </ItemGroup>\n</Project>\n",
        );

        let outcome = patch(&path, "Generated").expect("patch");
        assert!(outcome.page_added);
        assert!(!outcome.compile_added);
    }

    #[test]
    fn crlf_line_endings_and_bom_are_kept() {
        let source = "\u{feff}<Project>\r\n\t<PropertyGroup />\r\n</Project>\r\n";
        let (_dir, path) = write_manifest(source);

        patch(&path, "Gen").expect("patch");
        let patched = read(&path);

        assert!(patched.starts_with("\u{feff}<Project>\r\n\t<PropertyGroup />\r\n"));
        assert!(patched.contains("\t<ItemGroup>\r\n\t\t<Page Include=\"Gen\\*.xaml\" />\r\n\t</ItemGroup>\r\n"));
        assert!(!patched.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn self_closing_root_is_expanded() {
        let (_dir, path) = write_manifest("<Project Sdk=\"Microsoft.NET.Sdk\" />\n");

        patch(&path, "Generated").expect("patch");
        let patched = read(&path);

        assert!(patched.starts_with("<Project Sdk=\"Microsoft.NET.Sdk\">\n  <ItemGroup>"));
        assert!(patched.ends_with("</Project>\n"));
        ManifestDocument::parse(patched).expect("patched manifest parses");
    }

    #[test]
    fn include_values_are_escaped_and_matched_unescaped() {
        let (_dir, path) = write_manifest("<Project>\n</Project>\n");

        patch(&path, "R&D").expect("first patch");
        assert!(read(&path).contains("Include=\"R&amp;D\\*.xaml\""));

        let outcome = patch(&path, "R&D").expect("second patch");
        assert!(!outcome.changed());
    }

    #[test]
    fn missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("missing.csproj");

        let err = patch(&path, "Generated").expect_err("missing manifest");
        assert!(matches!(err, ManifestError::NotFound { .. }), "{err:?}");
        assert!(!path.exists());
    }

    #[test]
    fn malformed_manifest_is_parse_error_and_untouched() {
        let source = "<Project>\n  <ItemGroup>\n</Project>\n";
        let (_dir, path) = write_manifest(source);

        let err = patch(&path, "Generated").expect_err("malformed manifest");
        assert!(matches!(err, ManifestError::Parse { .. }), "{err:?}");
        assert_eq!(read(&path), source);
    }

    #[test]
    fn document_without_root_is_rejected() {
        let err = ManifestDocument::parse("<?xml version=\"1.0\"?>\n".to_string())
            .expect_err("no root");
        assert!(err.message.contains("no root"));
    }

    #[test]
    fn second_top_level_element_is_parse_error() {
        let source = "<Project></Project>\n<Other>\n  <Page Include=\"G\\x.xaml\" />\n</Other>\n";
        let (_dir, path) = write_manifest(source);

        let err = patch(&path, "G").expect_err("two roots");
        match &err {
            ManifestError::Parse { source: syntax, .. } => {
                assert!(syntax.message.contains("multiple root elements"), "{syntax:?}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(read(&path), source);

        let err = ManifestDocument::parse("<Project />\n<Other />".to_string())
            .expect_err("two self-closing roots");
        assert!(err.message.contains("multiple root elements"));
    }

    #[test]
    fn indented_close_tag_keeps_its_indent() {
        let (_dir, path) = write_manifest("<Project>\n  <X />\n  </Project>");

        patch(&path, "G").expect("patch");
        let patched = read(&path);

        assert!(patched.starts_with("<Project>\n  <X />\n  <ItemGroup>\n"), "{patched}");
        assert!(patched.ends_with("  </ItemGroup>\n  </Project>"), "{patched}");
        assert!(!patched.lines().any(|line| !line.is_empty() && line.trim().is_empty()));
    }

    #[test]
    fn unwritable_destination_is_write_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let document = ManifestDocument::parse("<Project />".to_string()).expect("parse");

        let err = document
            .save(&dir.path().join("missing-dir").join("App.csproj"))
            .expect_err("write into missing dir");
        assert!(matches!(err, ManifestError::Write { .. }), "{err:?}");
    }
}
