//! Code-behind and markup emission.
//!
//! Generated C# carries `#line` directive pairs so that exceptions and
//! debugger locations inside generated statements point at the DSL script
//! line they came from instead of at the generated file.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SCRIPT_NAME: &str = "ui.ps1";
pub const DEFAULT_NAMESPACE: &str = "GeneratedApp";
pub const DEFAULT_CLASS_NAME: &str = "MainWindow";

/// Highest line number a C# `#line` directive accepts.
pub const MAX_DIRECTIVE_LINE: u32 = 16_707_565;

const INDENT: &str = "    ";
const RESET_DIRECTIVE: &str = "#line default";
const XAML_PRESENTATION_NS: &str = "http://schemas.microsoft.com/winfx/2006/xaml/presentation";
const XAML_NS: &str = "http://schemas.microsoft.com/winfx/2006/xaml";

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("mapping to {opened} opened while mapping to {outer} is still open")]
    NestedMapping {
        outer: SourceOrigin,
        opened: SourceOrigin,
    },

    #[error("mapping closed but no mapping is open")]
    UnbalancedMapping,

    #[error("mapping to {0} was never closed")]
    UnterminatedMapping(SourceOrigin),

    #[error("origin file name {0:?} cannot appear in a #line directive")]
    InvalidOrigin(String),

    #[error("line {line} of {file} is outside 1..={MAX_DIRECTIVE_LINE}")]
    InvalidLine { file: String, line: u32 },

    #[error("failed to render markup: {0}")]
    Markup(String),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A position in the DSL script that generated code is attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOrigin {
    pub file: String,
    pub line: u32,
}

impl SourceOrigin {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl std::fmt::Display for SourceOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Line-oriented source text builder that owns every `#line` directive it
/// writes. Mapping spans never nest and must all be closed before
/// [`SourceBuilder::finish`] succeeds.
#[derive(Debug, Default)]
pub struct SourceBuilder {
    out: String,
    depth: usize,
    open_spans: Vec<SourceOrigin>,
}

impl SourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blank(&mut self) -> &mut Self {
        self.out.push('\n');
        self
    }

    pub fn line(&mut self, text: &str) -> &mut Self {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
        self
    }

    pub fn indent(&mut self) -> &mut Self {
        self.depth += 1;
        self
    }

    pub fn dedent(&mut self) -> &mut Self {
        self.depth = self.depth.saturating_sub(1);
        self
    }

    pub fn begin_mapping(&mut self, origin: SourceOrigin) -> Result<(), EmitError> {
        if origin.file.contains(['"', '\n', '\r']) {
            return Err(EmitError::InvalidOrigin(origin.file));
        }
        if !(1..=MAX_DIRECTIVE_LINE).contains(&origin.line) {
            return Err(EmitError::InvalidLine {
                file: origin.file,
                line: origin.line,
            });
        }
        if let Some(outer) = self.open_spans.last() {
            return Err(EmitError::NestedMapping {
                outer: outer.clone(),
                opened: origin,
            });
        }

        self.out
            .push_str(&format!("#line {} \"{}\"\n", origin.line, origin.file));
        self.open_spans.push(origin);
        Ok(())
    }

    pub fn end_mapping(&mut self) -> Result<(), EmitError> {
        self.open_spans.pop().ok_or(EmitError::UnbalancedMapping)?;
        self.out.push_str(RESET_DIRECTIVE);
        self.out.push('\n');
        Ok(())
    }

    /// Writes the lines produced by `body` inside one mapping span.
    pub fn mapped<F>(&mut self, origin: SourceOrigin, body: F) -> Result<(), EmitError>
    where
        F: FnOnce(&mut Self),
    {
        self.begin_mapping(origin)?;
        body(self);
        self.end_mapping()
    }

    pub fn finish(mut self) -> Result<String, EmitError> {
        match self.open_spans.pop() {
            Some(origin) => Err(EmitError::UnterminatedMapping(origin)),
            None => Ok(self.out),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub text: String,
    pub origin: Option<SourceOrigin>,
}

impl Statement {
    pub fn generated(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: None,
        }
    }

    pub fn from_script(text: impl Into<String>, origin: SourceOrigin) -> Self {
        Self {
            text: text.into(),
            origin: Some(origin),
        }
    }
}

/// Shape of a generated window code-behind file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCodeBehind {
    pub usings: Vec<String>,
    pub namespace: String,
    pub class_name: String,
    pub base_type: String,
    /// Attributes the whole constructor to one script line.
    pub constructor_origin: Option<SourceOrigin>,
    pub statements: Vec<Statement>,
}

impl Default for WindowCodeBehind {
    fn default() -> Self {
        Self {
            usings: vec![
                "Microsoft.UI.Xaml".to_string(),
                "Microsoft.UI.Xaml.Controls".to_string(),
            ],
            namespace: DEFAULT_NAMESPACE.to_string(),
            class_name: DEFAULT_CLASS_NAME.to_string(),
            base_type: "Window".to_string(),
            constructor_origin: Some(SourceOrigin::new(DEFAULT_SCRIPT_NAME, 1)),
            statements: vec![Statement::generated("this.InitializeComponent();")],
        }
    }
}

impl WindowCodeBehind {
    pub fn qualified_class_name(&self) -> String {
        format!("{}.{}", self.namespace, self.class_name)
    }

    pub fn render(&self) -> Result<String, EmitError> {
        let mut b = SourceBuilder::new();

        b.blank();
        for using in &self.usings {
            b.line(&format!("using {using};"));
        }
        b.blank();
        b.line(&format!("namespace {} {{", self.namespace)).indent();
        b.line(&format!(
            "public sealed partial class {} : {} {{",
            self.class_name, self.base_type
        ))
        .indent();

        match &self.constructor_origin {
            Some(origin) => {
                b.begin_mapping(origin.clone())?;
                self.render_constructor(&mut b)?;
                b.end_mapping()?;
            }
            None => self.render_constructor(&mut b)?,
        }

        b.dedent().line("}");
        b.dedent().line("}");
        b.finish()
    }

    fn render_constructor(&self, b: &mut SourceBuilder) -> Result<(), EmitError> {
        b.line(&format!("public {}() {{", self.class_name)).indent();
        for statement in &self.statements {
            match &statement.origin {
                Some(origin) => b.mapped(origin.clone(), |b| {
                    b.line(&statement.text);
                })?,
                None => {
                    b.line(&statement.text);
                }
            }
        }
        b.dedent().line("}");
        Ok(())
    }
}

/// Markup page paired with a [`WindowCodeBehind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowMarkup {
    pub class: String,
    pub message: String,
    pub font_size: u32,
}

impl WindowMarkup {
    pub fn for_code_behind(code_behind: &WindowCodeBehind, message: impl Into<String>) -> Self {
        Self {
            class: code_behind.qualified_class_name(),
            message: message.into(),
            font_size: 24,
        }
    }

    pub fn render(&self) -> Result<String, EmitError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        let font_size = self.font_size.to_string();

        let mut window = BytesStart::new("Window");
        window.push_attribute(("x:Class", self.class.as_str()));
        window.push_attribute(("xmlns", XAML_PRESENTATION_NS));
        window.push_attribute(("xmlns:x", XAML_NS));

        let mut text_block = BytesStart::new("TextBlock");
        text_block.push_attribute(("Text", self.message.as_str()));
        text_block.push_attribute(("HorizontalAlignment", "Center"));
        text_block.push_attribute(("VerticalAlignment", "Center"));
        text_block.push_attribute(("FontSize", font_size.as_str()));

        let events = [
            Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)),
            Event::Start(window),
            Event::Start(BytesStart::new("Grid")),
            Event::Empty(text_block),
            Event::End(BytesEnd::new("Grid")),
            Event::End(BytesEnd::new("Window")),
        ];
        for event in events {
            writer
                .write_event(event)
                .map_err(|err| EmitError::Markup(err.to_string()))?;
        }

        let mut markup =
            String::from_utf8(writer.into_inner()).map_err(|err| EmitError::Markup(err.to_string()))?;
        markup.push('\n');
        Ok(markup)
    }
}

/// Writes the default window code-behind to `output_path`.
pub fn emit(output_path: impl AsRef<Path>) -> Result<(), EmitError> {
    emit_code_behind(&WindowCodeBehind::default(), output_path)
}

pub fn emit_code_behind(
    code_behind: &WindowCodeBehind,
    output_path: impl AsRef<Path>,
) -> Result<(), EmitError> {
    write_text(output_path.as_ref(), &code_behind.render()?)
}

pub fn emit_markup(markup: &WindowMarkup, output_path: impl AsRef<Path>) -> Result<(), EmitError> {
    write_text(output_path.as_ref(), &markup.render()?)
}

fn write_text(path: &Path, text: &str) -> Result<(), EmitError> {
    fs::write(path, text).map_err(|source| EmitError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), bytes = text.len(), "wrote generated source");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_CODE_BEHIND: &str = r#"
using Microsoft.UI.Xaml;
using Microsoft.UI.Xaml.Controls;

namespace GeneratedApp {
    public sealed partial class MainWindow : Window {
#line 1 "ui.ps1"
        public MainWindow() {
            this.InitializeComponent();
        }
#line default
    }
}
"#;

    #[test]
    fn default_code_behind_matches_expected_shape() {
        let text = WindowCodeBehind::default().render().expect("render");
        assert_eq!(text, DEFAULT_CODE_BEHIND);
    }

    #[test]
    fn default_code_behind_has_one_directive_pair_in_order() {
        let text = WindowCodeBehind::default().render().expect("render");

        let opening: Vec<_> = text.match_indices("#line 1 \"ui.ps1\"").collect();
        let resets: Vec<_> = text.match_indices("#line default").collect();
        assert_eq!(opening.len(), 1);
        assert_eq!(resets.len(), 1);
        assert!(opening[0].0 < resets[0].0);
        assert_eq!(text.matches("#line").count(), 2);
    }

    #[test]
    fn statements_from_script_get_their_own_directive_pairs() {
        let code_behind = WindowCodeBehind {
            constructor_origin: None,
            statements: vec![
                Statement::generated("this.InitializeComponent();"),
                Statement::from_script("Title = \"Demo\";", SourceOrigin::new("ui.ps1", 4)),
                Statement::from_script("Width = 640;", SourceOrigin::new("ui.ps1", 7)),
            ],
            ..WindowCodeBehind::default()
        };

        let text = code_behind.render().expect("render");
        let lines: Vec<_> = text.lines().collect();

        let title = lines
            .iter()
            .position(|line| line.trim() == "Title = \"Demo\";")
            .expect("title statement");
        assert_eq!(lines[title - 1], "#line 4 \"ui.ps1\"");
        assert_eq!(lines[title + 1], "#line default");

        let width = lines
            .iter()
            .position(|line| line.trim() == "Width = 640;")
            .expect("width statement");
        assert_eq!(lines[width - 1], "#line 7 \"ui.ps1\"");
        assert_eq!(lines[width + 1], "#line default");

        assert_eq!(text.matches("#line default").count(), 2);
    }

    #[test]
    fn constructor_origin_with_statement_origin_is_rejected() {
        let code_behind = WindowCodeBehind {
            statements: vec![Statement::from_script(
                "Title = \"Demo\";",
                SourceOrigin::new("ui.ps1", 2),
            )],
            ..WindowCodeBehind::default()
        };

        let err = code_behind.render().expect_err("overlapping spans");
        assert!(matches!(err, EmitError::NestedMapping { .. }), "{err:?}");
    }

    #[test]
    fn builder_rejects_unbalanced_and_unterminated_spans() {
        let mut b = SourceBuilder::new();
        assert!(matches!(b.end_mapping(), Err(EmitError::UnbalancedMapping)));

        b.begin_mapping(SourceOrigin::new("ui.ps1", 3))
            .expect("open mapping");
        b.line("Foo();");
        let err = b.finish().expect_err("unterminated span");
        assert!(matches!(err, EmitError::UnterminatedMapping(origin) if origin.line == 3));
    }

    #[test]
    fn builder_rejects_origin_that_breaks_directive() {
        let mut b = SourceBuilder::new();
        let err = b
            .begin_mapping(SourceOrigin::new("bad\"name.ps1", 1))
            .expect_err("quote in file name");
        assert!(matches!(err, EmitError::InvalidOrigin(_)));
    }

    #[test]
    fn builder_rejects_lines_outside_directive_range() {
        let mut b = SourceBuilder::new();
        for line in [0, MAX_DIRECTIVE_LINE + 1] {
            let err = b
                .begin_mapping(SourceOrigin::new("ui.ps1", line))
                .expect_err("out of range line");
            assert!(matches!(err, EmitError::InvalidLine { line: l, .. } if l == line), "{err:?}");
        }
        b.begin_mapping(SourceOrigin::new("ui.ps1", MAX_DIRECTIVE_LINE))
            .expect("highest line");

        let code_behind = WindowCodeBehind {
            constructor_origin: Some(SourceOrigin::new(DEFAULT_SCRIPT_NAME, 0)),
            ..WindowCodeBehind::default()
        };
        let err = code_behind.render().expect_err("line zero");
        assert!(matches!(err, EmitError::InvalidLine { .. }), "{err:?}");
    }

    #[test]
    fn emit_truncates_existing_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("MainWindow.xaml.cs");
        fs::write(&path, "x".repeat(4096)).expect("seed file");

        emit(&path).expect("emit");
        assert_eq!(fs::read_to_string(&path).expect("read"), DEFAULT_CODE_BEHIND);
    }

    #[test]
    fn emit_into_missing_directory_is_write_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let err = emit(dir.path().join("nope").join("MainWindow.xaml.cs"))
            .expect_err("missing directory");
        assert!(matches!(err, EmitError::Write { .. }), "{err:?}");
    }

    #[test]
    fn markup_binds_code_behind_class_and_escapes_message() {
        let markup = WindowMarkup::for_code_behind(&WindowCodeBehind::default(), "Tom & Jerry");
        let text = markup.render().expect("render markup");

        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(text.contains("x:Class=\"GeneratedApp.MainWindow\""));
        assert!(text.contains("Text=\"Tom &amp; Jerry\""));
        assert!(text.contains("HorizontalAlignment=\"Center\""));
        assert!(text.trim_end().ends_with("</Window>"));
    }
}
