//! Compile diagnostics: the closed error taxonomy, error records with
//! source attribution, and the accumulating list shared by every phase.

use std::fmt;

use crate::ast::Position;

/// Every diagnostic the compiler can produce. All of these are
/// recoverable: the offending construct is skipped and compilation
/// continues so one run surfaces as many problems as possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DuplicateDeclaration,
    ModuleAlreadyImported,
    NotDefined,
    TypeMismatch,
    InvalidArgument,
    ImproperUsage,
    ValueIsReadonly,
    FileNotFound,
    TokenRecognitionError,
    TokenMissing,
    ExtraneousToken,
    NoViableAlternative,
    GenericLexerError,
    GenericParserError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorKind::DuplicateDeclaration => "duplicate declaration",
            ErrorKind::ModuleAlreadyImported => "module already imported",
            ErrorKind::NotDefined => "not defined",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::ImproperUsage => "improper usage",
            ErrorKind::ValueIsReadonly => "value is read-only",
            ErrorKind::FileNotFound => "file not found",
            ErrorKind::TokenRecognitionError => "token recognition error",
            ErrorKind::TokenMissing => "missing token",
            ErrorKind::ExtraneousToken => "extraneous token",
            ErrorKind::NoViableAlternative => "no viable alternative",
            ErrorKind::GenericLexerError => "lexer error",
            ErrorKind::GenericParserError => "parser error",
        };
        f.write_str(text)
    }
}

/// One recorded diagnostic. The file name, line/column and source
/// snippet are materialized at report time so the record stays useful
/// after the source table is gone.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub start: usize,
    pub stop: usize,
    pub snippet: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.file, self.line, self.column, self.kind, self.message
        )
    }
}

impl std::error::Error for CompileError {}

/// A source file registered with the diagnostics table. Positions refer
/// to files by index so IR nodes stay small.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

/// The shared, ordered error list plus the source table used to resolve
/// positions into names and snippets.
#[derive(Debug, Default)]
pub struct Diagnostics {
    files: Vec<SourceFile>,
    errors: Vec<CompileError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    /// Registers a source file and returns its index for positions.
    pub fn add_file(&mut self, name: &str, text: &str) -> usize {
        self.files.push(SourceFile {
            name: name.to_string(),
            text: text.to_string(),
        });
        self.files.len() - 1
    }

    pub fn file_name(&self, file: usize) -> &str {
        self.files
            .get(file)
            .map(|f| f.name.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn report(&mut self, kind: ErrorKind, message: impl Into<String>, pos: Position) {
        let snippet = self
            .files
            .get(pos.file)
            .map(|f| slice_chars(&f.text, pos.start, pos.stop))
            .unwrap_or_default();
        self.errors.push(CompileError {
            kind,
            message: message.into(),
            file: self.file_name(pos.file).to_string(),
            line: pos.line,
            column: pos.column,
            start: pos.start,
            stop: pos.stop,
            snippet,
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Renders one error with the offending source line and a caret.
    pub fn render(&self, error: &CompileError) -> String {
        let mut out = format!(
            "error: {} ({})\n  --> {}:{}:{}",
            error.message, error.kind, error.file, error.line, error.column
        );
        if let Some(file) = self.files.iter().find(|f| f.name == error.file) {
            if let Some(line_text) = file.text.lines().nth(error.line.saturating_sub(1)) {
                let gutter = format!("{} | ", error.line);
                out.push_str(&format!("\n{}{}", gutter, line_text));
                let pad = gutter.len() + error.column.saturating_sub(1);
                out.push_str(&format!("\n{}^", " ".repeat(pad)));
            }
        }
        out
    }

    /// Renders every recorded error, one paragraph each.
    pub fn render_all(&self) -> String {
        self.errors
            .iter()
            .map(|e| self.render(e))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Extracts the inclusive character range `start..=stop`, the span
/// convention tokens use.
fn slice_chars(text: &str, start: usize, stop: usize) -> String {
    if stop < start {
        return String::new();
    }
    text.chars().skip(start).take(stop - start + 1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(file: usize, line: usize, column: usize, start: usize, stop: usize) -> Position {
        Position {
            file,
            line,
            column,
            start,
            stop,
        }
    }

    #[test]
    fn records_snippet_and_location() {
        let mut diags = Diagnostics::new();
        let file = diags.add_file("main.ch", "var score = 5;\n");
        diags.report(ErrorKind::NotDefined, "variable 'score'", pos(file, 1, 5, 4, 8));
        let err = &diags.errors()[0];
        assert_eq!(err.file, "main.ch");
        assert_eq!(err.snippet, "score");
        assert_eq!(err.to_string(), "main.ch:1:5: not defined: variable 'score'");
    }

    #[test]
    fn errors_keep_report_order() {
        let mut diags = Diagnostics::new();
        let file = diags.add_file("a.ch", "x\ny\n");
        diags.report(ErrorKind::NotDefined, "first", pos(file, 1, 1, 0, 0));
        diags.report(ErrorKind::TypeMismatch, "second", pos(file, 2, 1, 2, 2));
        let kinds: Vec<_> = diags.errors().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ErrorKind::NotDefined, ErrorKind::TypeMismatch]);
    }

    #[test]
    fn render_points_at_column() {
        let mut diags = Diagnostics::new();
        let file = diags.add_file("m.ch", "num x = y;\n");
        diags.report(ErrorKind::NotDefined, "variable 'y'", pos(file, 1, 9, 8, 8));
        let rendered = diags.render(&diags.errors()[0]);
        assert!(rendered.contains("--> m.ch:1:9"));
        assert!(rendered.contains("num x = y;"));
        assert!(rendered.lines().last().unwrap_or("").trim_end().ends_with('^'));
    }
}
