//! Source location tracking shared by every AST node and diagnostic.
//!
//! A `Span` is cheap to clone (an `Rc<str>` for the module path plus the
//! owning source text) so it can be threaded through inference without
//! worrying about ownership.

use std::rc::Rc;

use colored::Colorize;

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub module: Rc<str>,
    pub start: (usize, usize),
    pub end: (usize, usize),
    #[serde(skip)]
    pub source: Rc<str>,
}

impl Span {
    pub fn new(module: impl Into<Rc<str>>, start: (usize, usize), end: (usize, usize)) -> Self {
        Self {
            module: module.into(),
            start,
            end,
            source: Rc::from(""),
        }
    }

    pub fn with_source(mut self, source: impl Into<Rc<str>>) -> Self {
        self.source = source.into();
        self
    }

    /// Render a caret-pointing-at-source-line message, the way the teacher
    /// renders lexer errors. Falls back to a bare `module:line:col: msg` when
    /// no source text is attached (e.g. synthesized spans in tests).
    pub fn render(&self, msg: impl ToString) -> String {
        let msg = msg.to_string();
        let (line, col) = self.start;

        if self.source.is_empty() {
            return format!("{}:{}:{}: {}", self.module, line + 1, col + 1, msg);
        }

        let lines = self.source.lines().collect::<Vec<_>>();
        let Some(line_str) = lines.get(line) else {
            return format!("{}:{}:{}: {}", self.module, line + 1, col + 1, msg);
        };

        let split_at = col.min(line_str.len());
        let (left, right) = line_str.split_at(split_at);
        let highlighted = format!("{left}{}", right.red());

        format!(
            "{module}:{line}:{col}: {msg}\n  |\n{line_no:>3} | {highlighted}\n  |",
            module = self.module,
            line = line + 1,
            col = col + 1,
            line_no = line + 1,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Span;

    #[test]
    fn renders_without_source() {
        let span = Span::new("main", (2, 4), (2, 8));
        assert_eq!(span.render("boom"), "main:3:5: boom");
    }

    #[test]
    fn renders_with_source() {
        let span = Span::new("main", (0, 4), (0, 8)).with_source("x be 1 + 2");
        let rendered = span.render("oops");
        assert!(rendered.contains("main:1:5: oops"));
    }
}
