//! Module specifier extraction from JavaScript sources.
//!
//! Sources are parsed with tree-sitter, so specifiers inside comments,
//! strings, template text and regex literals are never mistaken for code.
//! Recognized forms:
//!
//! - `require(x)`, `require.resolve(x)` and `import(x)` calls
//! - `import … from "x"` and side-effect `import "x"`
//! - `export … from "x"`
//!
//! A call whose first argument is not a plain string literal yields an
//! [`Import`] without a specifier.

use tree_sitter::{Language, Node, Parser};

/// Call targets that load a module by specifier.
const LOADER_CALLS: &[&str] = &["require", "require.resolve", "import"];

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("failed to load the JavaScript grammar: {0}")]
    Grammar(String),
    #[error("parser produced no syntax tree")]
    NoTree,
}

/// One specifier occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// `None` when the argument is not a string literal.
    pub specifier: Option<String>,
    /// Byte offset of the call target or statement.
    pub offset: usize,
    /// 1-based.
    pub line: usize,
    /// 0-based, in bytes.
    pub column: usize,
}

/// Reusable JavaScript parser.
pub struct ImportScanner {
    parser: Parser,
}

impl ImportScanner {
    pub fn new() -> Result<Self, ScanError> {
        let language: Language = tree_sitter_javascript::LANGUAGE.into();
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .map_err(|e| ScanError::Grammar(format!("{e}")))?;
        Ok(Self { parser })
    }

    /// Every module specifier in `source`, ordered by position.
    ///
    /// Syntax errors do not fail the scan; the well-formed parts of the
    /// file are still searched.
    pub fn scan(&mut self, source: &str) -> Result<Vec<Import>, ScanError> {
        let tree = self.parser.parse(source, None).ok_or(ScanError::NoTree)?;
        if tree.root_node().has_error() {
            tracing::debug!("source has syntax errors; scanning recoverable nodes");
        }

        let mut found = Vec::new();
        let mut cursor = tree.walk();
        'walk: loop {
            if let Some(import) = import_at(cursor.node(), source) {
                found.push(import);
            }
            if cursor.goto_first_child() {
                continue;
            }
            while !cursor.goto_next_sibling() {
                if !cursor.goto_parent() {
                    break 'walk;
                }
            }
        }

        found.sort_by_key(|i| i.offset);
        Ok(found)
    }
}

fn import_at(node: Node<'_>, source: &str) -> Option<Import> {
    match node.kind() {
        "call_expression" => {
            let callee = node.child_by_field_name("function")?;
            if !LOADER_CALLS.contains(&text(callee, source)?) {
                return None;
            }
            let specifier = node
                .child_by_field_name("arguments")
                .and_then(|args| args.named_child(0))
                .and_then(|arg| literal_value(arg, source));
            Some(located(callee, specifier))
        }
        "import_statement" | "export_statement" => {
            let specifier = node
                .child_by_field_name("source")
                .and_then(|s| literal_value(s, source))?;
            Some(located(node, Some(specifier)))
        }
        _ => None,
    }
}

fn located(node: Node<'_>, specifier: Option<String>) -> Import {
    let start = node.start_position();
    Import {
        specifier,
        offset: node.start_byte(),
        line: start.row + 1,
        column: start.column,
    }
}

/// Value of a string literal or a template without substitutions.
fn literal_value(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "string" => {}
        "template_string" => {
            let mut cursor = node.walk();
            if node
                .named_children(&mut cursor)
                .any(|child| child.kind() == "template_substitution")
            {
                return None;
            }
        }
        _ => return None,
    }
    let raw = text(node, source)?;
    raw.get(1..raw.len().saturating_sub(1)).map(str::to_owned)
}

fn text<'s>(node: Node<'_>, source: &'s str) -> Option<&'s str> {
    source.get(node.byte_range())
}
