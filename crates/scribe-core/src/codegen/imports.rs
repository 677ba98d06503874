//! Recognition of module import lines.

use crate::script::lexer::{Token, tokenize};

/// A whole-line import statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportLine {
    /// Name bound by `import name from "module"`
    pub binding: Option<String>,

    /// Module specifier
    pub module: String,
}

impl ImportLine {
    /// The equivalent `require` statement.
    pub fn lowered(&self) -> String {
        let module = escape_str(&self.module);
        match &self.binding {
            Some(binding) => format!("const {} = require(\"{}\");", binding, module),
            None => format!("require(\"{}\");", module),
        }
    }
}

/// Parse `line` if it consists of exactly one import statement, optionally
/// followed by `;` and a comment.
pub fn parse_import_line(line: &str) -> Option<ImportLine> {
    if !line.trim_start().starts_with("import") {
        return None;
    }
    let tokens: Vec<Token> = tokenize(line).ok()?.into_iter().map(|s| s.token).collect();
    let tokens = match tokens.split_last() {
        Some((Token::Semi, rest)) => rest,
        _ => &tokens[..],
    };
    match tokens {
        [Token::Import, Token::Str(module)] => Some(ImportLine {
            binding: None,
            module: module.clone(),
        }),
        [Token::Import, Token::Ident(binding), Token::Ident(from), Token::Str(module)]
            if from == "from" =>
        {
            Some(ImportLine {
                binding: Some(binding.clone()),
                module: module.clone(),
            })
        }
        _ => None,
    }
}

/// Module names referenced by import lines of `text`.
pub fn imported_modules(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(parse_import_line)
        .map(|import| import.module)
        .collect()
}

/// Escape text for a double-quoted cell script string literal.
pub fn escape_str(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}
