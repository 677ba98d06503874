//! Tokenizer for cell script, built on logos.
//!
//! Whitespace (including newlines) and `//` comments are skipped. Every token
//! keeps its byte span; [`LineIndex`] turns spans into line/column positions.

use std::fmt;

use logos::Logos;

use super::ast::Pos;

/// Cell script token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    #[token("let")]
    Let,
    #[token("const")]
    Const,
    #[token("fn")]
    Fn,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("throw")]
    Throw,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("import")]
    Import,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,

    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Assign,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    /// Number literal (e.g. 42, 3.5, 1e3)
    #[regex(r"[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    /// String literal with `\n`, `\t`, `\"`, `\\` escapes
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape(&s[1..s.len() - 1])
    })]
    Str(String),

    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Str(s) => write!(f, "string \"{}\"", s),
            Token::Ident(name) => write!(f, "identifier `{}`", name),
            other => write!(f, "`{}`", other.symbol()),
        }
    }
}

impl Token {
    fn symbol(&self) -> &'static str {
        match self {
            Token::Let => "let",
            Token::Const => "const",
            Token::Fn => "fn",
            Token::Return => "return",
            Token::If => "if",
            Token::Else => "else",
            Token::While => "while",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Throw => "throw",
            Token::Try => "try",
            Token::Catch => "catch",
            Token::Import => "import",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Semi => ";",
            Token::Colon => ":",
            Token::Dot => ".",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::LtEq => "<=",
            Token::GtEq => ">=",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Assign => "=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Number(_) | Token::Str(_) | Token::Ident(_) => "literal",
        }
    }
}

fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            other => out.push(other),
        }
    }
    Some(out)
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: Pos,
}

/// Unrecognized input.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub pos: Pos,
    pub text: String,
}

/// Byte offset to line/column lookup.
pub struct LineIndex<'src> {
    source: &'src str,
    line_starts: Vec<usize>,
}

impl<'src> LineIndex<'src> {
    pub fn new(source: &'src str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self {
            source,
            line_starts,
        }
    }

    /// 1-indexed line and column (in chars) of a byte offset.
    pub fn pos(&self, offset: usize) -> Pos {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let start = self.line_starts[line];
        let column = self.source[start..offset].chars().count();
        Pos::new(line as u32 + 1, column as u32 + 1)
    }

    /// Position just past the end of the source.
    pub fn end(&self) -> Pos {
        self.pos(self.source.len())
    }
}

/// Tokenize a whole source text.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, LexError> {
    let index = LineIndex::new(source);
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let pos = index.pos(lexer.span().start);
        match result {
            Ok(token) => tokens.push(Spanned { token, pos }),
            Err(()) => {
                return Err(LexError {
                    pos,
                    text: lexer.slice().to_string(),
                });
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_keywords_and_operators() {
        assert_eq!(
            kinds("let x = a <= 2 && !b"),
            vec![
                Token::Let,
                Token::Ident("x".into()),
                Token::Assign,
                Token::Ident("a".into()),
                Token::LtEq,
                Token::Number(2.0),
                Token::AndAnd,
                Token::Bang,
                Token::Ident("b".into()),
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\"b\n""#),
            vec![Token::Str("a\"b\n".into())]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(kinds("// nothing here\n1 // trailing"), vec![Token::Number(1.0)]);
    }

    #[test]
    fn test_positions_are_one_indexed() {
        let tokens = tokenize("let a = 1\n  display(a)").unwrap();
        assert_eq!(tokens[0].pos, Pos::new(1, 1));
        assert_eq!(tokens[4].pos, Pos::new(2, 3));
    }

    #[test]
    fn test_unknown_character() {
        let err = tokenize("let a = 1\nlet b = #").unwrap_err();
        assert_eq!(err.pos, Pos::new(2, 9));
        assert_eq!(err.text, "#");
    }
}
