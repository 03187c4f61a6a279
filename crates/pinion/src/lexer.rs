//! Lexer: source text to a tree of token lines.
//!
//! Each logical line becomes one node holding its tokens; an indented block
//! beneath a line becomes that node's children. Physical lines are joined
//! into logical lines by backslash continuations and by unterminated
//! triple-quoted strings. Comments are stripped during tokenization so a
//! `#` inside a string literal is not mistaken for one.
//!
//! Indentation is tracked per line. The first indented line fixes the
//! indent unit (all spaces or all tabs); every later indent must be a whole
//! multiple of it.

use std::rc::Rc;

use crate::exception::{CodeError, SourcePos};

/// Reserved words of the language.
pub(crate) const KEYWORDS: &[&str] = &[
    "if", "elif", "else", "while", "for", "break", "continue", "def", "class", "return", "pass",
    "try", "except", "finally", "raise", "with", "import", "from", "as", "in", "is", "not", "and",
    "or", "global", "nonlocal", "lambda", "True", "False", "None",
];

pub(crate) fn is_keyword(s: &str) -> bool {
    KEYWORDS.contains(&s)
}

/// Symbols, longest first so greedy matching is a prefix scan.
const SYMBOLS: &[&str] = &[
    "**=", "//=", "<<=", ">>=", "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "+=", "-=", "*=",
    "/=", "%=", "&=", "|=", "^=", "(", ")", "[", "]", "{", "}", ":", ".", ",", ";", "+", "-", "*",
    "/", "%", "<", ">", "=", "&", "|", "^", "~",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    /// Identifier or keyword.
    Word,
    Symbol,
    Int(i64),
    Float(f64),
    /// String literal; the decoded value.
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Source text for words and symbols; empty for literals.
    pub text: Box<str>,
    pub pos: SourcePos,
}

impl Token {
    pub fn is_word(&self, word: &str) -> bool {
        matches!(self.kind, TokenKind::Word) && &*self.text == word
    }

    pub fn is_symbol(&self, sym: &str) -> bool {
        matches!(self.kind, TokenKind::Symbol) && &*self.text == sym
    }

    /// An identifier usable as a name (a word that is not a keyword).
    pub fn identifier(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Word if !is_keyword(&self.text) => Some(&self.text),
            _ => None,
        }
    }
}

/// One logical line plus the indented block beneath it.
#[derive(Debug, Default)]
pub(crate) struct LexNode {
    pub tokens: Vec<Token>,
    pub children: Vec<LexNode>,
}

/// Lex output: the raw source lines (kept for traceback snippets) and the
/// block tree. The root node carries no tokens of its own.
#[derive(Debug)]
pub(crate) struct LexResult {
    pub lines: Rc<[Box<str>]>,
    pub root: LexNode,
}

enum LineTake {
    Tokens(Vec<Token>),
    /// The logical line continues on the next physical line.
    NeedMore,
}

pub(crate) fn lex(source: &str) -> Result<LexResult, CodeError> {
    let normalized = source.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<Box<str>> = normalized.split('\n').map(Box::from).collect();

    let mut logical: Vec<(usize, Vec<Token>)> = Vec::new();
    let mut buffer: Vec<(char, SourcePos)> = Vec::new();
    let mut buffer_start = 0usize;

    for (li, line) in lines.iter().enumerate() {
        if buffer.is_empty() {
            buffer_start = li;
        } else {
            // Continuation: the newline is part of the logical line.
            let pos = SourcePos::new(li as u32, 0);
            buffer.push(('\n', pos));
        }
        for (ci, ch) in line.chars().enumerate() {
            buffer.push((ch, SourcePos::new(li as u32, ci as u32)));
        }

        match tokenize_line(&buffer)? {
            LineTake::Tokens(tokens) => {
                if !tokens.is_empty() {
                    logical.push((buffer_start, tokens));
                }
                buffer.clear();
            }
            LineTake::NeedMore => {}
        }
    }
    if !buffer.is_empty() {
        // Ran out of input while a string or continuation was still open.
        let pos = buffer.last().map_or_else(SourcePos::default, |(_, p)| *p);
        match tokenize_line(&buffer)? {
            LineTake::Tokens(tokens) => {
                if !tokens.is_empty() {
                    logical.push((buffer_start, tokens));
                }
            }
            LineTake::NeedMore => {
                return Err(CodeError::new("unexpected end of file", pos));
            }
        }
    }

    let root = build_tree(&lines, logical)?;
    Ok(LexResult {
        lines: Rc::from(lines),
        root,
    })
}

/// Builds the indentation tree from tokenized logical lines.
fn build_tree(lines: &[Box<str>], logical: Vec<(usize, Vec<Token>)>) -> Result<LexNode, CodeError> {
    let mut root = LexNode::default();
    let mut indent_unit: Option<Box<str>> = None;
    let mut prev_level = 0usize;

    for (li, tokens) in logical {
        let line = &lines[li];
        let ws: String = line.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
        let pos = SourcePos::new(li as u32, 0);

        let level = if ws.is_empty() {
            0
        } else {
            let first = ws.chars().next().expect("checked non-empty");
            if !ws.chars().all(|c| c == first) {
                return Err(CodeError::new("mixed spaces and tabs in indentation", pos));
            }
            match &indent_unit {
                None => {
                    indent_unit = Some(ws.clone().into_boxed_str());
                    1
                }
                Some(unit) => {
                    if unit.chars().next() != Some(first) {
                        return Err(CodeError::new("inconsistent use of tabs and spaces", pos));
                    }
                    if ws.len() % unit.len() != 0 {
                        return Err(CodeError::new("indentation is not a multiple of the first indent", pos));
                    }
                    ws.len() / unit.len()
                }
            }
        };

        if level > prev_level + 1 {
            return Err(CodeError::new("unexpected indent", pos));
        }
        let mut parent = &mut root;
        for _ in 0..level {
            match parent.children.last_mut() {
                Some(child) => parent = child,
                None => return Err(CodeError::new("unexpected indent", pos)),
            }
        }
        parent.children.push(LexNode {
            tokens,
            children: Vec::new(),
        });
        prev_level = level;
    }
    Ok(root)
}

/// Tokenizes one logical line held as positioned characters.
fn tokenize_line(buf: &[(char, SourcePos)]) -> Result<LineTake, CodeError> {
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < buf.len() {
        let (ch, pos) = buf[i];
        match ch {
            ' ' | '\t' | '\n' => i += 1,
            '#' => {
                // Comment runs to the end of the physical line.
                while i < buf.len() && buf[i].0 != '\n' {
                    i += 1;
                }
            }
            '\\' => {
                // Only meaningful as a line continuation: nothing but
                // whitespace may follow on this physical line.
                let mut j = i + 1;
                while j < buf.len() && (buf[j].0 == ' ' || buf[j].0 == '\t') {
                    j += 1;
                }
                if j == buf.len() {
                    return Ok(LineTake::NeedMore);
                }
                return Err(CodeError::new("unexpected character after line continuation", pos));
            }
            '\'' | '"' => match lex_string(buf, &mut i)? {
                Some(token) => tokens.push(token),
                None => return Ok(LineTake::NeedMore),
            },
            c if c.is_ascii_digit() => tokens.push(lex_number(buf, &mut i)?),
            '.' if i + 1 < buf.len() && buf[i + 1].0.is_ascii_digit() => {
                tokens.push(lex_number(buf, &mut i)?);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < buf.len() && (buf[i].0.is_ascii_alphanumeric() || buf[i].0 == '_') {
                    i += 1;
                }
                let text: String = buf[start..i].iter().map(|(c, _)| *c).collect();
                tokens.push(Token {
                    kind: TokenKind::Word,
                    text: text.into_boxed_str(),
                    pos,
                });
            }
            _ => {
                let mut matched = None;
                for sym in SYMBOLS {
                    if buf[i..].len() >= sym.len()
                        && buf[i..i + sym.len()].iter().map(|(c, _)| *c).eq(sym.chars())
                    {
                        matched = Some(*sym);
                        break;
                    }
                }
                match matched {
                    Some(sym) => {
                        tokens.push(Token {
                            kind: TokenKind::Symbol,
                            text: Box::from(sym),
                            pos,
                        });
                        i += sym.len();
                    }
                    None => return Err(CodeError::new(format!("unexpected character '{ch}'"), pos)),
                }
            }
        }
    }
    Ok(LineTake::Tokens(tokens))
}

fn lex_number(buf: &[(char, SourcePos)], i: &mut usize) -> Result<Token, CodeError> {
    let pos = buf[*i].1;
    let start = *i;
    let chars: Vec<char> = buf.iter().map(|(c, _)| *c).collect();

    // Radix prefixes: 0b / 0o / 0x.
    if chars[*i] == '0' && *i + 1 < chars.len() {
        let radix = match chars[*i + 1] {
            'b' | 'B' => Some(2),
            'o' | 'O' => Some(8),
            'x' | 'X' => Some(16),
            _ => None,
        };
        if let Some(radix) = radix {
            *i += 2;
            let digits_start = *i;
            while *i < chars.len() && chars[*i].is_ascii_alphanumeric() {
                *i += 1;
            }
            let digits: String = chars[digits_start..*i].iter().collect();
            if digits.is_empty() {
                return Err(CodeError::new("expected digits after radix prefix", pos));
            }
            let value = i128::from_str_radix(&digits, radix)
                .map_err(|_| CodeError::new("invalid integer literal", pos))?;
            let value = i64::try_from(value)
                .map_err(|_| CodeError::new("integer literal out of range", pos))?;
            return Ok(Token {
                kind: TokenKind::Int(value),
                text: Box::from(""),
                pos,
            });
        }
    }

    while *i < chars.len() && chars[*i].is_ascii_digit() {
        *i += 1;
    }
    let mut is_float = false;
    if *i < chars.len() && chars[*i] == '.' {
        // Not a float if the dot starts an attribute access on a float,
        // but digits followed by '.' is always a float literal here.
        is_float = true;
        *i += 1;
        while *i < chars.len() && chars[*i].is_ascii_digit() {
            *i += 1;
        }
    }
    let text: String = chars[start..*i].iter().collect();
    if is_float {
        let value: f64 = text
            .parse()
            .map_err(|_| CodeError::new("invalid float literal", pos))?;
        Ok(Token {
            kind: TokenKind::Float(value),
            text: Box::from(""),
            pos,
        })
    } else {
        let value = text
            .parse::<i128>()
            .map_err(|_| CodeError::new("invalid integer literal", pos))
            .and_then(|v| {
                i64::try_from(v).map_err(|_| CodeError::new("integer literal out of range", pos))
            })?;
        Ok(Token {
            kind: TokenKind::Int(value),
            text: Box::from(""),
            pos,
        })
    }
}

/// Lexes a string literal starting at `buf[*i]`. Returns `None` when an
/// unterminated triple-quoted string needs the next physical line.
fn lex_string(buf: &[(char, SourcePos)], i: &mut usize) -> Result<Option<Token>, CodeError> {
    let pos = buf[*i].1;
    let quote = buf[*i].0;
    let triple = buf[*i..].len() >= 3 && buf[*i + 1].0 == quote && buf[*i + 2].0 == quote;
    *i += if triple { 3 } else { 1 };

    let mut value = String::new();
    loop {
        if *i >= buf.len() {
            if triple {
                return Ok(None);
            }
            return Err(CodeError::new("unterminated string literal", pos));
        }
        let (ch, cpos) = buf[*i];
        if ch == '\n' && !triple {
            return Err(CodeError::new("unterminated string literal", pos));
        }
        if ch == quote {
            if !triple {
                *i += 1;
                break;
            }
            if buf[*i..].len() >= 3 && buf[*i + 1].0 == quote && buf[*i + 2].0 == quote {
                *i += 3;
                break;
            }
            value.push(ch);
            *i += 1;
            continue;
        }
        if ch == '\\' {
            *i += 1;
            if *i >= buf.len() {
                if triple {
                    return Ok(None);
                }
                return Err(CodeError::new("unterminated string literal", pos));
            }
            let (esc, epos) = buf[*i];
            *i += 1;
            match esc {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                '0' => value.push('\0'),
                '\\' => value.push('\\'),
                '\'' => value.push('\''),
                '"' => value.push('"'),
                '\n' => {} // escaped newline is spliced out
                'x' => {
                    let code = read_hex(buf, i, 2)
                        .ok_or_else(|| CodeError::new("invalid \\x escape", epos))?;
                    value.push(char::from_u32(code).expect("two hex digits are a valid char"));
                }
                'u' => {
                    let code = read_hex(buf, i, 4)
                        .ok_or_else(|| CodeError::new("invalid \\u escape", epos))?;
                    let ch = char::from_u32(code)
                        .ok_or_else(|| CodeError::new("invalid unicode escape", epos))?;
                    value.push(ch);
                }
                other => {
                    value.push('\\');
                    value.push(other);
                }
            }
            let _ = cpos;
            continue;
        }
        value.push(ch);
        *i += 1;
    }

    Ok(Some(Token {
        kind: TokenKind::Str(value),
        text: Box::from(""),
        pos,
    }))
}

fn read_hex(buf: &[(char, SourcePos)], i: &mut usize, digits: usize) -> Option<u32> {
    if buf[*i..].len() < digits {
        return None;
    }
    let mut code = 0u32;
    for _ in 0..digits {
        let d = buf[*i].0.to_digit(16)?;
        code = code * 16 + d;
        *i += 1;
    }
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(src: &str) -> LexResult {
        lex(src).expect("lex failed")
    }

    fn words(node: &LexNode) -> Vec<String> {
        node.tokens.iter().map(|t| t.text.to_string()).collect()
    }

    #[test]
    fn simple_statements() {
        let result = lex_ok("x = 1\ny = 2\n");
        assert_eq!(result.root.children.len(), 2);
        assert_eq!(words(&result.root.children[0]), vec!["x", "=", ""]);
        assert_eq!(
            result.root.children[0].tokens[2].kind,
            TokenKind::Int(1)
        );
    }

    #[test]
    fn block_structure() {
        let result = lex_ok("if x:\n    y = 1\n    z = 2\nw = 3\n");
        let root = &result.root;
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].children.len(), 2);
        assert!(root.children[1].children.is_empty());
    }

    #[test]
    fn nested_blocks_with_tabs() {
        let result = lex_ok("if a:\n\tif b:\n\t\tc = 1\n");
        let outer = &result.root.children[0];
        assert_eq!(outer.children.len(), 1);
        assert_eq!(outer.children[0].children.len(), 1);
    }

    #[test]
    fn mixed_indent_rejected() {
        assert!(lex("if a:\n    b = 1\n\tc = 2\n").is_err());
        assert!(lex("if a:\n \tb = 1\n").is_err());
    }

    #[test]
    fn indent_must_be_multiple() {
        assert!(lex("if a:\n    b = 1\nif c:\n   d = 2\n").is_err());
    }

    #[test]
    fn number_literals() {
        let result = lex_ok("0x10 0b101 0o17 3.5 .5 7");
        let kinds: Vec<_> = result.root.children[0]
            .tokens
            .iter()
            .map(|t| t.kind.clone())
            .collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Int(16),
                TokenKind::Int(5),
                TokenKind::Int(15),
                TokenKind::Float(3.5),
                TokenKind::Float(0.5),
                TokenKind::Int(7),
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let result = lex_ok(r#"s = "a\tb\x41\u0042\n""#);
        match &result.root.children[0].tokens[2].kind {
            TokenKind::Str(s) => assert_eq!(s, "a\tbAB\n"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn triple_quoted_spans_lines() {
        let result = lex_ok("s = \"\"\"one\ntwo\"\"\"\nx = 1\n");
        assert_eq!(result.root.children.len(), 2);
        match &result.root.children[0].tokens[2].kind {
            TokenKind::Str(s) => assert_eq!(s, "one\ntwo"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn backslash_continuation() {
        let result = lex_ok("x = 1 + \\\n    2\n");
        assert_eq!(result.root.children.len(), 1);
        assert_eq!(result.root.children[0].tokens.len(), 5);
    }

    #[test]
    fn comments_stripped_but_not_in_strings() {
        let result = lex_ok("x = '#nope'  # yes\n");
        assert_eq!(result.root.children.len(), 1);
        assert_eq!(result.root.children[0].tokens.len(), 3);
        match &result.root.children[0].tokens[2].kind {
            TokenKind::Str(s) => assert_eq!(s, "#nope"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn greedy_symbols() {
        let result = lex_ok("a **= b // c << 2");
        let texts = words(&result.root.children[0]);
        assert_eq!(texts, vec!["a", "**=", "b", "//", "c", "<<", ""]);
    }

    #[test]
    fn unterminated_string_is_error() {
        assert!(lex("x = 'abc\n").is_err());
        assert!(lex("x = \"\"\"abc\n").is_err());
    }
}
