//! Significant-token view over a source text plus the recursive-descent
//! recognizers shared by the extractor, the stripper and the assembler.
//!
//! Positions handed around here are indices into the significant (non-trivia)
//! token list. Recognizers return the index one past the construct they
//! matched, or `None` when the tokens do not form that construct.

use crate::lexer::{Token, TokenKind, tokenize};

/// Reserved words that can never name a function or start a method definition.
const KEYWORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "export", "extends", "finally", "for", "function", "if", "import", "in", "instanceof",
    "let", "new", "return", "super", "switch", "throw", "try", "typeof", "var", "void", "while",
    "with", "yield", "await",
];

/// Keywords that still end an expression (`x = this!`, `null as any`).
const VALUE_KEYWORDS: &[&str] = &["this", "super", "null", "undefined", "true", "false"];

pub struct TokenView<'a> {
    pub src: &'a str,
    /// Every token, trivia included.
    pub all: Vec<Token>,
    /// Significant tokens only.
    pub sig: Vec<Token>,
    /// For `(`, `[` and `{`: the index of the matching closer, and vice versa.
    matching: Vec<Option<usize>>,
}

impl<'a> TokenView<'a> {
    pub fn new(src: &'a str) -> Self {
        let all = tokenize(src);
        let sig: Vec<Token> = all.iter().copied().filter(|t| !t.is_trivia()).collect();
        let matching = match_brackets(src, &sig);
        Self {
            src,
            all,
            sig,
            matching,
        }
    }

    pub fn len(&self) -> usize {
        self.sig.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sig.is_empty()
    }

    pub fn text(&self, i: usize) -> &'a str {
        self.sig.get(i).map_or("", |t| t.text(self.src))
    }

    pub fn is(&self, i: usize, text: &str) -> bool {
        self.sig
            .get(i)
            .is_some_and(|t| t.kind != TokenKind::String && t.text(self.src) == text)
    }

    pub fn kind(&self, i: usize) -> Option<TokenKind> {
        self.sig.get(i).map(|t| t.kind)
    }

    pub fn is_ident(&self, i: usize) -> bool {
        self.kind(i) == Some(TokenKind::Ident)
    }

    /// An identifier usable as a binding name (not a reserved word).
    pub fn is_name(&self, i: usize) -> bool {
        self.is_ident(i) && !KEYWORDS.contains(&self.text(i))
    }

    pub fn matching(&self, i: usize) -> Option<usize> {
        self.matching.get(i).copied().flatten()
    }

    /// Byte offset where significant token `i` starts (input length past the end).
    pub fn start(&self, i: usize) -> usize {
        self.sig.get(i).map_or(self.src.len(), |t| t.start)
    }

    /// Byte offset where significant token `i` ends.
    pub fn end(&self, i: usize) -> usize {
        self.sig.get(i).map_or(self.src.len(), |t| t.end)
    }

    /// True if token `i + 1` follows token `i` with no trivia in between.
    pub fn adjacent(&self, i: usize) -> bool {
        i + 1 < self.sig.len() && self.end(i) == self.start(i + 1)
    }

    /// True if token `i` can end an expression, so that a following `as`,
    /// `satisfies` or `!` acts on a value.
    pub fn ends_expression(&self, i: usize) -> bool {
        match self.kind(i) {
            Some(TokenKind::Ident) => {
                let text = self.text(i);
                VALUE_KEYWORDS.contains(&text) || !KEYWORDS.contains(&text)
            }
            Some(TokenKind::Number | TokenKind::String | TokenKind::Template | TokenKind::Regex) => {
                true
            }
            Some(TokenKind::Punct) => matches!(self.text(i), ")" | "]" | "}"),
            _ => false,
        }
    }

    /// True if token `i` is the first significant token on its line.
    pub fn starts_line(&self, i: usize) -> bool {
        let start = self.start(i);
        let line_start = self.src[..start].rfind('\n').map_or(0, |p| p + 1);
        self.src[line_start..start].trim().is_empty()
    }

    /// Recognize a type expression starting at `i`.
    pub fn parse_type(&self, i: usize) -> Option<usize> {
        let k = self.parse_union(i)?;
        if self.is(k, "extends") {
            let check = self.parse_union(k + 1)?;
            if self.is(check, "?") {
                let when_true = self.parse_type(check + 1)?;
                if self.is(when_true, ":") {
                    return self.parse_type(when_true + 1);
                }
            }
            return None;
        }
        Some(k)
    }

    fn parse_union(&self, i: usize) -> Option<usize> {
        let mut k = i;
        if self.is(k, "|") || self.is(k, "&") {
            k += 1;
        }
        k = self.parse_postfix(k)?;
        while self.is(k, "|") || self.is(k, "&") {
            k = self.parse_postfix(k + 1)?;
        }
        Some(k)
    }

    fn parse_postfix(&self, i: usize) -> Option<usize> {
        let mut k = self.parse_primary(i)?;
        while self.is(k, "[") && self.adjacent(k - 1) {
            k = self.matching(k)? + 1;
        }
        Some(k)
    }

    fn parse_primary(&self, i: usize) -> Option<usize> {
        match self.kind(i)? {
            TokenKind::String | TokenKind::Number | TokenKind::Template => return Some(i + 1),
            TokenKind::Ident => return self.parse_named_type(i),
            TokenKind::Punct => {}
            _ => return None,
        }
        match self.text(i) {
            "(" => {
                let close = self.matching(i)?;
                if self.is(close + 1, "=>") {
                    self.parse_type(close + 2)
                } else {
                    Some(close + 1)
                }
            }
            "{" | "[" => Some(self.matching(i)? + 1),
            "<" => {
                let after = self.parse_angle(i)?;
                self.parse_primary(after)
            }
            "-" if self.kind(i + 1) == Some(TokenKind::Number) => Some(i + 2),
            _ => None,
        }
    }

    fn parse_named_type(&self, i: usize) -> Option<usize> {
        match self.text(i) {
            "typeof" => return self.parse_entity_name(i + 1),
            "keyof" | "unique" | "readonly" | "infer" => return self.parse_postfix(i + 1),
            "new" => return self.parse_primary(i + 1),
            "asserts" if self.is_ident(i + 1) && !self.is(i + 1, "is") => {
                return if self.is(i + 2, "is") {
                    self.parse_type(i + 3)
                } else {
                    Some(i + 2)
                };
            }
            _ => {}
        }
        let mut k = self.parse_entity_name(i)?;
        if self.is(k, "<") {
            k = self.parse_angle(k)?;
        }
        if self.is(k, "is") {
            return self.parse_type(k + 1);
        }
        Some(k)
    }

    fn parse_entity_name(&self, i: usize) -> Option<usize> {
        if !self.is_ident(i) {
            return None;
        }
        let mut k = i + 1;
        while self.is(k, ".") && self.is_ident(k + 1) {
            k += 2;
        }
        Some(k)
    }

    /// Recognize a balanced `<...>` list starting at `i` (type parameters or
    /// type arguments).
    pub fn parse_angle(&self, i: usize) -> Option<usize> {
        if !self.is(i, "<") {
            return None;
        }
        let mut depth = 0usize;
        let mut k = i;
        while k < self.sig.len() {
            match self.text(k) {
                "<" => depth += 1,
                ">" => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(k + 1);
                    }
                }
                "(" | "[" | "{" => k = self.matching(k)?,
                ";" | ")" | "]" | "}" => return None,
                _ => {}
            }
            k += 1;
        }
        None
    }

    /// Recognize `<T, U, ...>` where every item is a type expression. Unlike
    /// [`parse_angle`](Self::parse_angle) this rejects comparisons that only
    /// look balanced, such as `a < b && c > (d)`.
    pub fn parse_type_arguments(&self, i: usize) -> Option<usize> {
        if !self.is(i, "<") {
            return None;
        }
        let mut k = i + 1;
        loop {
            k = self.parse_type(k)?;
            match self.text(k) {
                ">" => return Some(k + 1),
                "," => k += 1,
                _ => return None,
            }
        }
    }

    /// Given the opening paren of a group, return the index of `=>` if the
    /// group is the parameter list of an arrow function, with or without a
    /// return-type annotation.
    pub fn arrow_after_params(&self, open: usize) -> Option<usize> {
        let close = self.matching(open)?;
        if self.is(close + 1, "=>") {
            return Some(close + 1);
        }
        if self.is(close + 1, ":") {
            let end = self.parse_type(close + 2)?;
            if self.is(end, "=>") {
                return Some(end);
            }
        }
        None
    }

    /// Split the contents of a bracketed group into comma-separated ranges.
    pub fn list_items(&self, open: usize) -> Vec<(usize, usize)> {
        let Some(close) = self.matching(open) else {
            return Vec::new();
        };
        let mut items = Vec::new();
        let mut item_start = open + 1;
        let mut k = open + 1;
        while k < close {
            match self.text(k) {
                "(" | "[" | "{" => k = self.matching(k).unwrap_or(close),
                "<" => {
                    if let Some(after) = self.parse_angle(k) {
                        k = after - 1;
                    }
                }
                "," => {
                    items.push((item_start, k));
                    item_start = k + 1;
                }
                _ => {}
            }
            k += 1;
        }
        if item_start < close {
            items.push((item_start, close));
        }
        items
    }

    /// Index of the token that ends the statement starting at `i`: the first
    /// `;` outside brackets, or the last token before a line break that is not
    /// followed by a continuation.
    pub fn statement_end(&self, i: usize) -> usize {
        let mut k = i;
        while k < self.sig.len() {
            match self.text(k) {
                ";" => return k,
                "(" | "[" | "{" => match self.matching(k) {
                    Some(close) => k = close,
                    None => return self.sig.len() - 1,
                },
                _ => {}
            }
            let next = k + 1;
            if next >= self.sig.len() {
                return k;
            }
            let line_break = self.src[self.end(k)..self.start(next)].contains('\n');
            if line_break && !continues(self.text(k)) && !continues_from(self.text(next)) {
                return k;
            }
            k = next;
        }
        self.sig.len().saturating_sub(1)
    }
}

fn continues(text: &str) -> bool {
    matches!(
        text,
        "=" | "|" | "&" | "," | "?" | ":" | "=>" | "<" | "." | "extends" | "keyof" | "typeof"
    )
}

fn continues_from(text: &str) -> bool {
    matches!(text, "|" | "&" | "." | "?" | ":" | "=" | "extends" | ">" | "=>")
}

fn match_brackets(src: &str, sig: &[Token]) -> Vec<Option<usize>> {
    let mut matching = vec![None; sig.len()];
    let mut stack: Vec<(usize, &str)> = Vec::new();
    for (i, token) in sig.iter().enumerate() {
        if token.kind != TokenKind::Punct {
            continue;
        }
        let text = token.text(src);
        let opener = match text {
            "(" | "[" | "{" => {
                stack.push((i, text));
                continue;
            }
            ")" => "(",
            "]" => "[",
            "}" => "{",
            _ => continue,
        };
        if let Some(pos) = stack.iter().rposition(|(_, open)| *open == opener) {
            let (open_idx, _) = stack[pos];
            stack.truncate(pos);
            matching[open_idx] = Some(i);
            matching[i] = Some(open_idx);
        }
    }
    matching
}
