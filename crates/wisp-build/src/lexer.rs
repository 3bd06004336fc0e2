//! A small, lossless tokenizer for the accepted source dialect.
//!
//! Every byte of the input belongs to exactly one token, so any text can be
//! rebuilt from the token spans. Whitespace and comments are kept as trivia.
//! The lexer never fails: unterminated literals run to the end of their line
//! (or of the input) and unknown characters become single-character
//! punctuators.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    LineComment,
    BlockComment,
    Ident,
    Number,
    String,
    Template,
    Regex,
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }

    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }
}

/// Multi-character punctuators, longest first.
///
/// `>` is never merged with what follows it so that nested generic argument
/// lists (`Array<Array<T>>`) close one level per token.
const PUNCTUATORS: &[&str] = &[
    "...", "===", "!==", "**=", "<<=", "&&=", "||=", "??=", "=>", "==", "!=", "<=", "&&", "||",
    "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "**", "<<",
];

/// Keywords after which a `/` starts a regular expression rather than a division.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

pub fn tokenize(src: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(src, 0);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token() {
        tokens.push(token);
    }
    tokens
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    prev_significant: Option<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, pos: usize) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos,
            prev_significant: None,
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn next_token(&mut self) -> Option<Token> {
        let start = self.pos;
        let first = self.peek(0)?;
        let kind = match first {
            b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c => {
                while matches!(self.peek(0), Some(b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)) {
                    self.pos += 1;
                }
                TokenKind::Whitespace
            }
            b'/' if self.peek(1) == Some(b'/') => {
                while !matches!(self.peek(0), None | Some(b'\n')) {
                    self.pos += 1;
                }
                TokenKind::LineComment
            }
            b'/' if self.peek(1) == Some(b'*') => {
                self.pos += 2;
                match self.src[self.pos..].find("*/") {
                    Some(offset) => self.pos += offset + 2,
                    None => self.pos = self.bytes.len(),
                }
                TokenKind::BlockComment
            }
            b'/' if self.regex_allowed() && self.scan_regex() => TokenKind::Regex,
            b'"' | b'\'' => {
                self.scan_string(first);
                TokenKind::String
            }
            b'`' => {
                self.scan_template();
                TokenKind::Template
            }
            b'0'..=b'9' => {
                self.scan_number();
                TokenKind::Number
            }
            b'.' if matches!(self.peek(1), Some(b'0'..=b'9')) => {
                self.scan_number();
                TokenKind::Number
            }
            b'#' if self.peek(1).is_some_and(is_ident_start) => {
                self.pos += 1;
                self.scan_ident();
                TokenKind::Ident
            }
            c if is_ident_start(c) => {
                self.scan_ident();
                TokenKind::Ident
            }
            _ => {
                self.scan_punct();
                TokenKind::Punct
            }
        };

        let token = Token {
            kind,
            start,
            end: self.pos,
        };
        if !token.is_trivia() {
            self.prev_significant = Some(token);
        }
        Some(token)
    }

    fn regex_allowed(&self) -> bool {
        let Some(prev) = self.prev_significant else {
            return true;
        };
        let text = prev.text(self.src);
        match prev.kind {
            TokenKind::Ident => REGEX_PREFIX_KEYWORDS.contains(&text),
            TokenKind::Number | TokenKind::String | TokenKind::Template | TokenKind::Regex => false,
            TokenKind::Punct => !matches!(text, ")" | "]" | "}" | "++" | "--"),
            _ => true,
        }
    }

    /// Consume a regular expression literal. Returns false, consuming nothing,
    /// if the literal is not closed on the same line.
    fn scan_regex(&mut self) -> bool {
        let mut pos = self.pos + 1;
        let mut in_class = false;
        loop {
            match self.bytes.get(pos) {
                None | Some(b'\n') => return false,
                Some(b'\\') => pos += 2,
                Some(b'[') => {
                    in_class = true;
                    pos += 1;
                }
                Some(b']') => {
                    in_class = false;
                    pos += 1;
                }
                Some(b'/') if !in_class => {
                    pos += 1;
                    break;
                }
                Some(_) => pos += 1,
            }
        }
        while self.bytes.get(pos).is_some_and(|&c| is_ident_continue(c)) {
            pos += 1;
        }
        self.pos = pos;
        true
    }

    fn scan_string(&mut self, quote: u8) {
        self.pos += 1;
        while let Some(c) = self.peek(0) {
            match c {
                b'\\' => self.pos = (self.pos + 2).min(self.bytes.len()),
                b'\n' => return,
                c if c == quote => {
                    self.pos += 1;
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn scan_template(&mut self) {
        self.pos += 1;
        while let Some(c) = self.peek(0) {
            match c {
                b'\\' => self.pos = (self.pos + 2).min(self.bytes.len()),
                b'`' => {
                    self.pos += 1;
                    return;
                }
                b'$' if self.peek(1) == Some(b'{') => {
                    self.pos += 2;
                    self.pos = self.skip_substitution();
                }
                _ => self.pos += 1,
            }
        }
    }

    /// Lex the code inside a `${ ... }` substitution and return the position
    /// just past its closing brace.
    fn skip_substitution(&self) -> usize {
        let mut inner = Lexer::new(self.src, self.pos);
        let mut depth = 0usize;
        while let Some(token) = inner.next_token() {
            if token.kind != TokenKind::Punct {
                continue;
            }
            match token.text(self.src) {
                "{" => depth += 1,
                "}" if depth == 0 => return token.end,
                "}" => depth -= 1,
                _ => {}
            }
        }
        self.bytes.len()
    }

    fn scan_number(&mut self) {
        let hex = self.peek(0) == Some(b'0') && matches!(self.peek(1), Some(b'x' | b'X'));
        while let Some(c) = self.peek(0) {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' {
                self.pos += 1;
            } else if matches!(c, b'+' | b'-')
                && !hex
                && matches!(self.bytes.get(self.pos - 1), Some(b'e' | b'E'))
            {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn scan_ident(&mut self) {
        while let Some(c) = self.peek(0) {
            if is_ident_continue(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn scan_punct(&mut self) {
        let rest = &self.src[self.pos..];
        if rest.starts_with("?.") && matches!(self.peek(2), Some(b'0'..=b'9')) {
            self.pos += 1;
            return;
        }
        if let Some(punct) = PUNCTUATORS.iter().find(|p| rest.starts_with(*p)) {
            self.pos += punct.len();
            return;
        }
        let width = rest.chars().next().map_or(1, char::len_utf8);
        self.pos += width;
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$' || c >= 0x80
}

fn is_ident_continue(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn significant(src: &str) -> Vec<(TokenKind, &str)> {
        tokenize(src)
            .into_iter()
            .filter(|t| !t.is_trivia())
            .map(|t| (t.kind, t.text(src)))
            .collect()
    }

    #[test]
    fn tokens_cover_every_byte() {
        let src = "const a = `x${b + `y${c}`}z`; // done\n/* block */ let r = /a\\/b[/]/g;";
        let rebuilt: String = tokenize(src).iter().map(|t| t.text(src)).collect();
        assert_eq!(rebuilt, src);
    }

    #[test]
    fn comments_and_strings_are_single_tokens() {
        let src = "// export function fake() {}\nconst s = \"export function alsoFake(\";";
        let tokens = significant(src);
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Ident, "const"),
                (TokenKind::Ident, "s"),
                (TokenKind::Punct, "="),
                (TokenKind::String, "\"export function alsoFake(\""),
                (TokenKind::Punct, ";"),
            ]
        );
    }

    #[test]
    fn template_substitutions_nest() {
        let src = "`a ${ { b: `c ${d}` }.b } e` + 1";
        let tokens = significant(src);
        assert_eq!(tokens[0].0, TokenKind::Template);
        assert_eq!(tokens[0].1, "`a ${ { b: `c ${d}` }.b } e`");
        assert_eq!(tokens[1], (TokenKind::Punct, "+"));
    }

    #[test]
    fn slash_after_expression_is_division() {
        let tokens = significant("x = a / b / c");
        assert!(tokens.iter().all(|(kind, _)| *kind != TokenKind::Regex));

        let tokens = significant("return /ab+c/i.test(s)");
        assert_eq!(tokens[1], (TokenKind::Regex, "/ab+c/i"));
    }

    #[test]
    fn greater_than_is_never_merged() {
        let tokens = significant("Array<Array<T>>");
        let closers = tokens.iter().filter(|(_, text)| *text == ">").count();
        assert_eq!(closers, 2);
    }

    #[test]
    fn numbers_with_exponents() {
        let tokens = significant("1e-5 + 0x1F - .5");
        assert_eq!(tokens[0], (TokenKind::Number, "1e-5"));
        assert_eq!(tokens[2], (TokenKind::Number, "0x1F"));
        assert_eq!(tokens[4], (TokenKind::Number, ".5"));
    }

    #[test]
    fn unterminated_string_stops_at_newline() {
        let src = "'abc\nnext";
        let tokens = significant(src);
        assert_eq!(tokens[0], (TokenKind::String, "'abc"));
        assert_eq!(tokens[1], (TokenKind::Ident, "next"));
    }
}
