//! Tokenizer for template source.
//!
//! The lexer alternates between two modes. In *data* mode it copies text
//! verbatim until the next tag opener; inside a tag it emits code tokens until
//! the matching closer. Whitespace control (`-` markers, `trim_blocks`,
//! `lstrip_blocks`) is applied here so the parser only ever sees final text.

use regex::Regex;

use super::ParseError;
use super::environment::{EnvironmentOptions, TagSyntax};

/// Kind of a lexed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Literal text between tags
    Data,
    /// Body of a `raw`/`verbatim` block
    Raw,
    BlockStart,
    BlockEnd,
    VariableStart,
    VariableEnd,
    String,
    Int,
    Float,
    Symbol,
    /// Arithmetic, comparison, assignment, `~`, `!` and `.`
    Operator,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftCurly,
    RightCurly,
    Comma,
    Colon,
    Pipe,
    Eof,
}

/// A token with its 1-based source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub line: usize,
    pub col: usize,
}

impl Token {
    /// Whether this is a symbol token spelling `name`.
    #[must_use]
    pub fn is_symbol(&self, name: &str) -> bool {
        self.kind == TokenKind::Symbol && self.value == name
    }

    /// Whether this is an operator token spelling `op`.
    #[must_use]
    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.value == op
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Block,
    Variable,
    Comment,
}

const OPERATORS: [&str; 19] = [
    "===", "!==", "==", "!=", "<=", ">=", "//", "**", "+", "-", "*", "/", "%", "<", ">", "=", "!",
    "~", ".",
];

/// Tokenize `source` with the delimiters and whitespace options of `options`.
///
/// # Errors
///
/// Returns a [`ParseError`] for unterminated tags, comments, strings or raw
/// blocks and for characters that start no token.
pub fn tokenize(
    template: &str,
    source: &str,
    options: &EnvironmentOptions,
) -> Result<Vec<Token>, ParseError> {
    Lexer::new(template, source, options).run()
}

struct Lexer<'a> {
    template: &'a str,
    src: &'a str,
    pos: usize,
    line: usize,
    col: usize,
    tags: &'a TagSyntax,
    trim_blocks: bool,
    lstrip_blocks: bool,
    strip_next: bool,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(template: &'a str, src: &'a str, options: &'a EnvironmentOptions) -> Self {
        Self {
            template,
            src,
            pos: 0,
            line: 1,
            col: 1,
            tags: &options.tags,
            trim_blocks: options.trim_blocks,
            lstrip_blocks: options.lstrip_blocks,
            strip_next: false,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        while self.pos < self.src.len() {
            let Some((tag_at, tag)) = self.next_tag() else {
                let data = self.take_data(self.src.len(), None);
                self.push_data(data);
                break;
            };

            let data = self.take_data(tag_at, Some(tag));
            self.push_data(data);

            match tag {
                TagKind::Comment => self.lex_comment()?,
                TagKind::Block => self.lex_tag(TagKind::Block)?,
                TagKind::Variable => self.lex_tag(TagKind::Variable)?,
            }
        }

        self.tokens.push(Token {
            kind: TokenKind::Eof,
            value: String::new(),
            line: self.line,
            col: self.col,
        });
        Ok(self.tokens)
    }

    fn error(&self, message: impl Into<String>, line: usize, col: usize) -> ParseError {
        ParseError::new(self.template, message, Some(line), Some(col))
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    /// Advance `n` bytes, keeping line and column in sync.
    fn bump(&mut self, n: usize) {
        for ch in self.src[self.pos..self.pos + n].chars() {
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.pos += n;
    }

    fn next_tag(&self) -> Option<(usize, TagKind)> {
        let rest = self.rest();
        [
            (self.tags.block_start.as_str(), TagKind::Block),
            (self.tags.variable_start.as_str(), TagKind::Variable),
            (self.tags.comment_start.as_str(), TagKind::Comment),
        ]
        .into_iter()
        .filter_map(|(opener, kind)| rest.find(opener).map(|at| (at, opener.len(), kind)))
        // Earliest opener wins; on a tie the longer opener is the real one.
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
        .map(|(at, _, kind)| (self.pos + at, kind))
    }

    fn opener(&self, tag: TagKind) -> &'a str {
        match tag {
            TagKind::Block => &self.tags.block_start,
            TagKind::Variable => &self.tags.variable_start,
            TagKind::Comment => &self.tags.comment_start,
        }
    }

    fn closer(&self, tag: TagKind) -> &'a str {
        match tag {
            TagKind::Block => &self.tags.block_end,
            TagKind::Variable => &self.tags.variable_end,
            TagKind::Comment => &self.tags.comment_end,
        }
    }

    /// Slice the text up to `end`, applying whitespace control for the tag
    /// that follows it.
    fn take_data(&mut self, end: usize, tag: Option<TagKind>) -> (usize, usize, String) {
        let start = self.pos;
        let (line, col) = (self.line, self.col);
        let mut lo = start;
        let mut hi = end;

        if std::mem::take(&mut self.strip_next) {
            let slice = &self.src[start..end];
            lo += slice.len() - slice.trim_start().len();
        }

        if let Some(tag) = tag {
            let after_opener = &self.src[end + self.opener(tag).len()..];
            if after_opener.starts_with('-') {
                hi = lo + self.src[lo..hi].trim_end().len();
            } else if self.lstrip_blocks && tag != TagKind::Variable {
                let line_start = self.src[..end].rfind('\n').map_or(0, |i| i + 1);
                let indent = &self.src[line_start..end];
                if line_start >= lo && indent.chars().all(|c| c == ' ' || c == '\t') {
                    hi = line_start;
                }
            }
        }

        let owned = self.src[lo..hi].to_string();
        self.bump(end - start);
        (line, col, owned)
    }

    fn push_data(&mut self, (line, col, data): (usize, usize, String)) {
        if !data.is_empty() {
            self.tokens.push(Token {
                kind: TokenKind::Data,
                value: data,
                line,
                col,
            });
        }
    }

    fn skip_trimmed_newline(&mut self) {
        if !self.trim_blocks {
            return;
        }
        if self.rest().starts_with("\r\n") {
            self.bump(2);
        } else if self.rest().starts_with('\n') {
            self.bump(1);
        }
    }

    fn lex_comment(&mut self) -> Result<(), ParseError> {
        let (line, col) = (self.line, self.col);
        let opener = self.tags.comment_start.len();
        let closer = self.tags.comment_end.as_str();
        let Some(at) = self.rest()[opener..].find(closer) else {
            return Err(self.error("expected end of comment, got end of file", line, col));
        };
        let body = &self.rest()[opener..opener + at];
        self.strip_next = body.ends_with('-');
        self.bump(opener + at + closer.len());
        self.skip_trimmed_newline();
        Ok(())
    }

    fn lex_tag(&mut self, tag: TagKind) -> Result<(), ParseError> {
        let (line, col) = (self.line, self.col);
        let opener = self.opener(tag);
        let mut len = opener.len();
        if self.rest()[len..].starts_with('-') {
            len += 1;
        }

        if tag == TagKind::Block && self.try_lex_raw(len)? {
            return Ok(());
        }

        self.tokens.push(Token {
            kind: if tag == TagKind::Block {
                TokenKind::BlockStart
            } else {
                TokenKind::VariableStart
            },
            value: opener.to_string(),
            line,
            col,
        });
        self.bump(len);

        self.strip_next = self.lex_code(tag, line, col)?;
        if tag == TagKind::Block {
            self.skip_trimmed_newline();
        }
        Ok(())
    }

    /// Handle `{% raw %}` / `{% verbatim %}`. Returns `false` if the tag is
    /// anything else, leaving the position untouched.
    fn try_lex_raw(&mut self, opener_len: usize) -> Result<bool, ParseError> {
        let after = &self.rest()[opener_len..];
        let ws_before = after.len() - after.trim_start().len();
        let trimmed = &after[ws_before..];
        let word: String =
            trimmed.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
        if word != "raw" && word != "verbatim" {
            return Ok(false);
        }
        let after_word = &trimmed[word.len()..];
        let ws_after = after_word.len() - after_word.trim_start().len();
        let tail = &after_word[ws_after..];
        let closer = self.tags.block_end.as_str();
        let open_strip = tail.starts_with('-') && tail[1..].starts_with(closer);
        if !(open_strip || tail.starts_with(closer)) {
            return Ok(false);
        }

        let (line, col) = (self.line, self.col);
        let open_len = opener_len
            + ws_before
            + word.len()
            + ws_after
            + usize::from(open_strip)
            + closer.len();

        let end_re = Regex::new(&format!(
            r"{}(-?)\s*end{}\s*(-?){}",
            regex::escape(&self.tags.block_start),
            word,
            regex::escape(closer)
        ))
        .map_err(|e| self.error(format!("invalid raw block delimiters: {e}"), line, col))?;

        let body_src = &self.rest()[open_len..];
        let Some(found) = end_re.captures(body_src) else {
            return Err(self.error(format!("expected end{word}, got end of file"), line, col));
        };
        let Some(whole) = found.get(0) else {
            return Ok(false);
        };

        let mut body = &body_src[..whole.start()];
        if open_strip {
            body = body.trim_start();
        }
        if found.get(1).is_some_and(|m| !m.as_str().is_empty()) {
            body = body.trim_end();
        }
        let strip_after = found.get(2).is_some_and(|m| !m.as_str().is_empty());

        self.tokens.push(Token {
            kind: TokenKind::Raw,
            value: body.to_string(),
            line,
            col,
        });
        self.bump(open_len + whole.end());
        self.strip_next = strip_after;
        self.skip_trimmed_newline();
        Ok(true)
    }

    /// Lex code tokens up to the tag closer. Returns whether the closer
    /// carried a `-` strip marker.
    fn lex_code(&mut self, tag: TagKind, line: usize, col: usize) -> Result<bool, ParseError> {
        let closer = self.closer(tag);
        let mut curly_depth = 0usize;

        loop {
            let ws = self.rest().len() - self.rest().trim_start().len();
            self.bump(ws);

            let rest = self.rest();
            if rest.is_empty() {
                let what = if tag == TagKind::Block {
                    "block"
                } else {
                    "variable"
                };
                return Err(self.error(format!("expected end of {what} tag, got end of file"), line, col));
            }

            if curly_depth == 0 {
                let stripped = rest.starts_with('-') && rest[1..].starts_with(closer);
                if stripped || rest.starts_with(closer) {
                    self.tokens.push(Token {
                        kind: if tag == TagKind::Block {
                            TokenKind::BlockEnd
                        } else {
                            TokenKind::VariableEnd
                        },
                        value: closer.to_string(),
                        line: self.line,
                        col: self.col,
                    });
                    self.bump(closer.len() + usize::from(stripped));
                    return Ok(stripped);
                }
            }

            let (tok_line, tok_col) = (self.line, self.col);
            let Some(ch) = rest.chars().next() else {
                continue;
            };

            let (kind, value, len) = match ch {
                '"' | '\'' => self.lex_string(ch)?,
                c if c.is_ascii_digit() => lex_number(rest),
                c if c.is_alphabetic() || c == '_' || c == '$' => {
                    let len = rest
                        .char_indices()
                        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '$'))
                        .map_or(rest.len(), |(i, _)| i);
                    (TokenKind::Symbol, rest[..len].to_string(), len)
                }
                '(' => (TokenKind::LeftParen, "(".into(), 1),
                ')' => (TokenKind::RightParen, ")".into(), 1),
                '[' => (TokenKind::LeftBracket, "[".into(), 1),
                ']' => (TokenKind::RightBracket, "]".into(), 1),
                '{' => {
                    curly_depth += 1;
                    (TokenKind::LeftCurly, "{".into(), 1)
                }
                '}' => {
                    curly_depth = curly_depth.saturating_sub(1);
                    (TokenKind::RightCurly, "}".into(), 1)
                }
                ',' => (TokenKind::Comma, ",".into(), 1),
                ':' => (TokenKind::Colon, ":".into(), 1),
                '|' => (TokenKind::Pipe, "|".into(), 1),
                _ => match OPERATORS.iter().find(|op| rest.starts_with(*op)) {
                    Some(op) => (TokenKind::Operator, (*op).to_string(), op.len()),
                    None => {
                        return Err(self.error(
                            format!("unexpected character '{ch}'"),
                            tok_line,
                            tok_col,
                        ));
                    }
                },
            };

            self.tokens.push(Token {
                kind,
                value,
                line: tok_line,
                col: tok_col,
            });
            self.bump(len);
        }
    }

    fn lex_string(&self, quote: char) -> Result<(TokenKind, String, usize), ParseError> {
        let rest = self.rest();
        let mut value = String::new();
        let mut chars = rest.char_indices().skip(1);

        while let Some((i, ch)) = chars.next() {
            match ch {
                '\\' => {
                    let Some((_, escaped)) = chars.next() else {
                        break;
                    };
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c if c == quote => return Ok((TokenKind::String, value, i + c.len_utf8())),
                c => value.push(c),
            }
        }

        Err(self.error("unterminated string literal", self.line, self.col))
    }
}

fn lex_number(rest: &str) -> (TokenKind, String, usize) {
    let int_len = rest.chars().take_while(char::is_ascii_digit).count();
    let after = &rest[int_len..];
    if after.starts_with('.') && after[1..].chars().next().is_some_and(|c| c.is_ascii_digit()) {
        let frac_len = after[1..].chars().take_while(char::is_ascii_digit).count();
        let len = int_len + 1 + frac_len;
        (TokenKind::Float, rest[..len].to_string(), len)
    } else {
        (TokenKind::Int, rest[..int_len].to_string(), int_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        tokenize("test.njk", source, &EnvironmentOptions::default()).unwrap()
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_data_and_variable() {
        let tokens = lex("Hello {{ name }}!");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Data,
                TokenKind::VariableStart,
                TokenKind::Symbol,
                TokenKind::VariableEnd,
                TokenKind::Data,
                TokenKind::Eof
            ]
        );
        assert_eq!(tokens[0].value, "Hello ");
        assert_eq!(tokens[2].value, "name");
        assert_eq!((tokens[2].line, tokens[2].col), (1, 10));
    }

    #[test]
    fn test_string_escapes_and_numbers() {
        let tokens = lex(r#"{{ "a\"b" 'c' 12 3.5 }}"#);
        assert_eq!(tokens[1].kind, TokenKind::String);
        assert_eq!(tokens[1].value, "a\"b");
        assert_eq!(tokens[2].value, "c");
        assert_eq!(tokens[3].kind, TokenKind::Int);
        assert_eq!(tokens[4].kind, TokenKind::Float);
        assert_eq!(tokens[4].value, "3.5");
    }

    #[test]
    fn test_comments_are_dropped() {
        let tokens = lex("a{# note #}b");
        let data: Vec<_> = tokens.iter().filter(|t| t.kind == TokenKind::Data).collect();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].value, "a");
        assert_eq!(data[1].value, "b");
    }

    #[test]
    fn test_strip_markers() {
        let tokens = lex("a  {%- if x -%}  b");
        assert_eq!(tokens[0].value, "a");
        assert_eq!(tokens.iter().rev().nth(1).unwrap().value, "b");
    }

    #[test]
    fn test_trim_and_lstrip_blocks() {
        let options = EnvironmentOptions {
            trim_blocks: true,
            lstrip_blocks: true,
            ..EnvironmentOptions::default()
        };
        let tokens = tokenize("t", "<ul>\n  {% if x %}\n  <li>\n  {% endif %}\n</ul>", &options)
            .unwrap();
        let text: String = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Data)
            .map(|t| t.value.as_str())
            .collect();
        assert_eq!(text, "<ul>\n  <li>\n</ul>");
    }

    #[test]
    fn test_raw_block() {
        let tokens = lex("{% raw %}{{ not_a_var }}{% endraw %}done");
        assert_eq!(tokens[0].kind, TokenKind::Raw);
        assert_eq!(tokens[0].value, "{{ not_a_var }}");
        assert_eq!(tokens[1].value, "done");
    }

    #[test]
    fn test_custom_delimiters() {
        let options = EnvironmentOptions {
            tags: TagSyntax {
                variable_start: "<$".into(),
                variable_end: "$>".into(),
                ..TagSyntax::default()
            },
            ..EnvironmentOptions::default()
        };
        let tokens = tokenize("t", "{{ x }} <$ y $>", &options).unwrap();
        assert_eq!(tokens[0].value, "{{ x }} ");
        assert_eq!(tokens[1].kind, TokenKind::VariableStart);
        assert_eq!(tokens[2].value, "y");
    }

    #[test]
    fn test_dict_literal_does_not_close_variable() {
        let tokens = lex("{{ {a: {b: 1}} }}");
        assert_eq!(tokens.iter().filter(|t| t.kind == TokenKind::RightCurly).count(), 2);
        assert_eq!(tokens.iter().rev().nth(1).unwrap().kind, TokenKind::VariableEnd);
    }

    #[test]
    fn test_unterminated_tag_reports_location() {
        let err = tokenize("t", "line\n  {{ name", &EnvironmentOptions::default()).unwrap_err();
        assert_eq!(err.line, Some(2));
        assert_eq!(err.col, Some(3));
        assert!(err.message.contains("variable tag"));
    }
}
