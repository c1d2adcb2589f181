//! Template string parser.
//!
//! Grammar:
//!
//! ```text
//! template  := (literal | '{' expr '}')*
//! expr      := name | '$' call
//! call      := name [ '(' args ')' | '[' args ']' ]
//! args      := [ arg (',' arg)* ]
//! arg       := '$' call | '{' name '}' | quoted | bare
//! ```

use super::{Segment, Template, TemplateError};

/// Characters that may follow a backslash.
const ESCAPABLE: &[char] = &['\\', '{', '}', '(', ')', '[', ']', ',', '\'', '$'];

/// Parse a template string.
pub fn parse(input: &str) -> Result<Template, TemplateError> {
    Parser::new(input).parse_template()
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn closer_for(open: char) -> char {
    if open == '[' {
        ']'
    } else {
        ')'
    }
}

struct Parser<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|&(i, _)| i)
            .unwrap_or(self.src.len())
    }

    fn error(&self, reason: impl Into<String>) -> TemplateError {
        TemplateError::Malformed {
            template: self.src.to_string(),
            position: self.offset(),
            reason: reason.into(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse_template(mut self) -> Result<Template, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();

        while let Some(c) = self.peek() {
            match c {
                '\\' => literal.push(self.parse_escape()?),
                '{' => {
                    self.pos += 1;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(self.parse_expression()?);
                }
                '}' => return Err(self.error("unbalanced '}'")),
                other => {
                    literal.push(other);
                    self.pos += 1;
                }
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Template::from_segments(segments))
    }

    fn parse_escape(&mut self) -> Result<char, TemplateError> {
        self.pos += 1;
        match self.peek() {
            Some(c) if ESCAPABLE.contains(&c) => {
                self.pos += 1;
                Ok(c)
            }
            Some(c) => Err(self.error(format!("unknown escape sequence '\\{}'", c))),
            None => Err(self.error("dangling escape at end of template")),
        }
    }

    fn parse_name(&mut self, what: &str) -> Result<String, TemplateError> {
        let mut name = String::new();
        while let Some(c) = self.peek().filter(|c| is_name_char(*c)) {
            name.push(c);
            self.pos += 1;
        }
        if name.is_empty() {
            return Err(self.error(format!("expected {} name", what)));
        }
        Ok(name)
    }

    /// Parse the inside of `{...}`; the opening brace is already consumed.
    fn parse_expression(&mut self) -> Result<Segment, TemplateError> {
        let segment = if self.peek() == Some('$') {
            self.pos += 1;
            self.parse_call()?
        } else {
            Segment::Param(self.parse_name("parameter")?)
        };
        self.expect_close_brace()?;
        Ok(segment)
    }

    fn expect_close_brace(&mut self) -> Result<(), TemplateError> {
        match self.bump() {
            Some('}') => Ok(()),
            Some(c) => {
                self.pos -= 1;
                Err(self.error(format!("expected '}}', found '{}'", c)))
            }
            None => Err(self.error("unbalanced '{': expression is never closed")),
        }
    }

    /// Parse `name(args)`; the leading `$` is already consumed.
    fn parse_call(&mut self) -> Result<Segment, TemplateError> {
        let name = self.parse_name("function")?;
        let args = match self.peek() {
            Some(open @ ('(' | '[')) => {
                self.pos += 1;
                self.parse_args(open)?
            }
            _ => Vec::new(),
        };
        Ok(Segment::Call { name, args })
    }

    fn parse_args(&mut self, open: char) -> Result<Vec<Segment>, TemplateError> {
        let close = closer_for(open);
        let mut args = Vec::new();

        self.skip_whitespace();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(args);
        }

        loop {
            self.skip_whitespace();
            args.push(self.parse_arg(close)?);
            self.skip_whitespace();

            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(args),
                Some(c @ (')' | ']')) => {
                    self.pos -= 1;
                    return Err(self.error(format!(
                        "mismatched '{}': '{}' opened this argument list",
                        c, open
                    )));
                }
                Some(c) => {
                    self.pos -= 1;
                    return Err(self.error(format!("expected ',' or '{}', found '{}'", close, c)));
                }
                None => return Err(self.error(format!("unclosed '{}' in function call", open))),
            }
        }
    }

    fn parse_arg(&mut self, close: char) -> Result<Segment, TemplateError> {
        match self.peek() {
            Some('$') => {
                self.pos += 1;
                self.parse_call()
            }
            Some('{') => {
                self.pos += 1;
                let name = self.parse_name("parameter")?;
                self.expect_close_brace()?;
                Ok(Segment::Param(name))
            }
            Some('\'') => {
                self.pos += 1;
                self.parse_quoted()
            }
            _ => self.parse_bare(close),
        }
    }

    fn parse_quoted(&mut self) -> Result<Segment, TemplateError> {
        let mut value = String::new();
        loop {
            match self.peek() {
                Some('\\') => value.push(self.parse_escape()?),
                Some('\'') => {
                    self.pos += 1;
                    return Ok(Segment::Literal(value));
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
                None => return Err(self.error("unterminated quoted argument")),
            }
        }
    }

    fn parse_bare(&mut self, close: char) -> Result<Segment, TemplateError> {
        let mut value = String::new();
        while let Some(c) = self.peek() {
            match c {
                '\\' => value.push(self.parse_escape()?),
                ',' | ')' | ']' | '}' => break,
                '{' | '(' | '[' | '\'' => {
                    return Err(self.error(format!("unexpected '{}' in argument", c)));
                }
                other => {
                    value.push(other);
                    self.pos += 1;
                }
            }
        }

        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(self.error(format!("empty argument before '{}'", close)));
        }
        Ok(Segment::Literal(trimmed.to_string()))
    }
}
