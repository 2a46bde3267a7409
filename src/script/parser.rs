#[derive(Debug)]
pub enum ParseError {
    InvalidSyntax(String),
}

impl From<ParseError> for crate::errors::FieldError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidSyntax(msg) => crate::errors::FieldError::ScriptCompilation(msg),
        }
    }
}

/// Character cursor over script source.
pub struct Parser<'a> {
    s: &'a str,
    i: usize,
}

impl<'a> Parser<'a> {
    pub fn new(s: &'a str) -> Self {
        Self { s, i: 0 }
    }

    pub fn parse_identifier(&mut self) -> Result<String, ParseError> {
        let start = self.i;
        while let Some(c) = self.peek_char() {
            if c == '_' || c.is_ascii_alphanumeric() {
                self.i += 1;
            } else {
                break;
            }
        }
        if self.i == start {
            return Err(ParseError::InvalidSyntax(format!(
                "identifier expected at offset {start}"
            )));
        }
        Ok(self.s[start..self.i].to_string())
    }

    pub fn parse_quoted_string(&mut self) -> Result<String, ParseError> {
        let quote = self
            .peek_char()
            .ok_or_else(|| ParseError::InvalidSyntax("string expected".into()))?;
        if quote != '\'' && quote != '"' {
            return Err(ParseError::InvalidSyntax("expected quoted string".into()));
        }
        self.i += 1;
        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            self.i += c.len_utf8();
            if c == quote {
                return Ok(out);
            }
            if c == '\\' {
                if let Some(nc) = self.peek_char() {
                    self.i += nc.len_utf8();
                    match nc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '\\' => out.push('\\'),
                        '"' => out.push('"'),
                        '\'' => out.push('\''),
                        _ => {
                            out.push('\\');
                            out.push(nc);
                        }
                    }
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        Err(ParseError::InvalidSyntax("unterminated string".into()))
    }

    pub fn expect(&mut self, c: char) -> Result<(), ParseError> {
        if self.consume_char(c) {
            Ok(())
        } else {
            Err(ParseError::InvalidSyntax(format!(
                "expected '{c}' at offset {}",
                self.i
            )))
        }
    }

    pub fn consume_char(&mut self, c: char) -> bool {
        if self.peek_char() == Some(c) {
            self.i += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub fn peek_char(&self) -> Option<char> {
        self.s[self.i..].chars().next()
    }

    pub fn skip_ws(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.i += c.len_utf8();
            } else {
                break;
            }
        }
    }

    pub fn eof(&self) -> bool {
        self.i >= self.s.len()
    }
}
