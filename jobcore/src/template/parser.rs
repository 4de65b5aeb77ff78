use super::TemplateError;

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Segment {
    Text(String),
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Expr {
    Str(String),
    Path(Vec<String>),
    Call { function: String, args: Vec<Expr> },
}

pub(super) fn parse(template: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        let body = &rest[start + 2..];
        let mut parser = Parser {
            src: body,
            pos: 0,
            template,
        };
        let expr = parser.expr()?;
        parser.skip_ws();
        parser.expect('}')?;
        segments.push(Segment::Expr(expr));
        rest = &body[parser.pos..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    template: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn error(&self, reason: impl Into<String>) -> TemplateError {
        TemplateError::Syntax {
            template: self.template.to_string(),
            reason: reason.into(),
        }
    }

    fn expect(&mut self, want: char) -> Result<(), TemplateError> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", want, c))),
            None => Err(self.error(format!("expected '{}', found end of template", want))),
        }
    }

    fn expr(&mut self) -> Result<Expr, TemplateError> {
        self.skip_ws();
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                self.string(quote).map(Expr::Str)
            }
            Some(c) if is_ident_start(c) => {
                let first = self.ident();
                self.skip_ws();
                if self.peek() == Some('(') {
                    self.bump();
                    let args = self.args()?;
                    return Ok(Expr::Call {
                        function: first,
                        args,
                    });
                }
                let mut path = vec![first];
                while self.peek() == Some('.') {
                    self.bump();
                    self.skip_ws();
                    match self.peek() {
                        Some(c) if is_ident_char(c) => path.push(self.ident()),
                        _ => return Err(self.error("expected a member name after '.'")),
                    }
                    self.skip_ws();
                }
                Ok(Expr::Path(path))
            }
            Some(c) => Err(self.error(format!("unexpected '{}'", c))),
            None => Err(self.error("unterminated expression")),
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>, TemplateError> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.bump();
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(')') => return Ok(args),
                Some(c) => return Err(self.error(format!("expected ',' or ')', found '{}'", c))),
                None => return Err(self.error("unterminated argument list")),
            }
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn string(&mut self, quote: char) -> Result<String, TemplateError> {
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string literal")),
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(c) => s.push(c),
                    None => return Err(self.error("unterminated string literal")),
                },
                Some(c) if c == quote => return Ok(s),
                Some(c) => s.push(c),
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

// input ids are allowed to contain dashes and digits
fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}
