use std::sync::Arc;

use num::rational::Rational64;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::{Form, FormKind, RegexOptions, Span};
use crate::error::QuinceError;
use crate::options::max_depth_from_env;
use crate::short_fn::{parse_placeholder, ShortFnState};
use crate::symbols::{is_identifier_char, SymbolTable};
use crate::syntax_quote::SyntaxQuoter;

static INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d+$").expect("int regex"));
static RADIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-]?)(\d+)r([a-zA-Z0-9]+)$").expect("radix regex"));
static FLOAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?\d+\.?\d*(?:e[+-]?\d+)?$").expect("float regex"));
static RATIONAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-]?\d+)/(\d+)$").expect("rational regex"));

#[derive(Clone)]
pub struct ReaderOptions {
    pub source_name: String,
    pub start_line: usize,
    pub symbols: Arc<SymbolTable>,
    /// Deepest form nesting accepted.
    pub max_depth: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            source_name: "(eval)".to_string(),
            start_line: 1,
            symbols: SymbolTable::global(),
            max_depth: max_depth_from_env(),
        }
    }
}

impl ReaderOptions {
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    pub fn with_start_line(mut self, line: usize) -> Self {
        self.start_line = line.max(1);
        self
    }

    pub fn with_symbols(mut self, symbols: Arc<SymbolTable>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }
}

pub struct Reader {
    chars: Vec<char>,
    index: usize,
    line: usize,
    col: usize,
    depth: usize,
    pub options: ReaderOptions,
    fn_stack: Vec<ShortFnState>,
}

/// Reads every form in `source`.
pub fn read_string(source: &str, filename: &str, line: usize) -> Result<Vec<Form>, QuinceError> {
    let options = ReaderOptions::default()
        .with_source_name(filename)
        .with_start_line(line);
    Reader::new_with_options(source, options).read_all()
}

impl Reader {
    pub fn new(source: &str) -> Self {
        Self::new_with_options(source, ReaderOptions::default())
    }

    pub fn new_with_options(source: &str, mut options: ReaderOptions) -> Self {
        if options.start_line == 0 {
            options.start_line = 1;
        }
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: options.start_line,
            col: 1,
            depth: 0,
            options,
            fn_stack: Vec::new(),
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<Form>, QuinceError> {
        let mut forms = Vec::new();
        while let Some(form) = self.read_next()? {
            forms.push(form);
        }
        Ok(forms)
    }

    /// Next top-level form, or `None` once only whitespace and comments remain.
    pub fn read_next(&mut self) -> Result<Option<Form>, QuinceError> {
        self.skip_whitespace()?;
        if self.eof() {
            return Ok(None);
        }
        self.read_form().map(Some)
    }

    fn eof(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.index + 1).copied()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.index += 1;
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
            index: self.index,
        }
    }

    pub fn parse_err<T>(&self, msg: impl Into<String>) -> Result<T, QuinceError> {
        Err(QuinceError::syntax(&self.options.source_name, self.line, msg))
    }

    fn incomplete_err<T>(&self, msg: impl Into<String>) -> Result<T, QuinceError> {
        Err(QuinceError::incomplete(&self.options.source_name, self.line, msg))
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.current() {
            self.advance();
            if c == '\n' {
                break;
            }
        }
    }

    /// Skips whitespace, commas, `;` and `#!` comments and `#_` datum comments.
    fn skip_whitespace(&mut self) -> Result<(), QuinceError> {
        while let Some(c) = self.current() {
            match c {
                ';' => self.skip_line(),
                '#' if self.peek_char() == Some('!') => self.skip_line(),
                '#' if self.peek_char() == Some('_') => {
                    self.advance(); // #
                    self.advance(); // _
                    self.skip_whitespace()?;
                    if self.eof() {
                        return self
                            .incomplete_err("Unexpected end of program after #_, expected a form");
                    }
                    self.read_form()?;
                }
                c if c.is_whitespace() || c == ',' => self.advance(),
                _ => break,
            }
        }
        Ok(())
    }

    fn read_form(&mut self) -> Result<Form, QuinceError> {
        if self.depth >= self.options.max_depth {
            return self.parse_err(format!(
                "Form nested too deeply (max depth: {})",
                self.options.max_depth
            ));
        }
        self.depth += 1;
        let form = self.read_form_at_depth();
        self.depth -= 1;
        form
    }

    fn read_form_at_depth(&mut self) -> Result<Form, QuinceError> {
        let span = self.current_span();
        let Some(c) = self.current() else {
            return self.incomplete_err("Unexpected end of program, expected a form");
        };
        match c {
            '#' => self.read_dispatch(span),
            '\'' => self.read_wrapped(span, 1, "quote", "quote (')"),
            '`' => self.read_syntax_quote(span),
            '~' if self.peek_char() == Some('@') => {
                self.read_wrapped(span, 2, "unquote-splicing", "unquote-splicing (~@)")
            }
            '~' => self.read_wrapped(span, 1, "unquote", "unquote (~)"),
            '(' => {
                self.advance();
                let items = self.read_delimited(')')?;
                Ok(Form::list(items, span))
            }
            '[' => {
                self.advance();
                let items = self.read_delimited(']')?;
                Ok(Form::new(FormKind::Array(items), span))
            }
            '{' => {
                self.advance();
                let items = self.read_delimited('}')?;
                if items.len() % 2 != 0 {
                    return Err(QuinceError::syntax(
                        &self.options.source_name,
                        span.line,
                        "Odd number of forms in key-value hash",
                    ));
                }
                Ok(Form::new(FormKind::Hash(items), span))
            }
            '"' => {
                self.advance();
                let text = self.read_escaped_until('"', "string")?;
                Ok(Form::new(FormKind::String(text), span))
            }
            ':' => self.read_symbol(span),
            c if c.is_ascii_digit() => self.read_number(span),
            '+' | '-' if self.peek_char().is_some_and(|n| n.is_ascii_digit()) => {
                self.read_number(span)
            }
            c if is_identifier_char(c) => self.read_identifier(span),
            c => self.parse_err(format!("Unexpected character: {}", c)),
        }
    }

    fn read_delimited(&mut self, close: char) -> Result<Vec<Form>, QuinceError> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace()?;
            match self.current() {
                None => {
                    return self
                        .incomplete_err(format!("Unexpected end of program, expected {}", close))
                }
                Some(c) if c == close => {
                    self.advance();
                    return Ok(items);
                }
                Some(_) => items.push(self.read_form()?),
            }
        }
    }

    /// `'x`, `~x`, `~@x` become `(head x)`.
    fn read_wrapped(
        &mut self,
        span: Span,
        prefix_len: usize,
        head: &str,
        description: &str,
    ) -> Result<Form, QuinceError> {
        for _ in 0..prefix_len {
            self.advance();
        }
        let inner = self.read_prefixed_operand(description)?;
        let head = Form::identifier(self.options.symbols.intern(head), span);
        Ok(Form::list(vec![head, inner], span))
    }

    fn read_prefixed_operand(&mut self, description: &str) -> Result<Form, QuinceError> {
        self.skip_whitespace()?;
        if self.eof() {
            return self.incomplete_err(format!(
                "Unexpected end of program after {}, expected a form",
                description
            ));
        }
        self.read_form()
    }

    fn read_syntax_quote(&mut self, span: Span) -> Result<Form, QuinceError> {
        self.advance(); // `
        let inner = self.read_prefixed_operand("syntax quote (`)")?;
        let symbols = self.options.symbols.clone();
        let mut quoter = SyntaxQuoter::new(&symbols);
        quoter
            .quote(&inner)
            .map_err(|msg| QuinceError::syntax(&self.options.source_name, span.line, msg))
    }

    fn read_dispatch(&mut self, span: Span) -> Result<Form, QuinceError> {
        self.advance(); // #
        match self.current() {
            Some('|') => {
                self.advance();
                let name = self.read_escaped_until('|', "pipe identifier")?;
                Ok(Form::identifier(self.options.symbols.intern(&name), span))
            }
            Some('{') => {
                self.advance();
                let items = self.read_delimited('}')?;
                Ok(Form::new(FormKind::Set(items), span))
            }
            Some('(') => self.read_short_fn(span),
            Some('r') => {
                self.advance();
                self.read_regex(span)
            }
            Some('q') => {
                self.advance();
                self.read_raw_quotation(span)
            }
            Some('Q') => {
                self.advance();
                let Some(open) = self.current() else {
                    return self.incomplete_err("Unexpected end of program while parsing quotation");
                };
                self.advance();
                let text = self.read_escaped_until(closing_delimiter(open), "quotation")?;
                Ok(Form::new(FormKind::String(text), span))
            }
            Some(c) => self.parse_err(format!("Unknown reader macro: #{}", c)),
            None => self.parse_err("Unknown reader macro: #"),
        }
    }

    fn read_short_fn(&mut self, span: Span) -> Result<Form, QuinceError> {
        self.advance(); // (
        self.fn_stack.push(ShortFnState::new());
        let body = self.read_delimited(')');
        let state = self.fn_stack.pop().unwrap_or_default();
        let body = Form::list(body?, span);
        Ok(state.finish(body, &self.options.symbols, span))
    }

    /// Reads characters up to `close`, honouring backslash escapes.
    fn read_escaped_until(&mut self, close: char, what: &str) -> Result<String, QuinceError> {
        let mut out = String::new();
        loop {
            match self.current() {
                None => {
                    return self
                        .incomplete_err(format!("Unexpected end of program while parsing {}", what))
                }
                Some(c) if c == close => {
                    self.advance();
                    return Ok(out);
                }
                Some('\\') => {
                    self.advance();
                    out.push(self.read_escape()?);
                }
                Some(c) => {
                    self.advance();
                    out.push(c);
                }
            }
        }
    }

    fn read_escape(&mut self) -> Result<char, QuinceError> {
        let Some(c) = self.current() else {
            return self.incomplete_err("Unexpected end of file while parsing character escape");
        };
        self.advance();
        let escaped = match c {
            'a' => '\x07',
            'b' => '\x08',
            't' => '\t',
            'n' => '\n',
            'v' => '\x0b',
            'f' => '\x0c',
            'r' => '\r',
            'e' => '\x1b',
            '0'..='7' => {
                let mut digits = c.to_string();
                digits.push_str(&self.take_while_max(2, |d| d.is_digit(8)));
                let code = u32::from_str_radix(&digits, 8).unwrap_or_default();
                match char::from_u32(code) {
                    Some(ch) => ch,
                    None => return self.parse_err("Invalid octal character escape"),
                }
            }
            'x' => {
                let digits = self.take_while_max(2, |d| d.is_ascii_hexdigit());
                if digits.is_empty() {
                    return self.parse_err("Invalid hex character escape");
                }
                let code = u32::from_str_radix(&digits, 16).unwrap_or_default();
                char::from_u32(code).unwrap_or('\u{fffd}')
            }
            other => other,
        };
        Ok(escaped)
    }

    fn take_while_max(&mut self, max: usize, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while out.len() < max {
            match self.current() {
                Some(c) if pred(c) => {
                    out.push(c);
                    self.advance();
                }
                _ => break,
            }
        }
        out
    }

    fn read_regex(&mut self, span: Span) -> Result<Form, QuinceError> {
        let Some(open) = self.current() else {
            return self.incomplete_err("Unexpected end of program while parsing regex");
        };
        self.advance();
        let close = closing_delimiter(open);
        let mut pattern = String::new();
        loop {
            match self.current() {
                None => return self.incomplete_err("Unexpected end of program while parsing regex"),
                Some(c) if c == close => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        None => {
                            return self
                                .incomplete_err("Unexpected end of program while parsing regex")
                        }
                        Some(c) if c == close => pattern.push(c),
                        Some(c) => {
                            pattern.push('\\');
                            pattern.push(c);
                        }
                    }
                    self.advance();
                }
                Some(c) => {
                    self.advance();
                    pattern.push(c);
                }
            }
        }
        let mut options = RegexOptions::default();
        while let Some(c) = self.current().filter(|c| c.is_ascii_alphabetic()) {
            match c {
                'i' => options.ignore_case = true,
                'x' => options.extended = true,
                'm' => options.multiline = true,
                other => return self.parse_err(format!("Unknown regexp option: '{}'", other)),
            }
            self.advance();
        }
        if let Err(err) = options.build(&pattern) {
            return Err(QuinceError::syntax(
                &self.options.source_name,
                span.line,
                format!("Invalid regex: {}", err),
            ));
        }
        Ok(Form::new(FormKind::Regex { pattern, options }, span))
    }

    /// `#q`: only the closing delimiter and backslash itself can be escaped.
    fn read_raw_quotation(&mut self, span: Span) -> Result<Form, QuinceError> {
        let Some(open) = self.current() else {
            return self.incomplete_err("Unexpected end of program while parsing quotation");
        };
        self.advance();
        let close = closing_delimiter(open);
        let mut text = String::new();
        loop {
            match self.current() {
                None => {
                    return self.incomplete_err("Unexpected end of program while parsing quotation")
                }
                Some(c) if c == close => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some(c) if c == close || c == '\\' => {
                            text.push(c);
                            self.advance();
                        }
                        _ => text.push('\\'),
                    }
                }
                Some(c) => {
                    self.advance();
                    text.push(c);
                }
            }
        }
        Ok(Form::new(FormKind::String(text), span))
    }

    fn read_symbol(&mut self, span: Span) -> Result<Form, QuinceError> {
        self.advance(); // :
        let name = if self.current() == Some('"') {
            self.advance();
            self.read_escaped_until('"', "symbol")?
        } else {
            let name = self.read_token();
            if name.is_empty() {
                return self.parse_err("Empty symbol name");
            }
            name
        };
        Ok(Form::new(FormKind::Symbol(name), span))
    }

    fn read_token(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.current().filter(|c| is_identifier_char(*c)) {
            out.push(c);
            self.advance();
        }
        out
    }

    fn read_number(&mut self, span: Span) -> Result<Form, QuinceError> {
        let token = self.read_token();
        let kind = self.parse_number(&token)?;
        Ok(Form::new(kind, span))
    }

    fn parse_number(&self, token: &str) -> Result<FormKind, QuinceError> {
        if INT_RE.is_match(token) {
            return match token.parse::<i64>() {
                Ok(n) => Ok(FormKind::Int(n)),
                Err(_) => self.parse_err(format!("Integer literal out of range: {}", token)),
            };
        }
        if let Some(caps) = RADIX_RE.captures(token) {
            let radix: u32 = caps[2].parse().unwrap_or(0);
            if !(2..=36).contains(&radix) {
                return self.parse_err(format!("Radix out of range: {}", &caps[2]));
            }
            let Ok(magnitude) = i64::from_str_radix(&caps[3], radix) else {
                return self.parse_err(format!("Invalid digits for radix in number: {}", token));
            };
            let value = if &caps[1] == "-" { -magnitude } else { magnitude };
            return Ok(FormKind::Int(value));
        }
        if FLOAT_RE.is_match(token) {
            return match token.parse::<f64>() {
                Ok(f) => Ok(FormKind::Float(f)),
                Err(_) => self.parse_err(format!("Invalid number: {}", token)),
            };
        }
        if let Some(caps) = RATIONAL_RE.captures(token) {
            let (Ok(numer), Ok(denom)) = (caps[1].parse::<i64>(), caps[2].parse::<i64>()) else {
                return self.parse_err(format!("Invalid number: {}", token));
            };
            if denom == 0 {
                return self.parse_err(format!("Invalid number: {}", token));
            }
            return Ok(FormKind::Rational(Rational64::new(numer, denom)));
        }
        self.parse_err(format!("Invalid number: {}", token))
    }

    fn read_identifier(&mut self, span: Span) -> Result<Form, QuinceError> {
        let name = self.read_token();
        let kind = match name.as_str() {
            "true" => FormKind::Bool(true),
            "false" => FormKind::Bool(false),
            "nil" => FormKind::Nil,
            _ => {
                let placeholder = if self.fn_stack.is_empty() {
                    None
                } else {
                    parse_placeholder(&name)
                };
                match placeholder {
                    Some(Ok(placeholder)) => {
                        let symbols = self.options.symbols.clone();
                        match self.fn_stack.last_mut() {
                            Some(state) => FormKind::Identifier(state.resolve(placeholder, &symbols)),
                            None => FormKind::Identifier(symbols.intern(&name)),
                        }
                    }
                    Some(Err(msg)) => return self.parse_err(msg),
                    None => FormKind::Identifier(self.options.symbols.intern(&name)),
                }
            }
        };
        Ok(Form::new(kind, span))
    }
}

/// Closing delimiter for `#r`, `#q` and `#Q`: brackets pair up, anything else
/// closes itself.
fn closing_delimiter(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        '<' => '>',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn parse_one(src: &str) -> Form {
        let mut reader = Reader::new(src);
        let forms = reader.read_all().expect("read");
        assert_eq!(forms.len(), 1, "expected one form in {:?}", src);
        forms.into_iter().next().expect("form")
    }

    fn parse_err(src: &str) -> (String, bool) {
        match Reader::new(src).read_all() {
            Err(QuinceError::Syntax(data)) => (data.message, data.incomplete),
            other => panic!("expected syntax error for {:?}, got {:?}", src, other),
        }
    }

    #[test]
    fn reads_numbers() {
        assert_eq!(parse_one("42").kind, FormKind::Int(42));
        assert_eq!(parse_one("-7").kind, FormKind::Int(-7));
        assert_eq!(parse_one("2r1010").kind, FormKind::Int(10));
        assert_eq!(parse_one("-16rff").kind, FormKind::Int(-255));
        assert_eq!(parse_one("1.5e3").kind, FormKind::Float(1500.0));
        assert_eq!(parse_one("2.").kind, FormKind::Float(2.0));
        assert_eq!(
            parse_one("2/4").kind,
            FormKind::Rational(Rational64::new(1, 2))
        );
        assert_eq!(parse_err("1x").0, "Invalid number: 1x");
        assert_eq!(parse_err("99r1").0, "Radix out of range: 99");
        assert_eq!(parse_err("2r123").0, "Invalid digits for radix in number: 2r123");
    }

    #[test]
    fn reads_string_escapes() {
        assert_eq!(
            parse_one(r#""a\tb\n\x41\101\q\"""#).kind,
            FormKind::String("a\tb\nAAq\"".into())
        );
        assert_eq!(parse_err(r#""\xz""#).0, "Invalid hex character escape");
        let (msg, incomplete) = parse_err("\"abc");
        assert_eq!(msg, "Unexpected end of program while parsing string");
        assert!(incomplete);
    }

    #[test]
    fn reads_symbols_and_identifiers() {
        assert_eq!(parse_one(":foo").kind, FormKind::Symbol("foo".into()));
        assert_eq!(parse_one(r#":"a b""#).kind, FormKind::Symbol("a b".into()));
        assert_eq!(parse_err(": ").0, "Empty symbol name");
        assert_eq!(parse_one("true").kind, FormKind::Bool(true));
        assert_eq!(parse_one("nil").kind, FormKind::Nil);
        let id = parse_one("#|a b|");
        assert_eq!(id.as_identifier().map(|i| i.name()), Some("a b"));
        let a = parse_one("foo");
        let b = parse_one("foo");
        assert!(a.as_identifier().zip(b.as_identifier()).is_some_and(|(x, y)| x.same(y)));
    }

    #[test]
    fn reads_collections() {
        let form = parse_one("(a [1 2] {:k 3} #{4})");
        let items = form.as_list().expect("list");
        assert_eq!(items.len(), 4);
        assert!(matches!(items[1].kind, FormKind::Array(ref xs) if xs.len() == 2));
        assert!(matches!(items[2].kind, FormKind::Hash(ref xs) if xs.len() == 2));
        assert!(matches!(items[3].kind, FormKind::Set(ref xs) if xs.len() == 1));
        assert_eq!(parse_err("{1 2 3}").0, "Odd number of forms in key-value hash");
    }

    #[test]
    fn unterminated_list_is_incomplete() {
        let (msg, incomplete) = parse_err("(1 2");
        assert_eq!(msg, "Unexpected end of program, expected )");
        assert!(incomplete);
        let (msg, incomplete) = parse_err("[1");
        assert_eq!(msg, "Unexpected end of program, expected ]");
        assert!(incomplete);
        let (msg, incomplete) = parse_err("'");
        assert_eq!(msg, "Unexpected end of program after quote ('), expected a form");
        assert!(incomplete);
        let (msg, incomplete) = parse_err(")");
        assert_eq!(msg, "Unexpected character: )");
        assert!(!incomplete);
    }

    #[test]
    fn skips_comments() {
        let forms = Reader::new("#!/usr/bin/env quince\n; hi\n1 #_ (ignored form) 2, 3")
            .read_all()
            .expect("read");
        let kinds: Vec<_> = forms.into_iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FormKind::Int(1), FormKind::Int(2), FormKind::Int(3)]);
        assert_eq!(
            parse_err("#_").0,
            "Unexpected end of program after #_, expected a form"
        );
    }

    #[test]
    fn reads_regexes_and_quotations() {
        match parse_one(r"#r<a/\>b>im").kind {
            FormKind::Regex { pattern, options } => {
                assert_eq!(pattern, "a/>b");
                assert!(options.ignore_case && options.multiline && !options.extended);
            }
            other => panic!("expected regex, got {:?}", other),
        }
        assert_eq!(parse_err("#r/a/q").0, "Unknown regexp option: 'q'");
        assert_eq!(parse_one(r"#q(a\)b\n)").kind, FormKind::String(r"a)b\n".into()));
        assert_eq!(parse_one(r"#Q<a\tb>").kind, FormKind::String("a\tb".into()));
        assert_eq!(parse_err("#z").0, "Unknown reader macro: #z");
    }

    #[test]
    fn tracks_lines() {
        let forms = Reader::new_with_options(
            "1\n\n(foo\n bar)",
            ReaderOptions::default().with_start_line(10),
        )
        .read_all()
        .expect("read");
        assert_eq!(forms[0].line(), 10);
        assert_eq!(forms[1].line(), 12);
    }

    #[test]
    fn short_fn_expands_to_fn() {
        let symbols = Arc::new(SymbolTable::new());
        let options = ReaderOptions::default().with_symbols(symbols.clone());
        let form = Reader::new_with_options("#(+ %2 %&)", options)
            .read_all()
            .expect("read")
            .remove(0);
        assert_eq!(form.to_string(), "(fn [p1__3 p2__1 & rest__2] (+ p2__1 rest__2))");
        assert_eq!(parse_err("#(%x)").0, "arg literal must be %, %& or %integer");
    }

    #[test]
    fn syntax_quote_rewrites_templates() {
        let symbols = Arc::new(SymbolTable::new());
        let options = ReaderOptions::default().with_symbols(symbols.clone());
        let form = Reader::new_with_options("`(a ~b ~@c [x# x#])", options)
            .read_all()
            .expect("read")
            .remove(0);
        assert_eq!(
            form.to_string(),
            "(concat (list (quote a)) (list b) c \
             (list (apply array (concat (list (quote x__1)) (list (quote x__1))))))"
        );
        assert_eq!(parse_err("`~@a").0, "splicing unquote (~@) not in list");
    }

    #[test]
    fn quoted_structures_read_back() {
        let source = r#"(1 [2.5 "s"] {:a (b)} #{:c})"#;
        let value = parse_one(source).to_value();
        let printed = value.to_string();
        let reread = parse_one(&printed).to_value();
        assert_eq!(reread, value);
        assert!(matches!(parse_one("()").to_value(), Value::List(l) if l.is_empty_singleton()));
    }
}
