use crate::ast::{Form, FormKind, Span};
use crate::symbols::{Identifier, SymbolTable};

pub const PLACEHOLDER_ERROR: &str = "arg literal must be %, %& or %integer";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaceholderRef {
    /// `%` or `%N`, 1-based.
    Index(usize),
    /// `%&`
    Rest,
}

/// Classifies a `%...` name read inside `#(...)`. Returns `None` for names
/// that are not placeholders at all, `Some(Err)` for malformed ones.
pub fn parse_placeholder(name: &str) -> Option<Result<PlaceholderRef, &'static str>> {
    let suffix = name.strip_prefix('%')?;
    let parsed = match suffix {
        "" => Ok(PlaceholderRef::Index(1)),
        "&" => Ok(PlaceholderRef::Rest),
        digits => match digits.parse::<usize>() {
            Ok(n) if n > 0 && digits.chars().all(|c| c.is_ascii_digit()) => {
                Ok(PlaceholderRef::Index(n))
            }
            _ => Err(PLACEHOLDER_ERROR),
        },
    };
    Some(parsed)
}

/// Placeholders collected while reading the body of one `#(...)`.
#[derive(Default)]
pub struct ShortFnState {
    args: Vec<Option<Identifier>>,
    rest: Option<Identifier>,
}

impl ShortFnState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier standing for `placeholder`; repeated references share one
    /// gensym.
    pub fn resolve(&mut self, placeholder: PlaceholderRef, symbols: &SymbolTable) -> Identifier {
        match placeholder {
            PlaceholderRef::Index(n) => {
                if self.args.len() < n {
                    self.args.resize(n, None);
                }
                self.args[n - 1]
                    .get_or_insert_with(|| symbols.gensym(&format!("p{}", n)))
                    .clone()
            }
            PlaceholderRef::Rest => self
                .rest
                .get_or_insert_with(|| symbols.gensym("rest"))
                .clone(),
        }
    }

    /// Wraps `body` as `(fn [p1 p2 ... & rest] body)`. Positions below the
    /// highest one used get fresh names of their own.
    pub fn finish(self, body: Form, symbols: &SymbolTable, span: Span) -> Form {
        let mut params: Vec<Form> = self
            .args
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                let id = id.unwrap_or_else(|| symbols.gensym(&format!("p{}", i + 1)));
                Form::identifier(id, span)
            })
            .collect();
        if let Some(rest) = self.rest {
            params.push(Form::identifier(symbols.intern("&"), span));
            params.push(Form::identifier(rest, span));
        }
        Form::list(
            vec![
                Form::identifier(symbols.intern("fn"), span),
                Form::new(FormKind::Array(params), span),
                body,
            ],
            span,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_placeholders() {
        assert_eq!(parse_placeholder("%"), Some(Ok(PlaceholderRef::Index(1))));
        assert_eq!(parse_placeholder("%3"), Some(Ok(PlaceholderRef::Index(3))));
        assert_eq!(parse_placeholder("%&"), Some(Ok(PlaceholderRef::Rest)));
        assert_eq!(parse_placeholder("%0"), Some(Err(PLACEHOLDER_ERROR)));
        assert_eq!(parse_placeholder("%x"), Some(Err(PLACEHOLDER_ERROR)));
        assert_eq!(parse_placeholder("x"), None);
    }

    #[test]
    fn fills_unused_positions() {
        let symbols = SymbolTable::new();
        let mut state = ShortFnState::new();
        let third = state.resolve(PlaceholderRef::Index(3), &symbols);
        let again = state.resolve(PlaceholderRef::Index(3), &symbols);
        assert!(third.same(&again));
        let form = state.finish(Form::nil(Span::default()), &symbols, Span::default());
        let items = form.as_list().expect("list");
        let params = items[1].as_array().expect("params");
        assert_eq!(params.len(), 3);
        assert_eq!(params[2].as_identifier(), Some(&third));
        assert_eq!(third.name(), "p3__1");
    }
}
