use crate::ast::{Form, FormKind};
use crate::symbols::Identifier;
use crate::vm::bytecode::Label;

#[derive(Clone, Debug)]
pub struct RescueClause {
    pub name: Identifier,
    /// Empty means `StandardError`.
    pub conditions: Vec<Form>,
    pub body: Vec<Form>,
}

#[derive(Clone, Debug, Default)]
pub struct TryParts {
    pub body: Vec<Form>,
    pub rescues: Vec<RescueClause>,
    pub ensure: Option<Vec<Form>>,
}

/// Splits `(try body* (rescue ...)* (ensure ...)?)`.
pub fn parse_try(args: &[Form]) -> Result<TryParts, String> {
    let mut parts = TryParts::default();
    for arg in args {
        if parts.ensure.is_some() {
            return Err("Unexpected form after ensure clause".into());
        }
        if arg.is_call_to("rescue") {
            let clause = arg.as_list().map(|items| &items[1..]).unwrap_or_default();
            parts.rescues.push(parse_rescue(clause)?);
        } else if arg.is_call_to("ensure") {
            let clause = arg.as_list().map(|items| &items[1..]).unwrap_or_default();
            parts.ensure = Some(clause.to_vec());
        } else {
            if !parts.rescues.is_empty() {
                return Err("Unexpected form after rescue clause".into());
            }
            parts.body.push(arg.clone());
        }
    }
    Ok(parts)
}

fn parse_rescue(clause: &[Form]) -> Result<RescueClause, String> {
    let Some((binding, body)) = clause.split_first() else {
        return Err("Expected identifier or array as first form of rescue clause".into());
    };
    match &binding.kind {
        FormKind::Identifier(name) => Ok(RescueClause {
            name: name.clone(),
            conditions: Vec::new(),
            body: body.to_vec(),
        }),
        FormKind::Array(items) => {
            let name = items
                .first()
                .and_then(Form::as_identifier)
                .ok_or("Expected identifier as first form of rescue clause binding")?;
            Ok(RescueClause {
                name: name.clone(),
                conditions: items[1..].to_vec(),
                body: body.to_vec(),
            })
        }
        _ => Err("Expected identifier or array as first form of rescue clause".into()),
    }
}

/// Where control goes once the guarded body has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TryOutcome {
    /// The body completed.
    Normal,
    /// Rescue clause `n` handled the exception.
    Rescued(usize),
    /// No clause matched; the exception is raised again.
    Propagate,
}

/// Labels the `try` lowering jumps to for each outcome.
#[derive(Clone, Debug)]
pub struct TryRouting {
    pub normal: Label,
    pub rescued: Vec<Label>,
    pub propagate: Label,
}

impl TryRouting {
    pub fn label_for(&self, outcome: TryOutcome) -> Label {
        match outcome {
            TryOutcome::Normal => self.normal,
            TryOutcome::Rescued(i) => self.rescued.get(i).copied().unwrap_or(self.propagate),
            TryOutcome::Propagate => self.propagate,
        }
    }

    pub fn outcomes(&self) -> Vec<TryOutcome> {
        let mut out = vec![TryOutcome::Normal];
        out.extend((0..self.rescued.len()).map(TryOutcome::Rescued));
        out.push(TryOutcome::Propagate);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_string;

    fn parse(src: &str) -> Result<TryParts, String> {
        let forms = read_string(src, "(test)", 1).expect("read");
        parse_try(&forms[0].as_list().expect("list")[1..])
    }

    #[test]
    fn splits_body_rescues_and_ensure() {
        let parts =
            parse("(try (a) (b) (rescue e 1) (rescue [e2 TypeError KeyError] 2) (ensure (c)))")
                .expect("parse");
        assert_eq!(parts.body.len(), 2);
        assert_eq!(parts.rescues.len(), 2);
        assert!(parts.rescues[0].conditions.is_empty());
        assert_eq!(parts.rescues[1].name.name(), "e2");
        assert_eq!(parts.rescues[1].conditions.len(), 2);
        assert_eq!(parts.ensure.map(|e| e.len()), Some(1));
    }

    #[test]
    fn clause_order_is_enforced() {
        assert_eq!(
            parse("(try (ensure 1) (a))").unwrap_err(),
            "Unexpected form after ensure clause"
        );
        assert_eq!(
            parse("(try (rescue e 1) (a))").unwrap_err(),
            "Unexpected form after rescue clause"
        );
        assert_eq!(
            parse("(try (rescue [1 TypeError] 1))").unwrap_err(),
            "Expected identifier as first form of rescue clause binding"
        );
        assert_eq!(
            parse("(try (rescue :e 1))").unwrap_err(),
            "Expected identifier or array as first form of rescue clause"
        );
    }
}
