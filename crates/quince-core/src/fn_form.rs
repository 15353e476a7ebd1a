use crate::ast::{Form, FormKind};
use crate::symbols::Identifier;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArgState {
    Required,
    StartOptional,
    Optional,
    Rest,
    AfterRest,
    Block,
    AfterBlock,
}

/// Parsed `[req* ? (opt default)* & rest | block]`.
#[derive(Clone, Debug)]
pub struct ArgList {
    pub required: Vec<Identifier>,
    pub optional: Vec<(Identifier, Form)>,
    pub rest: Option<Identifier>,
    pub block: Option<Identifier>,
}

impl ArgList {
    pub fn parse(args: &[Form]) -> Result<ArgList, String> {
        let mut state = ArgState::Required;
        let mut list = ArgList {
            required: Vec::new(),
            optional: Vec::new(),
            rest: None,
            block: None,
        };

        for arg in args {
            if let Some(id) = arg.as_identifier() {
                let next = match (id.name(), state) {
                    ("?", ArgState::Required) => Some(ArgState::StartOptional),
                    ("?", _) => return Err("Unexpected '?' in argument list".into()),
                    ("&", ArgState::Required | ArgState::Optional) => Some(ArgState::Rest),
                    ("&", _) => return Err("Unexpected '&' in argument list".into()),
                    ("|", ArgState::Required | ArgState::Optional | ArgState::AfterRest) => {
                        Some(ArgState::Block)
                    }
                    ("|", _) => return Err("Unexpected '|' in argument list".into()),
                    _ => None,
                };
                if let Some(next) = next {
                    state = next;
                    continue;
                }
            }

            match state {
                ArgState::Required => {
                    let id = arg
                        .as_identifier()
                        .ok_or("Required argument in argument list must be an identifier")?;
                    list.required.push(id.clone());
                }
                ArgState::StartOptional | ArgState::Optional => {
                    let pair = match &arg.kind {
                        FormKind::List(items) if items.len() == 2 => items[0]
                            .as_identifier()
                            .map(|name| (name.clone(), items[1].clone())),
                        _ => None,
                    };
                    let pair = pair.ok_or(
                        "Optional argument in argument list must be of the form (name default)",
                    )?;
                    list.optional.push(pair);
                    state = ArgState::Optional;
                }
                ArgState::Rest => {
                    let id = arg
                        .as_identifier()
                        .ok_or("Rest argument in argument list must be an identifier")?;
                    list.rest = Some(id.clone());
                    state = ArgState::AfterRest;
                }
                ArgState::Block => {
                    let id = arg
                        .as_identifier()
                        .ok_or("Block argument in argument list must be an identifier")?;
                    list.block = Some(id.clone());
                    state = ArgState::AfterBlock;
                }
                ArgState::AfterRest => return Err("Unexpected argument after rest argument".into()),
                ArgState::AfterBlock => {
                    return Err("Unexpected arguments after block argument".into())
                }
            }
        }

        match state {
            ArgState::StartOptional => {
                Err("Expected optional arguments after '?' in argument list".into())
            }
            ArgState::Rest => Err("Expected rest argument after '&' in argument list".into()),
            ArgState::Block => Err("Expected block argument after '|' in argument list".into()),
            _ => Ok(list),
        }
    }

    pub fn num_required(&self) -> usize {
        self.required.len()
    }

    pub fn num_optional(&self) -> usize {
        self.optional.len()
    }

    pub fn num_total(&self) -> usize {
        self.required.len() + self.optional.len()
    }

    pub fn is_variadic(&self) -> bool {
        self.rest.is_some()
    }

    pub fn shape(&self) -> ArityShape {
        ArityShape {
            required: self.num_required(),
            optional: self.num_optional(),
            variadic: self.is_variadic(),
        }
    }

    /// First name bound more than once across all argument sections.
    pub fn duplicate_name(&self) -> Option<&Identifier> {
        let names: Vec<&Identifier> = self
            .required
            .iter()
            .chain(self.optional.iter().map(|(name, _)| name))
            .chain(self.rest.iter())
            .chain(self.block.iter())
            .collect();
        names
            .iter()
            .enumerate()
            .find(|(i, name)| names[i + 1..].contains(name))
            .map(|(_, name)| *name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArityShape {
    pub required: usize,
    pub optional: usize,
    pub variadic: bool,
}

impl ArityShape {
    pub fn total(&self) -> usize {
        self.required + self.optional
    }

    pub fn accepts(&self, argc: usize) -> bool {
        argc >= self.required && (self.variadic || argc <= self.total())
    }
}

#[derive(Clone, Debug)]
pub struct Overload {
    pub args: ArgList,
    pub body: Vec<Form>,
}

#[derive(Clone, Debug)]
pub struct FnDefinition {
    pub name: Option<Identifier>,
    pub doc: Option<String>,
    pub overloads: Vec<Overload>,
}

/// Splits `(fn name? "doc"? [args*] body*)` or
/// `(fn name? "doc"? ([args*] body*)+)` into its parts. Overloads come back in
/// dispatch order.
pub fn parse_fn(args: &[Form]) -> Result<FnDefinition, String> {
    let mut rest = args;
    let mut name = None;
    let mut doc = None;
    if let Some((first, tail)) = rest.split_first() {
        if let Some(id) = first.as_identifier() {
            name = Some(id.clone());
            rest = tail;
        }
    }
    if let Some((first, tail)) = rest.split_first() {
        if let FormKind::String(text) = &first.kind {
            doc = Some(text.clone());
            rest = tail;
        }
    }

    let overloads = match rest.first().map(|form| &form.kind) {
        Some(FormKind::List(_)) => {
            let mut overloads = Vec::with_capacity(rest.len());
            for overload in rest {
                let items = overload
                    .as_list()
                    .ok_or("Expected an arity overload (a list)")?;
                let arglist = items
                    .first()
                    .and_then(Form::as_array)
                    .ok_or("Argument list in overload must be an array literal")?;
                overloads.push(Overload {
                    args: ArgList::parse(arglist)?,
                    body: items[1..].to_vec(),
                });
            }
            overloads
        }
        Some(FormKind::Array(arglist)) => vec![Overload {
            args: ArgList::parse(arglist)?,
            body: rest[1..].to_vec(),
        }],
        _ => return Err("Expected argument list or arity overload in fn definition".into()),
    };

    Ok(FnDefinition {
        name,
        doc,
        overloads: order_overloads(overloads)?,
    })
}

/// Rejects overload sets whose arities could overlap and sorts the rest:
/// fixed overloads by ascending required count, the variadic one last.
pub fn order_overloads(overloads: Vec<Overload>) -> Result<Vec<Overload>, String> {
    if overloads.len() < 2 {
        return Ok(overloads);
    }
    let shapes: Vec<ArityShape> = overloads.iter().map(|o| o.args.shape()).collect();
    let order = check_overload_shapes(&shapes)?;
    let mut slots: Vec<Option<Overload>> = overloads.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Validates `shapes` and returns their indices in dispatch order.
pub fn check_overload_shapes(shapes: &[ArityShape]) -> Result<Vec<usize>, String> {
    let (variadic, mut normals): (Vec<usize>, Vec<usize>) =
        (0..shapes.len()).partition(|&i| shapes[i].variadic);

    if variadic.len() > 1 {
        return Err("Can't have more than one variadic overload".into());
    }

    normals.sort_by_key(|&i| shapes[i].required);

    if let (Some(&v), Some(&last)) = (variadic.first(), normals.last()) {
        let (v, last) = (shapes[v], shapes[last]);
        if v.required < last.required {
            return Err(
                "Can't have a fixed arity overload with more params than a variadic overload"
                    .into(),
            );
        }
        if v.required == last.required && (v.optional != 0 || last.optional != 0) {
            return Err("Can't have two overloads with the same arity".into());
        } else if last.total() > v.required {
            return Err("Can't have an overload with more total (required + optional) arguments than the variadic overload has required argument".into());
        }
    }

    for pair in normals.windows(2) {
        let (a, b) = (shapes[pair[0]], shapes[pair[1]]);
        if a.required == b.required {
            return Err("Can't have two overloads with the same arity".into());
        } else if a.total() >= b.required {
            return Err("Can't have an overload with as many total (required + optional) arguments as another overload has required arguments".into());
        }
    }

    normals.extend(variadic);
    Ok(normals)
}

/// One test of the overload selector, emitted as `passed_arg n; goto_if_true`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchStep {
    /// More than `passed` arguments: run overload `overload`.
    ToOverload { passed: usize, overload: usize },
    /// More than `passed` arguments: no overload matches.
    NoMatch { passed: usize },
    /// Unconditionally run `overload`.
    Always { overload: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchPlan {
    pub steps: Vec<DispatchStep>,
    /// Falling off the end of `steps` raises instead of entering overload 0.
    pub nomatch_possible: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    Overload(usize),
    /// Rejected by the function's overall arity before dispatch runs.
    WrongArity,
    NoMatch,
}

/// Builds the selector for overloads already in dispatch order. Tests run
/// from the highest arity down so each check only needs a lower bound.
pub fn dispatch_plan(shapes: &[ArityShape]) -> DispatchPlan {
    let mut steps = Vec::new();
    let mut nomatch_possible = false;
    let Some(last) = shapes.last() else {
        return DispatchPlan {
            steps,
            nomatch_possible,
        };
    };
    if shapes.len() < 2 {
        return DispatchPlan {
            steps,
            nomatch_possible,
        };
    }
    let last_index = shapes.len() - 1;

    let prev = shapes[last_index - 1];
    let threshold = if last.variadic && prev.required == last.required {
        Some(last.required)
    } else {
        last.required.checked_sub(1)
    };
    steps.push(match threshold {
        Some(passed) => DispatchStep::ToOverload {
            passed,
            overload: last_index,
        },
        None => DispatchStep::Always {
            overload: last_index,
        },
    });

    let mut prev_required = last.required;
    for i in (0..last_index).rev() {
        let shape = shapes[i];
        if prev_required > shape.total() + 1 {
            nomatch_possible = true;
            steps.push(DispatchStep::NoMatch {
                passed: shape.total(),
            });
        }
        match shape.required.checked_sub(1) {
            Some(passed) => steps.push(DispatchStep::ToOverload { passed, overload: i }),
            None if nomatch_possible => steps.push(DispatchStep::Always { overload: i }),
            None => {}
        }
        prev_required = shape.required;
    }

    DispatchPlan {
        steps,
        nomatch_possible,
    }
}

impl DispatchPlan {
    /// Which overload a call with `argc` arguments runs. Mirrors the emitted
    /// code, including the function-level arity check that precedes it.
    pub fn select(&self, shapes: &[ArityShape], argc: usize) -> Selection {
        let min = shapes.first().map_or(0, |s| s.required);
        let variadic = shapes.last().is_some_and(|s| s.variadic);
        let max = shapes.last().map_or(0, ArityShape::total);
        if argc < min || (!variadic && argc > max) {
            return Selection::WrongArity;
        }
        for step in &self.steps {
            match *step {
                DispatchStep::ToOverload { passed, overload } if argc > passed => {
                    return Selection::Overload(overload)
                }
                DispatchStep::NoMatch { passed } if argc > passed => return Selection::NoMatch,
                DispatchStep::Always { overload } => return Selection::Overload(overload),
                _ => {}
            }
        }
        if self.nomatch_possible {
            Selection::NoMatch
        } else {
            Selection::Overload(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_string;

    fn arglist(src: &str) -> Result<ArgList, String> {
        let forms = read_string(src, "(test)", 1).expect("read");
        ArgList::parse(forms[0].as_array().expect("array"))
    }

    fn shape(required: usize, optional: usize, variadic: bool) -> ArityShape {
        ArityShape {
            required,
            optional,
            variadic,
        }
    }

    #[test]
    fn parses_every_section() {
        let args = arglist("[a b ? (c 1) (d 2) & more | blk]").expect("parse");
        assert_eq!(args.num_required(), 2);
        assert_eq!(args.num_optional(), 2);
        assert_eq!(args.rest.as_ref().map(Identifier::name), Some("more"));
        assert_eq!(args.block.as_ref().map(Identifier::name), Some("blk"));
        assert!(args.duplicate_name().is_none());
    }

    #[test]
    fn rejects_misplaced_markers() {
        let cases = [
            ("[a & r ? (b 1)]", "Unexpected '?' in argument list"),
            ("[a | b & r]", "Unexpected '&' in argument list"),
            ("[a | b | c]", "Unexpected '|' in argument list"),
            ("[a & r b]", "Unexpected argument after rest argument"),
            ("[a | b c]", "Unexpected arguments after block argument"),
            ("[a ?]", "Expected optional arguments after '?' in argument list"),
            ("[a &]", "Expected rest argument after '&' in argument list"),
            ("[a |]", "Expected block argument after '|' in argument list"),
            ("[1]", "Required argument in argument list must be an identifier"),
            (
                "[? b]",
                "Optional argument in argument list must be of the form (name default)",
            ),
            ("[& 1]", "Rest argument in argument list must be an identifier"),
            ("[| :x]", "Block argument in argument list must be an identifier"),
        ];
        for (src, message) in cases {
            assert_eq!(arglist(src).unwrap_err(), message, "{}", src);
        }
    }

    #[test]
    fn finds_duplicates_across_sections() {
        let args = arglist("[a ? (b 1) & a]").expect("parse");
        assert_eq!(args.duplicate_name().map(Identifier::name), Some("a"));
    }

    #[test]
    fn overlap_rules() {
        let err = |shapes: &[ArityShape]| check_overload_shapes(shapes).unwrap_err();
        assert_eq!(
            err(&[shape(1, 0, true), shape(2, 0, true)]),
            "Can't have more than one variadic overload"
        );
        assert_eq!(
            err(&[shape(3, 0, false), shape(1, 0, true)]),
            "Can't have a fixed arity overload with more params than a variadic overload"
        );
        assert_eq!(
            err(&[shape(1, 1, false), shape(1, 0, true)]),
            "Can't have two overloads with the same arity"
        );
        assert_eq!(
            err(&[shape(0, 2, false), shape(1, 0, true)]),
            "Can't have an overload with more total (required + optional) arguments than the variadic overload has required argument"
        );
        assert_eq!(
            err(&[shape(1, 0, false), shape(1, 0, false)]),
            "Can't have two overloads with the same arity"
        );
        assert_eq!(
            err(&[shape(0, 1, false), shape(1, 0, false)]),
            "Can't have an overload with as many total (required + optional) arguments as another overload has required arguments"
        );
        assert_eq!(
            check_overload_shapes(&[shape(2, 0, true), shape(1, 0, false), shape(0, 0, false)]),
            Ok(vec![2, 1, 0])
        );
    }

    #[test]
    fn documented_dispatch_table() {
        // ([] 0) ([x] x) ([x y & more] ...)
        let shapes = [shape(0, 0, false), shape(1, 0, false), shape(2, 0, true)];
        let plan = dispatch_plan(&shapes);
        assert_eq!(plan.select(&shapes, 0), Selection::Overload(0));
        assert_eq!(plan.select(&shapes, 1), Selection::Overload(1));
        assert_eq!(plan.select(&shapes, 2), Selection::Overload(2));
        assert_eq!(plan.select(&shapes, 5), Selection::Overload(2));
    }

    #[test]
    fn gaps_between_overloads_raise() {
        // ([] ...) ([a b c] ...)
        let shapes = [shape(0, 0, false), shape(3, 0, false)];
        let plan = dispatch_plan(&shapes);
        assert!(plan.nomatch_possible);
        assert_eq!(plan.select(&shapes, 0), Selection::Overload(0));
        assert_eq!(plan.select(&shapes, 1), Selection::NoMatch);
        assert_eq!(plan.select(&shapes, 2), Selection::NoMatch);
        assert_eq!(plan.select(&shapes, 3), Selection::Overload(1));
        assert_eq!(plan.select(&shapes, 4), Selection::WrongArity);
    }

    #[test]
    fn shared_required_count_with_variadic() {
        // ([x] ...) ([x & more] ...)
        let shapes = [shape(1, 0, false), shape(1, 0, true)];
        let plan = dispatch_plan(&shapes);
        assert_eq!(plan.select(&shapes, 0), Selection::WrongArity);
        assert_eq!(plan.select(&shapes, 1), Selection::Overload(0));
        assert_eq!(plan.select(&shapes, 2), Selection::Overload(1));
    }

    #[test]
    fn every_valid_overload_set_dispatches_to_the_unique_acceptor() {
        let mut candidates = Vec::new();
        for required in 0..4 {
            for optional in 0..3 {
                for variadic in [false, true] {
                    candidates.push(shape(required, optional, variadic));
                }
            }
        }
        let mut checked = 0;
        for a in &candidates {
            for b in &candidates {
                for c in candidates.iter().map(Some).chain([None]) {
                    let mut input = vec![*a, *b];
                    input.extend(c.copied());
                    let Ok(order) = check_overload_shapes(&input) else {
                        continue;
                    };
                    let shapes: Vec<ArityShape> = order.iter().map(|&i| input[i]).collect();
                    let plan = dispatch_plan(&shapes);
                    for argc in 0..10 {
                        let acceptors: Vec<usize> = (0..shapes.len())
                            .filter(|&i| shapes[i].accepts(argc))
                            .collect();
                        // Only the variadic overload may share an arity with a fixed one.
                        if acceptors.len() > 1 {
                            assert_eq!(acceptors.len(), 2, "{:?} at {}", shapes, argc);
                            assert!(shapes[acceptors[1]].variadic, "{:?} at {}", shapes, argc);
                        }
                        match plan.select(&shapes, argc) {
                            Selection::Overload(i) => {
                                assert!(acceptors.contains(&i), "{:?} with {}", shapes, argc)
                            }
                            Selection::NoMatch | Selection::WrongArity => {
                                assert!(acceptors.is_empty(), "{:?} with {}", shapes, argc)
                            }
                        }
                    }
                    checked += 1;
                }
            }
        }
        assert!(checked > 0);
    }
}
