use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Core forms with dedicated lowering. They are recognised before macro
/// expansion, so no macro or function can shadow them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecialForm {
    Def,
    If,
    Do,
    Quote,
    Let,
    Loop,
    Recur,
    Fn,
    Send,
    Try,
}

static SPECIAL_FORMS: Lazy<HashMap<&'static str, SpecialForm>> = Lazy::new(|| {
    SpecialForm::ALL
        .iter()
        .map(|form| (form.name(), *form))
        .collect()
});

impl SpecialForm {
    pub const ALL: [SpecialForm; 10] = [
        SpecialForm::Def,
        SpecialForm::If,
        SpecialForm::Do,
        SpecialForm::Quote,
        SpecialForm::Let,
        SpecialForm::Loop,
        SpecialForm::Recur,
        SpecialForm::Fn,
        SpecialForm::Send,
        SpecialForm::Try,
    ];

    pub fn lookup(name: &str) -> Option<SpecialForm> {
        SPECIAL_FORMS.get(name).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            SpecialForm::Def => "def",
            SpecialForm::If => "if",
            SpecialForm::Do => "do",
            SpecialForm::Quote => "quote",
            SpecialForm::Let => "let",
            SpecialForm::Loop => "loop",
            SpecialForm::Recur => "recur",
            SpecialForm::Fn => "fn",
            SpecialForm::Send => ".",
            SpecialForm::Try => "try",
        }
    }
}

pub fn is_special_form(name: &str) -> bool {
    SpecialForm::lookup(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for form in SpecialForm::ALL {
            assert_eq!(SpecialForm::lookup(form.name()), Some(form));
        }
        assert!(is_special_form("."));
        assert!(!is_special_form("defn"));
        assert!(!is_special_form(".."));
    }
}
