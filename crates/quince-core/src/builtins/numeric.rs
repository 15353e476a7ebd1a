use std::cmp::Ordering;

use num::rational::Rational64;
use num::traits::{CheckedAdd, CheckedDiv, CheckedMul, CheckedSub, ToPrimitive};
use num::Integer;

use crate::error::QuinceError;
use crate::value::Value;

/// Numeric tower: integers widen to rationals, and either widens to floats.
#[derive(Clone, Copy, Debug)]
enum Num {
    Int(i64),
    Rational(Rational64),
    Float(f64),
}

fn rational_to_f64(r: &Rational64) -> f64 {
    r.numer().to_f64().unwrap_or(f64::NAN) / r.denom().to_f64().unwrap_or(f64::NAN)
}

impl Num {
    fn from_value(value: &Value, target: &str) -> Result<Num, QuinceError> {
        match value {
            Value::Int(n) => Ok(Num::Int(*n)),
            Value::Rational(r) => Ok(Num::Rational(*r)),
            Value::Float(f) => Ok(Num::Float(*f)),
            other => Err(QuinceError::type_error(format!(
                "{} can't be coerced into {}",
                other.type_name(),
                target
            ))),
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Rational(r) => rational_to_f64(&r),
            Num::Float(f) => f,
        }
    }

    fn to_rational(self) -> Rational64 {
        match self {
            Num::Int(n) => Rational64::from_integer(n),
            Num::Rational(r) => r,
            Num::Float(f) => Rational64::approximate_float(f).unwrap_or_default(),
        }
    }
}

enum Pair {
    Ints(i64, i64),
    Rationals(Rational64, Rational64),
    Floats(f64, f64),
}

fn widen(a: &Value, b: &Value) -> Result<Pair, QuinceError> {
    let lhs = Num::from_value(a, "Number")?;
    let rhs = Num::from_value(b, lhs_class(&lhs))?;
    Ok(match (lhs, rhs) {
        (Num::Int(x), Num::Int(y)) => Pair::Ints(x, y),
        (Num::Float(_), _) | (_, Num::Float(_)) => Pair::Floats(lhs.to_f64(), rhs.to_f64()),
        _ => Pair::Rationals(lhs.to_rational(), rhs.to_rational()),
    })
}

fn lhs_class(num: &Num) -> &'static str {
    match num {
        Num::Int(_) => "Integer",
        Num::Rational(_) => "Rational",
        Num::Float(_) => "Float",
    }
}

fn overflow() -> QuinceError {
    QuinceError::runtime("integer overflow")
}

pub fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_) | Value::Rational(_))
}

pub fn add(a: &Value, b: &Value) -> Result<Value, QuinceError> {
    match widen(a, b)? {
        Pair::Ints(x, y) => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
        Pair::Rationals(x, y) => x.checked_add(&y).map(Value::Rational).ok_or_else(overflow),
        Pair::Floats(x, y) => Ok(Value::Float(x + y)),
    }
}

pub fn sub(a: &Value, b: &Value) -> Result<Value, QuinceError> {
    match widen(a, b)? {
        Pair::Ints(x, y) => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
        Pair::Rationals(x, y) => x.checked_sub(&y).map(Value::Rational).ok_or_else(overflow),
        Pair::Floats(x, y) => Ok(Value::Float(x - y)),
    }
}

pub fn mul(a: &Value, b: &Value) -> Result<Value, QuinceError> {
    match widen(a, b)? {
        Pair::Ints(x, y) => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
        Pair::Rationals(x, y) => x.checked_mul(&y).map(Value::Rational).ok_or_else(overflow),
        Pair::Floats(x, y) => Ok(Value::Float(x * y)),
    }
}

/// Integer division floors, as `7 / -2 == -4`.
pub fn div(a: &Value, b: &Value) -> Result<Value, QuinceError> {
    match widen(a, b)? {
        Pair::Ints(_, 0) => Err(QuinceError::zero_division()),
        Pair::Ints(x, -1) => x.checked_neg().map(Value::Int).ok_or_else(overflow),
        Pair::Ints(x, y) => Ok(Value::Int(Integer::div_floor(&x, &y))),
        Pair::Rationals(x, y) => {
            if *y.numer() == 0 {
                return Err(QuinceError::zero_division());
            }
            x.checked_div(&y).map(Value::Rational).ok_or_else(overflow)
        }
        Pair::Floats(x, y) => Ok(Value::Float(x / y)),
    }
}

/// Modulo takes the sign of the divisor.
pub fn rem(a: &Value, b: &Value) -> Result<Value, QuinceError> {
    match widen(a, b)? {
        Pair::Ints(_, 0) => Err(QuinceError::zero_division()),
        Pair::Ints(_, -1) => Ok(Value::Int(0)),
        Pair::Ints(x, y) => Ok(Value::Int(Integer::mod_floor(&x, &y))),
        Pair::Rationals(x, y) => {
            if *y.numer() == 0 {
                return Err(QuinceError::zero_division());
            }
            let quotient = x.checked_div(&y).ok_or_else(overflow)?.floor();
            let product = y.checked_mul(&quotient).ok_or_else(overflow)?;
            x.checked_sub(&product).map(Value::Rational).ok_or_else(overflow)
        }
        Pair::Floats(x, y) => {
            let r = x % y;
            Ok(Value::Float(if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r }))
        }
    }
}

pub fn pow(a: &Value, b: &Value) -> Result<Value, QuinceError> {
    match widen(a, b)? {
        Pair::Ints(x, y) if y >= 0 => {
            let exp = u32::try_from(y).map_err(|_| overflow())?;
            x.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
        }
        Pair::Ints(0, _) => Err(QuinceError::zero_division()),
        Pair::Ints(x, y) => {
            let exp = i32::try_from(y).map_err(|_| overflow())?;
            let base = Rational64::from_integer(x);
            let positive = (0..exp.unsigned_abs()).try_fold(Rational64::from_integer(1), |acc, _| {
                acc.checked_mul(&base).ok_or_else(overflow)
            })?;
            Ok(Value::Rational(positive.recip()))
        }
        Pair::Rationals(x, y) if y.is_integer() => {
            let exp = i32::try_from(y.to_integer()).map_err(|_| overflow())?;
            if *x.numer() == 0 && exp < 0 {
                return Err(QuinceError::zero_division());
            }
            let positive = (0..exp.unsigned_abs()).try_fold(Rational64::from_integer(1), |acc, _| {
                acc.checked_mul(&x).ok_or_else(overflow)
            })?;
            Ok(Value::Rational(if exp < 0 { positive.recip() } else { positive }))
        }
        Pair::Rationals(x, y) => Ok(Value::Float(rational_to_f64(&x).powf(rational_to_f64(&y)))),
        Pair::Floats(x, y) => Ok(Value::Float(x.powf(y))),
    }
}

pub fn negate(a: &Value) -> Result<Value, QuinceError> {
    sub(&Value::Int(0), a)
}

pub fn compare(a: &Value, b: &Value) -> Result<Ordering, QuinceError> {
    let ordering = match widen(a, b)? {
        Pair::Ints(x, y) => Some(x.cmp(&y)),
        Pair::Rationals(x, y) => Some(x.cmp(&y)),
        Pair::Floats(x, y) => x.partial_cmp(&y),
    };
    ordering.ok_or_else(|| {
        QuinceError::argument_error(format!(
            "comparison of {} with {} failed",
            a.type_name(),
            b
        ))
    })
}

/// `==` across the tower: `1 == 1.0` and `1/2 == 0.5`.
pub fn num_eq(a: &Value, b: &Value) -> bool {
    if !is_number(a) || !is_number(b) {
        return a == b;
    }
    matches!(compare(a, b), Ok(Ordering::Equal))
}

pub fn to_f64(value: &Value) -> Result<f64, QuinceError> {
    Num::from_value(value, "Float").map(Num::to_f64)
}

/// Truncates toward zero.
pub fn to_i64(value: &Value) -> Result<i64, QuinceError> {
    match Num::from_value(value, "Integer")? {
        Num::Int(n) => Ok(n),
        Num::Rational(r) => Ok(r.trunc().to_integer()),
        Num::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
        Num::Float(f) => Err(QuinceError::argument_error(format!(
            "{} out of range of Integer",
            Value::Float(f)
        ))),
    }
}

pub fn abs(value: &Value) -> Result<Value, QuinceError> {
    Ok(match Num::from_value(value, "Number")? {
        Num::Int(n) => Value::Int(n.checked_abs().ok_or_else(overflow)?),
        Num::Rational(r) => Value::Rational(if r < Rational64::from_integer(0) { -r } else { r }),
        Num::Float(f) => Value::Float(f.abs()),
    })
}

pub fn is_zero(value: &Value) -> Result<bool, QuinceError> {
    Ok(Num::from_value(value, "Number")?.to_f64() == 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_floors() {
        assert_eq!(div(&Value::Int(7), &Value::Int(2)).expect("div"), Value::Int(3));
        assert_eq!(div(&Value::Int(-7), &Value::Int(2)).expect("div"), Value::Int(-4));
        assert_eq!(div(&Value::Int(-7), &Value::Int(-2)).expect("div"), Value::Int(3));
        assert_eq!(rem(&Value::Int(-7), &Value::Int(3)).expect("rem"), Value::Int(2));
        let err = div(&Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.to_string(), "ZeroDivisionError: divided by 0");
    }

    #[test]
    fn mixed_operands_widen() {
        let half = Value::Rational(Rational64::new(1, 2));
        assert_eq!(
            add(&Value::Int(1), &half).expect("add"),
            Value::Rational(Rational64::new(3, 2))
        );
        assert_eq!(add(&half, &Value::Float(1.0)).expect("add"), Value::Float(1.5));
        assert!(num_eq(&Value::Int(1), &Value::Float(1.0)));
        assert!(!num_eq(&Value::Int(1), &Value::string("1")));
        assert_eq!(
            pow(&Value::Int(2), &Value::Int(-2)).expect("pow"),
            Value::Rational(Rational64::new(1, 4))
        );
    }

    #[test]
    fn overflow_and_bad_operands_raise() {
        let err = add(&Value::Int(i64::MAX), &Value::Int(1)).unwrap_err();
        assert_eq!(err.to_string(), "RuntimeError: integer overflow");
        let err = add(&Value::Int(1), &Value::string("a")).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: String can't be coerced into Integer");
        assert_eq!(
            compare(&Value::Float(2.5), &Value::Int(2)).expect("cmp"),
            Ordering::Greater
        );
    }
}
