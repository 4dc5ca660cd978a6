use fxhash::FxHashMap;
use pretty_assertions::assert_eq;

use crate::errors::{WeaveError, WeaveResult};
use crate::expr::{EvalContext, Expr};
use crate::model::Value;

struct Vars(FxHashMap<String, Value>);

impl EvalContext for Vars {
    fn lookup(&self, ident: &str) -> WeaveResult<Value> {
        self.0.get(ident).cloned().ok_or_else(|| {
            WeaveError::UndefinedVariable {
                key: ident.to_string(),
            }
            .into()
        })
    }
}

fn ctx(pairs: &[(&str, Value)]) -> Vars {
    Vars(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

fn eval(src: &str, ctx: &Vars) -> Value {
    Expr::parse(src).unwrap().evaluate(ctx).unwrap()
}

fn eval_const(src: &str) -> Value {
    eval(src, &ctx(&[]))
}

#[test]
fn precedence() {
    assert_eq!(eval_const("2 + 3 * 4"), Value::Int(14));
    assert_eq!(eval_const("(2 + 3) * 4"), Value::Int(20));
    assert_eq!(eval_const("1 << 2 + 1"), Value::Int(8));
    assert_eq!(eval_const("6 / 2 - 1"), Value::Int(2));
    assert_eq!(eval_const("7 % 4"), Value::Int(3));
}

#[test]
fn bit_vs_logical() {
    assert_eq!(eval_const("6 & 3"), Value::Int(2));
    assert_eq!(eval_const("6 | 3"), Value::Int(7));
    assert_eq!(eval_const("6 ^ 3"), Value::Int(5));
    assert_eq!(eval_const("true && false"), Value::Bool(false));
    assert_eq!(eval_const("true || false"), Value::Bool(true));
    // `&` must not swallow the first half of `&&`.
    assert_eq!(eval_const("1 == 1 && 2 == 2"), Value::Bool(true));
}

#[test]
fn comparisons() {
    assert_eq!(eval_const("3 < 4"), Value::Bool(true));
    assert_eq!(eval_const("4 <= 4"), Value::Bool(true));
    assert_eq!(eval_const("3 > 4"), Value::Bool(false));
    assert_eq!(eval_const("3.5 >= 3"), Value::Bool(true));
    assert_eq!(eval_const("3 == 3.0"), Value::Bool(true));
    assert_eq!(eval_const("\"abc\" < \"abd\""), Value::Bool(true));
    assert_eq!(eval_const("\"x\" == \"x\""), Value::Bool(true));
    assert_eq!(eval_const("1 != 2"), Value::Bool(true));
}

#[test]
fn ternary() {
    assert_eq!(eval_const("true ? 1 : 2"), Value::Int(1));
    assert_eq!(eval_const("1 > 2 ? 1 : 2"), Value::Int(2));
    // Nested in the false arm.
    assert_eq!(eval_const("false ? 1 : false ? 2 : 3"), Value::Int(3));
}

#[test]
fn unary() {
    assert_eq!(eval_const("-3"), Value::Int(-3));
    assert_eq!(eval_const("- -3"), Value::Int(3));
    assert_eq!(eval_const("!true"), Value::Bool(false));
    assert_eq!(eval_const("~0"), Value::Int(-1));
    assert_eq!(eval_const("+2.5"), Value::Double(2.5));
}

#[test]
fn literals() {
    assert_eq!(eval_const("0x1F"), Value::Int(31));
    assert_eq!(eval_const("0b101"), Value::Int(5));
    assert_eq!(eval_const("48_000_000"), Value::Int(48_000_000));
    assert_eq!(eval_const("1.25"), Value::Double(1.25));
    assert_eq!(eval_const("TRUE"), Value::Bool(true));
    assert_eq!(eval_const("False"), Value::Bool(false));
    assert_eq!(eval_const("\"a\\\"b\""), Value::String("a\"b".into()));
}

#[test]
fn numeric_promotion() {
    assert_eq!(eval_const("1 + 0.5"), Value::Double(1.5));
    assert_eq!(eval_const("3.0 * 2"), Value::Double(6.0));
    assert_eq!(eval_const("1 / 2"), Value::Int(0));
    assert_eq!(eval_const("1.0 / 2"), Value::Double(0.5));
}

#[test]
fn identifiers_resolve() {
    let vars = ctx(&[
        ("/SIM/system_clock", Value::Int(48)),
        ("divider", Value::Int(4)),
    ]);
    assert_eq!(eval("/SIM/system_clock / divider", &vars), Value::Int(12));
}

#[test]
fn short_circuit_skips_missing_variable() {
    let vars = ctx(&[("present", Value::Bool(false))]);
    assert_eq!(eval("present && missing", &vars), Value::Bool(false));
    let vars = ctx(&[("present", Value::Bool(true))]);
    assert_eq!(eval("present || missing", &vars), Value::Bool(true));
}

#[test]
fn collect_identifiers_in_order_deduplicated() {
    let parsed = Expr::parse("a + b * a + /osc/freq - clock[]").unwrap();
    let idents = parsed.identifiers();
    assert_eq!(
        idents.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        vec!["a", "b", "/osc/freq", "clock[]"]
    );
}

#[test]
fn collect_does_not_evaluate() {
    // Collection walks the tree without a context, so unresolvable names and
    // would-be type errors are fine.
    let parsed = Expr::parse("no_such_var / 0 + true").unwrap();
    assert_eq!(parsed.identifiers().len(), 1);
}

#[test]
fn division_by_zero() {
    let err = Expr::parse("1 / 0").unwrap().evaluate(&ctx(&[])).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<WeaveError>(),
        Some(WeaveError::DivisionByZero)
    ));
}

#[test]
fn type_errors() {
    assert!(Expr::parse("true + 1").unwrap().evaluate(&ctx(&[])).is_err());
    assert!(Expr::parse("\"a\" - \"b\"").unwrap().evaluate(&ctx(&[])).is_err());
    assert!(Expr::parse("1 && true").unwrap().evaluate(&ctx(&[])).is_err());
}

#[test]
fn parse_errors() {
    assert!(Expr::parse("1 +").is_err());
    assert!(Expr::parse("(1").is_err());
    assert!(Expr::parse("1 2").is_err());
    assert!(Expr::parse("\"unterminated").is_err());
    assert!(Expr::parse("true ? 1").is_err());
}

#[test]
fn both_walks_share_one_parse() {
    let parsed = Expr::parse("sel == 1 ? osc_freq : irc_freq").unwrap();
    let vars = ctx(&[
        ("sel", Value::Int(1)),
        ("osc_freq", Value::Int(8_000_000)),
        ("irc_freq", Value::Int(32_768)),
    ]);
    assert_eq!(parsed.evaluate(&vars).unwrap(), Value::Int(8_000_000));
    // Collection still sees every branch, evaluation only the taken one.
    assert_eq!(parsed.identifiers().len(), 3);
}
