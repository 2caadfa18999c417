//! Rhai-backed expression evaluation for module templates.
//!
//! Expressions are evaluated with `eval_expression_with_scope`, so templates can
//! only contain expressions (no statements, loops or function definitions).
//! The engine is sandboxed the same way for every evaluation:
//! - bounded expression depth and operation count
//! - bounded string/array/map sizes
//!
//! Available to expressions:
//! - every binding of the current [`Bindings`] as a variable
//! - `pi`, `e` constants
//! - `random()` - next value in `[0, 1)` from the scene's random stream
//! - `atan2(y, x)` and integer overloads of the common math functions,
//!   so `sqrt(2)` works as well as `sqrt(2.0)`
//!
//! Arithmetic is numeric rather than Rhai's integer defaults: `/` on two
//! integers yields a float (`1/2 == 0.5`) and `^` is exponentiation with the
//! precedence of `**` (`2*n^2 == 2*(n^2)`), not XOR.

use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rhai::{Dynamic, Engine, Scope, FLOAT, INT};
use serde_json::{Map, Number, Value};

use crate::bindings::Bindings;
use crate::error::EvalError;

/// Shared handle to a scene's random-number stream.
pub type RngHandle = Rc<RefCell<StdRng>>;

pub fn seeded_rng(seed: u64) -> RngHandle {
    Rc::new(RefCell::new(StdRng::seed_from_u64(seed)))
}

pub struct ExprEngine {
    engine: Engine,
    rng: RngHandle,
}

impl ExprEngine {
    pub fn new(seed: u64) -> Self {
        Self::with_rng(seeded_rng(seed))
    }

    /// Create an engine whose `random()` draws from `rng`.
    pub fn with_rng(rng: RngHandle) -> Self {
        let mut engine = Engine::new();

        // Sandbox settings
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(100_000);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(1_000);
        engine.set_max_map_size(500);

        // Built-in operators on standard types only yield to registered
        // overloads with fast operators off.
        engine.set_fast_operators(false);
        engine.register_fn("/", |a: INT, b: INT| a as FLOAT / b as FLOAT);
        engine.register_fn("**", |a: INT, b: INT| (a as FLOAT).powf(b as FLOAT));

        let stream = Rc::clone(&rng);
        engine.register_fn("random", move || -> FLOAT { stream.borrow_mut().gen::<FLOAT>() });
        engine.register_fn("atan2", |y: FLOAT, x: FLOAT| y.atan2(x));

        let int_math: [(&str, fn(FLOAT) -> FLOAT); 10] = [
            ("sqrt", f64::sqrt),
            ("sin", f64::sin),
            ("cos", f64::cos),
            ("tan", f64::tan),
            ("asin", f64::asin),
            ("acos", f64::acos),
            ("atan", f64::atan),
            ("exp", f64::exp),
            ("ln", f64::ln),
            ("log10", f64::log10),
        ];
        for (name, f) in int_math {
            engine.register_fn(name, move |x: INT| f(x as FLOAT));
        }

        Self { engine, rng }
    }

    /// Restart the random stream from `seed`.
    pub fn reseed(&self, seed: u64) {
        *self.rng.borrow_mut() = StdRng::seed_from_u64(seed);
    }

    fn scope_for(bindings: &Bindings) -> Scope<'static> {
        let mut scope = Scope::new();
        scope.push_constant("pi", std::f64::consts::PI);
        scope.push_constant("e", std::f64::consts::E);
        // Later pushes shadow earlier ones, matching the layer order.
        for (name, value) in bindings.iter() {
            scope.push_dynamic(name.to_string(), value_to_dynamic(value));
        }
        scope
    }

    /// Evaluate `expr` against `bindings`.
    pub fn eval(&self, expr: &str, bindings: &Bindings) -> Result<Value, EvalError> {
        let mut scope = Self::scope_for(bindings);
        let result = self
            .engine
            .eval_expression_with_scope::<Dynamic>(&mut scope, &caret_to_power(expr))
            .map_err(|e| EvalError::new(expr, e.to_string()))?;
        dynamic_to_value(result).map_err(|message| EvalError::new(expr, message))
    }

    /// Evaluate a condition: booleans as-is, numbers are true when non-zero.
    pub fn eval_condition(&self, expr: &str, bindings: &Bindings) -> Result<bool, EvalError> {
        match self.eval(expr, bindings)? {
            Value::Bool(b) => Ok(b),
            Value::Number(n) => Ok(n.as_f64().map_or(false, |f| f != 0.0)),
            other => Err(EvalError::new(
                expr,
                format!("condition must be a boolean or number, got {}", other),
            )),
        }
    }
}

/// Rewrite `^` outside string and character literals as Rhai's `**`.
fn caret_to_power(expr: &str) -> Cow<'_, str> {
    if !expr.contains('^') {
        return Cow::Borrowed(expr);
    }
    let mut out = String::with_capacity(expr.len() + 4);
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in expr.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None => match c {
                '^' => out.push_str("**"),
                '"' | '\'' | '`' => {
                    quote = Some(c);
                    out.push(c);
                }
                _ => out.push(c),
            },
        }
    }
    Cow::Owned(out)
}

pub fn number(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// Convert a JSON value into a Rhai value. Numbers always become floats so
/// division of bound values never truncates.
pub fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => Dynamic::from(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => Dynamic::from_array(items.iter().map(value_to_dynamic).collect()),
        Value::Object(fields) => {
            let mut map = rhai::Map::new();
            for (k, v) in fields {
                map.insert(k.as_str().into(), value_to_dynamic(v));
            }
            Dynamic::from_map(map)
        }
    }
}

pub fn dynamic_to_value(value: Dynamic) -> Result<Value, String> {
    if value.is_unit() {
        return Ok(Value::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(Value::from(i));
    }
    if let Ok(f) = value.as_float() {
        return Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| format!("result is not a finite number ({})", f));
    }
    if value.is_string() {
        return value
            .into_string()
            .map(Value::String)
            .map_err(|t| format!("cannot read string of type {}", t));
    }
    if value.is_array() {
        let items = value
            .into_array()
            .map_err(|t| format!("cannot read array of type {}", t))?;
        return items
            .into_iter()
            .map(dynamic_to_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    if value.is_map() {
        let type_name = value.type_name();
        let map = value
            .try_cast::<rhai::Map>()
            .ok_or_else(|| format!("cannot read map of type {}", type_name))?;
        let mut fields = Map::new();
        for (k, v) in map {
            fields.insert(k.to_string(), dynamic_to_value(v)?);
        }
        return Ok(Value::Object(fields));
    }
    Err(format!("unsupported result type {}", value.type_name()))
}

/// Render a value for string interpolation. Integral floats print without a
/// fractional part (`5`, not `5.0`).
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => format!("{}", n.as_f64().unwrap_or(0.0)),
        },
        other => other.to_string(),
    }
}
