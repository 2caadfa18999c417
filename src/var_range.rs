//! Range descriptors: `name=start:step:end` or `name=start:step:end:default`.
//!
//! Every field is an expression, so a range can depend on parameters, control
//! points or enclosing loop variables.

use std::sync::OnceLock;

use regex::Regex;

use crate::bindings::Bindings;
use crate::error::{RangeParseCause, RangeParseError};
use crate::expression::ExprEngine;

fn identifier() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableRange {
    pub name: String,
    pub start: f64,
    pub step: f64,
    pub end: f64,
    pub default: f64,
}

impl VariableRange {
    pub fn parse(
        descriptor: &str,
        engine: &ExprEngine,
        bindings: &Bindings,
    ) -> Result<Self, RangeParseError> {
        let fail = |cause: RangeParseCause| RangeParseError {
            descriptor: descriptor.to_string(),
            bindings: bindings.to_string(),
            cause,
        };

        let (name, rhs) = descriptor
            .split_once('=')
            .ok_or_else(|| fail(RangeParseCause::MissingEquals))?;
        let name = name.trim();
        if !identifier().is_match(name) {
            return Err(fail(RangeParseCause::InvalidName(name.to_string())));
        }

        let fields: Vec<&str> = rhs.split(':').collect();
        if !(3..=4).contains(&fields.len()) {
            return Err(fail(RangeParseCause::FieldCount(fields.len())));
        }

        let eval = |field: &'static str, expr: &str| -> Result<f64, RangeParseError> {
            let value = engine
                .eval(expr.trim(), bindings)
                .map_err(|e| fail(RangeParseCause::Evaluate(e)))?;
            value.as_f64().ok_or_else(|| {
                fail(RangeParseCause::NotNumeric {
                    field,
                    value: value.to_string(),
                })
            })
        };

        let start = eval("start", fields[0])?;
        let step = eval("step", fields[1])?;
        let end = eval("end", fields[2])?;
        let default = match fields.get(3) {
            Some(expr) => eval("default", expr)?,
            None => start,
        };

        Ok(Self {
            name: name.to_string(),
            start,
            step,
            end,
            default,
        })
    }

    /// Values from `start` while `value <= end`, stepping by repeated addition.
    pub fn values(&self) -> RangeValues {
        RangeValues {
            next: self.start,
            step: self.step,
            end: self.end,
        }
    }

    /// Number of values, counting no further than `limit + 1`.
    pub fn count_up_to(&self, limit: usize) -> usize {
        self.values().take(limit.saturating_add(1)).count()
    }
}

#[derive(Debug, Clone)]
pub struct RangeValues {
    next: f64,
    step: f64,
    end: f64,
}

impl Iterator for RangeValues {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        // NaN compares false, which also ends the range.
        if !(self.next <= self.end) {
            return None;
        }
        let value = self.next;
        self.next += self.step;
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RangeParseCause;

    fn parse(descriptor: &str) -> Result<VariableRange, RangeParseError> {
        VariableRange::parse(descriptor, &ExprEngine::new(0), &Bindings::new())
    }

    #[test]
    fn test_default_falls_back_to_start() {
        let r = parse("n=2:1:5").unwrap();
        assert_eq!(r.name, "n");
        assert_eq!((r.start, r.step, r.end, r.default), (2.0, 1.0, 5.0, 2.0));
    }

    #[test]
    fn test_explicit_default() {
        let r = parse("n = 0 : 0.5 : 4 : 3").unwrap();
        assert_eq!(r.name, "n");
        assert_eq!(r.default, 3.0);
    }

    #[test]
    fn test_fields_are_expressions() {
        let engine = ExprEngine::new(0);
        let ctx = Bindings::new().with("N", 4);
        let r = VariableRange::parse("i=0:1:N-1", &engine, &ctx).unwrap();
        assert_eq!(r.end, 3.0);
    }

    #[test]
    fn test_inclusive_values() {
        let r = parse("x=0:1:3").unwrap();
        assert_eq!(r.values().collect::<Vec<_>>(), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_uneven_step_stops_below_end() {
        let r = parse("x=0:2:5").unwrap();
        assert_eq!(r.values().collect::<Vec<_>>(), vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_float_step_accumulates() {
        // 0.1 + 0.1 + 0.1 overshoots 0.3, so the end value is not reached.
        let r = parse("x=0:0.1:0.3").unwrap();
        assert_eq!(r.values().collect::<Vec<_>>(), vec![0.0, 0.1, 0.2]);
        assert_eq!(r.count_up_to(1000), 3);
    }

    #[test]
    fn test_start_past_end_is_empty() {
        let r = parse("x=5:1:0").unwrap();
        assert_eq!(r.values().count(), 0);
    }

    #[test]
    fn test_count_stops_past_limit() {
        let r = parse("x=0:0:1").unwrap();
        assert_eq!(r.count_up_to(10), 11);
        let r = parse("x=0:1:1000").unwrap();
        assert_eq!(r.count_up_to(1000), 1001);
    }

    #[test]
    fn test_missing_equals() {
        let err = parse("x0:1:3").unwrap_err();
        assert_eq!(err.cause, RangeParseCause::MissingEquals);
        assert_eq!(err.descriptor, "x0:1:3");
    }

    #[test]
    fn test_too_few_fields() {
        let err = parse("x=0:1").unwrap_err();
        assert_eq!(err.cause, RangeParseCause::FieldCount(2));
    }

    #[test]
    fn test_bad_name() {
        let err = parse("2x=0:1:2").unwrap_err();
        assert!(matches!(err.cause, RangeParseCause::InvalidName(_)));
    }

    #[test]
    fn test_evaluation_failure_carries_bindings() {
        let engine = ExprEngine::new(0);
        let ctx = Bindings::new().with("a", 1);
        let err = VariableRange::parse("x=0:1:missing", &engine, &ctx).unwrap_err();
        assert!(matches!(err.cause, RangeParseCause::Evaluate(_)));
        assert_eq!(err.bindings, "{a: 1}");
    }
}
