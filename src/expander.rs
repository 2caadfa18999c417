//! Template expansion.
//!
//! [`Expander`] carries what every step needs (the expression engine and the
//! module's loop cap) so the three mutually recursive operations
//! ([`Expander::expand_text`], [`Expander::expand_object`],
//! [`Expander::expand_array`]) only pass the current [`Bindings`] around.
//! Expansion never mutates its inputs; errors are wrapped with the template
//! location and bindings in force and returned, never swallowed.

use serde_json::{Map, Value};

use crate::bindings::Bindings;
use crate::error::{ExpansionError, LoopTooLargeError};
use crate::expression::{number, value_to_text, ExprEngine};
use crate::template::{ArrayItem, ObjectTemplate, Segment, Template, TextTemplate};
use crate::var_range::VariableRange;

pub const DEFAULT_MAX_LOOP_LENGTH: usize = 1000;

pub struct Expander<'e> {
    engine: &'e ExprEngine,
    max_loop_length: usize,
}

impl<'e> Expander<'e> {
    pub fn new(engine: &'e ExprEngine, max_loop_length: usize) -> Self {
        Self {
            engine,
            max_loop_length,
        }
    }

    /// Expand any template node by kind.
    pub fn expand(&self, template: &Template, ctx: &Bindings) -> Result<Value, ExpansionError> {
        match template {
            Template::Text(text) => self.expand_text(text, ctx),
            Template::Object(object) => self.expand_object(object, ctx).map(Value::Object),
            Template::Array(items) => self.expand_array(items, ctx).map(Value::Array),
            Template::Number(n) => Ok(Value::Number(n.clone())),
            Template::Bool(b) => Ok(Value::Bool(*b)),
            Template::Null => Ok(Value::Null),
        }
    }

    pub fn expand_text(&self, text: &TextTemplate, ctx: &Bindings) -> Result<Value, ExpansionError> {
        match text {
            TextTemplate::Literal(s) => Ok(Value::String(s.clone())),
            TextTemplate::Expression(expr) => Ok(self.engine.eval(expr, ctx)?),
            TextTemplate::Interpolated(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(s) => out.push_str(s),
                        Segment::Expression(expr) => {
                            out.push_str(&value_to_text(&self.engine.eval(expr, ctx)?))
                        }
                    }
                }
                Ok(Value::String(out))
            }
        }
    }

    pub fn expand_object(
        &self,
        object: &ObjectTemplate,
        ctx: &Bindings,
    ) -> Result<Map<String, Value>, ExpansionError> {
        let mut out = Map::new();
        for (key, field) in &object.fields {
            let value = self
                .expand(field, ctx)
                .map_err(|e| e.within(format!("field `{}`", key), ctx))?;
            out.insert(key.clone(), value);
        }
        Ok(out)
    }

    pub fn expand_array(&self, items: &[ArrayItem], ctx: &Bindings) -> Result<Vec<Value>, ExpansionError> {
        let mut out = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let location = || format!("element [{}]", index);
            match item {
                ArrayItem::Plain(template) => {
                    let value = self
                        .expand(template, ctx)
                        .map_err(|e| e.within(location(), ctx))?;
                    out.push(value);
                }
                ArrayItem::Conditional { condition, body } => {
                    let keep = self
                        .engine
                        .eval_condition(condition, ctx)
                        .map_err(|e| ExpansionError::from(e).within(location(), ctx))?;
                    if keep {
                        let value = self
                            .expand_object(body, ctx)
                            .map_err(|e| e.within(location(), ctx))?;
                        out.push(Value::Object(value));
                    }
                }
                ArrayItem::ForLoop {
                    ranges,
                    condition,
                    body,
                } => {
                    let axes = self
                        .loop_axes(ranges, ctx)
                        .map_err(|e| e.within(location(), ctx))?;
                    self.expand_product(&axes, condition.as_deref(), body, ctx, &location(), &mut out)?;
                }
            }
        }
        Ok(out)
    }

    /// Expand an object field by field, making each result visible to the
    /// fields after it. Used for a module's derived `vars`.
    pub fn expand_sequential<'c>(
        &self,
        object: &ObjectTemplate,
        ctx: &'c Bindings<'c>,
    ) -> Result<Bindings<'c>, ExpansionError> {
        let mut scope = ctx.layer();
        for (key, field) in &object.fields {
            let value = self
                .expand(field, &scope)
                .map_err(|e| e.within(format!("var `{}`", key), &scope))?;
            scope.insert(key.clone(), value);
        }
        Ok(scope)
    }

    /// Parse every range of a `for` and check the loop cap before any
    /// iteration happens.
    fn loop_axes(&self, ranges: &[String], ctx: &Bindings) -> Result<Vec<(String, Vec<f64>)>, ExpansionError> {
        let parsed = ranges
            .iter()
            .map(|descriptor| VariableRange::parse(descriptor, self.engine, ctx))
            .collect::<Result<Vec<_>, _>>()?;

        let limit = self.max_loop_length;
        let mut total: usize = 1;
        for range in &parsed {
            let count = range.count_up_to(limit);
            if count > limit {
                return Err(LoopTooLargeError {
                    variable: range.name.clone(),
                    count,
                    limit,
                }
                .into());
            }
            total = total.saturating_mul(count);
            if total > limit {
                return Err(LoopTooLargeError {
                    variable: range.name.clone(),
                    count: total,
                    limit,
                }
                .into());
            }
        }

        Ok(parsed
            .into_iter()
            .map(|range| {
                let values = range.values().collect();
                (range.name, values)
            })
            .collect())
    }

    /// Walk the Cartesian product of `axes`, first axis outermost.
    fn expand_product(
        &self,
        axes: &[(String, Vec<f64>)],
        condition: Option<&str>,
        body: &ObjectTemplate,
        ctx: &Bindings,
        location: &str,
        out: &mut Vec<Value>,
    ) -> Result<(), ExpansionError> {
        let Some(((name, values), rest)) = axes.split_first() else {
            if let Some(condition) = condition {
                let keep = self
                    .engine
                    .eval_condition(condition, ctx)
                    .map_err(|e| ExpansionError::from(e).within(location, ctx))?;
                if !keep {
                    return Ok(());
                }
            }
            let value = self
                .expand_object(body, ctx)
                .map_err(|e| e.within(location, ctx))?;
            out.push(Value::Object(value));
            return Ok(());
        };

        for value in values {
            let scope = ctx.layer().with(name.clone(), number(*value));
            self.expand_product(rest, condition, body, &scope, location, out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::compile_array;
    use serde_json::json;

    fn expand_items(engine: &ExprEngine, items: Value, ctx: &Bindings) -> Result<Vec<Value>, ExpansionError> {
        let items = compile_array(&items).unwrap();
        Expander::new(engine, DEFAULT_MAX_LOOP_LENGTH).expand_array(&items, ctx)
    }

    fn text(s: &str) -> Result<Value, ExpansionError> {
        let engine = ExprEngine::new(0);
        let template = Template::compile(&json!(s)).unwrap();
        Expander::new(&engine, DEFAULT_MAX_LOOP_LENGTH).expand(&template, &Bindings::new())
    }

    #[test]
    fn test_whole_expression_is_typed() {
        assert_eq!(text("`2+3`").unwrap(), json!(5));
    }

    #[test]
    fn test_interpolation_is_text() {
        assert_eq!(text("v=`2+3`").unwrap(), json!("v=5"));
        assert_eq!(text("`1+1` and `3*2`!").unwrap(), json!("2 and 6!"));
    }

    #[test]
    fn test_loop_order_and_values() {
        let engine = ExprEngine::new(0);
        let out = expand_items(&engine, json!([{"for": "x=0:1:3", "v": "`x`"}]), &Bindings::new()).unwrap();
        let xs: Vec<f64> = out.iter().map(|o| o["v"].as_f64().unwrap()).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_if_filters_iterations() {
        let engine = ExprEngine::new(0);
        let out = expand_items(
            &engine,
            json!([{"for": "i=0:1:2", "if": "i!=1", "type": "Blocker", "i": "`i`"}]),
            &Bindings::new(),
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["i"].as_f64(), Some(0.0));
        assert_eq!(out[1]["i"].as_f64(), Some(2.0));
        // Control keys never leak into the output.
        assert!(out[0].get("for").is_none());
        assert!(out[0].get("if").is_none());
    }

    #[test]
    fn test_standalone_if() {
        let engine = ExprEngine::new(0);
        let ctx = Bindings::new().with("n", 2);
        let out = expand_items(
            &engine,
            json!([{"if": "n > 1", "a": 1}, {"if": "n > 5", "b": 2}]),
            &ctx,
        )
        .unwrap();
        assert_eq!(out, vec![json!({"a": 1})]);
    }

    #[test]
    fn test_cartesian_product_first_range_outermost() {
        let engine = ExprEngine::new(0);
        let out = expand_items(
            &engine,
            json!([{"for": ["i=0:1:1", "j=0:1:2"], "ij": "`i`,`j`"}]),
            &Bindings::new(),
        )
        .unwrap();
        let labels: Vec<&str> = out.iter().map(|o| o["ij"].as_str().unwrap()).collect();
        assert_eq!(labels, vec!["0,0", "0,1", "0,2", "1,0", "1,1", "1,2"]);
    }

    #[test]
    fn test_single_range_over_cap() {
        let engine = ExprEngine::new(0);
        let err = expand_items(&engine, json!([{"for": "i=0:1:1000"}]), &Bindings::new()).unwrap_err();
        match err.root() {
            ExpansionError::LoopTooLarge(e) => {
                assert_eq!(e.variable, "i");
                assert_eq!(e.limit, 1000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_exact_cap_is_allowed() {
        let engine = ExprEngine::new(0);
        let out = expand_items(&engine, json!([{"for": "i=1:1:1000"}]), &Bindings::new()).unwrap();
        assert_eq!(out.len(), 1000);
    }

    #[test]
    fn test_product_over_cap_names_variable() {
        let engine = ExprEngine::new(0);
        let items = compile_array(&json!([{"for": ["a=0:1:9", "b=0:1:9"]}])).unwrap();
        let err = Expander::new(&engine, 50)
            .expand_array(&items, &Bindings::new())
            .unwrap_err();
        match err.root() {
            ExpansionError::LoopTooLarge(e) => {
                assert_eq!(e.variable, "b");
                assert_eq!(e.count, 100);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_zero_step_hits_cap() {
        let engine = ExprEngine::new(0);
        let err = expand_items(&engine, json!([{"for": "i=0:0:1"}]), &Bindings::new()).unwrap_err();
        assert!(matches!(err.root(), ExpansionError::LoopTooLarge(_)));
    }

    #[test]
    fn test_nested_arrays_and_objects() {
        let engine = ExprEngine::new(0);
        let ctx = Bindings::new().with("x_1", 10).with("y_1", 20);
        let out = expand_items(
            &engine,
            json!([{
                "type": "TiltedMirror",
                "p1": {"x": "`x_1`", "y": "`y_1`"},
                "tags": ["m-`x_1`", {"for": "k=1:1:2", "k": "`k*2`"}],
                "enabled": true,
                "n": 3
            }]),
            &ctx,
        )
        .unwrap();
        let mirror = &out[0];
        assert_eq!(mirror["p1"]["x"].as_f64(), Some(10.0));
        assert_eq!(mirror["tags"][0], json!("m-10"));
        assert_eq!(mirror["tags"][2]["k"].as_f64(), Some(4.0));
        assert_eq!(mirror["enabled"], json!(true));
        assert_eq!(mirror["n"], json!(3));
    }

    #[test]
    fn test_error_is_wrapped_with_location_and_bindings() {
        let engine = ExprEngine::new(0);
        let err = expand_items(
            &engine,
            json!([{"type": "Blocker"}, {"for": "i=0:1:1", "p1": {"x": "`i + nope`"}}]),
            &Bindings::new(),
        )
        .unwrap_err();

        assert_eq!(err.trail(), vec!["element [1]", "field `p1`", "field `x`"]);
        assert!(matches!(err.root(), ExpansionError::Evaluate(_)));
        assert!(err.to_string().contains("{i: 0}"));
    }

    #[test]
    fn test_sequential_vars() {
        let engine = ExprEngine::new(0);
        let vars = ObjectTemplate::compile(&json!({"w": "`x_1 * 2`", "half": "`w / 4`"})).unwrap();
        let ctx = Bindings::new().with("x_1", 3);
        let scope = Expander::new(&engine, DEFAULT_MAX_LOOP_LENGTH)
            .expand_sequential(&vars, &ctx)
            .unwrap();
        assert_eq!(scope.get("w").and_then(Value::as_f64), Some(6.0));
        assert_eq!(scope.get("half").and_then(Value::as_f64), Some(1.5));
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let engine = ExprEngine::new(0);
        let items = compile_array(&json!([{"for": "i=0:1:2", "v": "`i`"}])).unwrap();
        let before = items.clone();
        let ctx = Bindings::new().with("i", 99);
        let expander = Expander::new(&engine, DEFAULT_MAX_LOOP_LENGTH);
        let first = expander.expand_array(&items, &ctx).unwrap();
        let second = expander.expand_array(&items, &ctx).unwrap();
        assert_eq!(items, before);
        assert_eq!(first, second);
        assert_eq!(ctx.get("i"), Some(&json!(99)));
    }
}
