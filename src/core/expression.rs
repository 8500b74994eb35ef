// Compiled math expressions and argument name parsing
//
// Expressions are compiled once at generator construction. A malformed
// expression is reported there and degrades every evaluation to the error
// sentinel instead of aborting the run.

use crate::error::{GeneratorError, GeneratorResult};
use crate::types::TIMELAG_SEPARATOR;
use evalexpr::{build_operator_tree, ContextWithMutableVariables, HashMapContext, Node, Value};
use tracing::warn;

/// A named expression argument, optionally lag-suffixed (`name_<lag>`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentSpec {
    /// The full argument text, used as the variable name inside expressions
    pub raw: String,
    /// The identifier part before the lag suffix
    pub name: String,
    pub lag: usize,
}

impl ArgumentSpec {
    pub fn parse(arg: &str) -> GeneratorResult<Self> {
        match arg.find(TIMELAG_SEPARATOR) {
            None => Ok(Self {
                raw: arg.to_string(),
                name: arg.to_string(),
                lag: 0,
            }),
            Some(idx) => {
                let name = &arg[..idx];
                let suffix = &arg[idx + 1..];
                let lag: usize = suffix.parse().map_err(|_| {
                    GeneratorError::ConfigValidation(format!(
                        "could not parse timelag for argument '{}'",
                        arg
                    ))
                })?;
                Ok(Self {
                    raw: arg.to_string(),
                    name: name.to_string(),
                    lag,
                })
            }
        }
    }

    pub fn parse_all(args: &[String]) -> GeneratorResult<Vec<Self>> {
        args.iter().map(|a| Self::parse(a)).collect()
    }
}

/// An expression compiled at construction time
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    node: Option<Node>,
}

impl CompiledExpression {
    pub fn compile(source: &str) -> Self {
        let node = match build_operator_tree(source) {
            Ok(node) => Some(node),
            Err(e) => {
                warn!("⚠️  Please check syntax of expression '{}': {}", source, e);
                None
            }
        };
        Self {
            source: source.to_string(),
            node,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with the given name/value bindings
    pub fn evaluate(&self, bindings: &[(String, f64)]) -> GeneratorResult<f64> {
        let node = self.node.as_ref().ok_or_else(|| {
            GeneratorError::ExpressionFault(format!("expression '{}' did not compile", self.source))
        })?;

        let mut ctx = HashMapContext::new();
        for (name, value) in bindings {
            ctx.set_value(name.clone(), Value::Float(*value)).map_err(|e| {
                GeneratorError::ExpressionFault(format!(
                    "binding '{}' for '{}': {}",
                    name, self.source, e
                ))
            })?;
        }

        let value = node.eval_with_context(&ctx).map_err(|e| {
            GeneratorError::ExpressionFault(format!("'{}': {}", self.source, e))
        })?;

        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            Value::Boolean(b) => Ok(if b { 1.0 } else { 0.0 }),
            other => Err(GeneratorError::ExpressionFault(format!(
                "'{}' evaluated to non-numeric value {:?}",
                self.source, other
            ))),
        }
    }

    /// A condition holds iff it evaluates to exactly 1.0
    pub fn holds(&self, bindings: &[(String, f64)]) -> GeneratorResult<bool> {
        Ok(self.evaluate(bindings)? == 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(pairs: &[(&str, f64)]) -> Vec<(String, f64)> {
        pairs.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    #[test]
    fn test_argument_spec_bare() {
        let spec = ArgumentSpec::parse("t").unwrap();
        assert_eq!(spec.name, "t");
        assert_eq!(spec.lag, 0);
        assert_eq!(spec.raw, "t");
    }

    #[test]
    fn test_argument_spec_lagged() {
        let spec = ArgumentSpec::parse("s1_3").unwrap();
        assert_eq!(spec.name, "s1");
        assert_eq!(spec.lag, 3);
        assert_eq!(spec.raw, "s1_3");
    }

    #[test]
    fn test_argument_spec_bad_lag() {
        assert!(ArgumentSpec::parse("s1_abc").is_err());
    }

    #[test]
    fn test_evaluate_with_bindings() {
        let expr = CompiledExpression::compile("2 * a + b_1");
        let v = expr.evaluate(&bind(&[("a", 3.0), ("b_1", 4.0)])).unwrap();
        assert_eq!(v, 10.0);
    }

    #[test]
    fn test_condition_boundary_equality_is_false() {
        let expr = CompiledExpression::compile("t > 5");
        assert!(!expr.holds(&bind(&[("t", 5.0)])).unwrap());
        assert!(expr.holds(&bind(&[("t", 5.1)])).unwrap());
    }

    #[test]
    fn test_malformed_expression_degrades() {
        let expr = CompiledExpression::compile("2 *** (");
        assert!(expr.evaluate(&[]).is_err());
    }

    #[test]
    fn test_missing_binding_is_fault() {
        let expr = CompiledExpression::compile("a + b");
        assert!(expr.evaluate(&bind(&[("a", 1.0)])).is_err());
    }
}
