//! Signal equation compiler.
//!
//! Equations are read from configuration, so they are never handed to an
//! interpreter. They are tokenized, parsed into a small expression tree over a
//! fixed grammar (numbers, `Pi`, scanner parameters, quantitative maps,
//! `exp abs sqrt cos sin tan` and `+ - * / ( )`) and evaluated element-wise
//! against bound values.

mod eval;
mod lexer;
mod parser;

pub use eval::{Bindings, EvalError, Evaluation};

use lexer::LexError;
use parser::Parser;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EquationError {
    #[error("Check parenthesis in {image_type} equation")]
    UnbalancedParentheses { image_type: String },

    #[error("Unknown symbol `{symbol}` in {image_type} equation")]
    UnknownSymbol { image_type: String, symbol: String },

    #[error("Unexpected character `{found}` at position {position} in {image_type} equation")]
    UnexpectedCharacter {
        image_type: String,
        found: char,
        position: usize,
    },

    #[error("Invalid number `{text}` at position {position} in {image_type} equation")]
    InvalidNumber {
        image_type: String,
        text: String,
        position: usize,
    },

    #[error("Unexpected `{found}` at position {position} in {image_type} equation")]
    UnexpectedToken {
        image_type: String,
        found: String,
        position: usize,
    },

    #[error("{image_type} equation ends unexpectedly")]
    UnexpectedEnd { image_type: String },

    #[error("{image_type} equation does not use any quantitative map")]
    NoMapReference { image_type: String },
}

impl EquationError {
    /// Name of the image type whose equation failed to compile
    pub fn image_type(&self) -> &str {
        match self {
            EquationError::UnbalancedParentheses { image_type }
            | EquationError::UnknownSymbol { image_type, .. }
            | EquationError::UnexpectedCharacter { image_type, .. }
            | EquationError::InvalidNumber { image_type, .. }
            | EquationError::UnexpectedToken { image_type, .. }
            | EquationError::UnexpectedEnd { image_type }
            | EquationError::NoMapReference { image_type } => image_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Exp,
    Abs,
    Sqrt,
    Cos,
    Sin,
    Tan,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "exp" => Some(Function::Exp),
            "abs" => Some(Function::Abs),
            "sqrt" => Some(Function::Sqrt),
            "cos" => Some(Function::Cos),
            "sin" => Some(Function::Sin),
            "tan" => Some(Function::Tan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    /// Scalar resolved to the parameter's current value
    Parameter(String),
    /// Array resolved to a 2D slice or the 3D volume of the map
    Map(String),
    Neg(Box<Expr>),
    Call(Function, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledEquation {
    source: String,
    expr: Expr,
    dependencies: Vec<String>,
}

impl CompiledEquation {
    /// Compile `source` for the image type `image_type`.
    ///
    /// Symbols are matched on whole identifiers against `parameters` first,
    /// then `maps`. The quantitative maps referenced are recorded in the order
    /// they first appear.
    ///
    /// # Errors
    ///
    /// Returns an [`EquationError`] naming `image_type` if the parentheses do
    /// not balance, a symbol is unknown, the text does not parse, or no map is
    /// referenced.
    pub fn compile(
        image_type: &str,
        source: &str,
        parameters: &[&str],
        maps: &[&str],
    ) -> Result<Self, EquationError> {
        if source.matches('(').count() != source.matches(')').count() {
            return Err(EquationError::UnbalancedParentheses {
                image_type: image_type.to_string(),
            });
        }

        let tokens = lexer::tokenize(source).map_err(|err| match err {
            LexError::UnexpectedCharacter { found, position } => {
                EquationError::UnexpectedCharacter {
                    image_type: image_type.to_string(),
                    found,
                    position,
                }
            }
            LexError::InvalidNumber { text, position } => EquationError::InvalidNumber {
                image_type: image_type.to_string(),
                text,
                position,
            },
        })?;

        let (expr, dependencies) = Parser::new(image_type, &tokens, parameters, maps).parse()?;
        if dependencies.is_empty() {
            return Err(EquationError::NoMapReference {
                image_type: image_type.to_string(),
            });
        }

        Ok(Self {
            source: source.to_string(),
            expr,
            dependencies,
        })
    }

    /// The equation text as written in configuration
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Quantitative maps the equation reads, in first-seen order
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn evaluate(&self, bindings: &Bindings<'_>) -> Result<Evaluation, EvalError> {
        eval::evaluate(&self.expr, bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn, array};
    use proptest::prelude::*;

    const MAPS: [&str; 3] = ["T1", "T2", "PD"];

    fn scalar(result: Evaluation) -> f64 {
        match result {
            Evaluation::Scalar(value) => value,
            Evaluation::Array(array) => panic!("expected scalar, got {array:?}"),
        }
    }

    fn as_array(result: Evaluation) -> ArrayD<f32> {
        match result {
            Evaluation::Array(array) => array,
            Evaluation::Scalar(value) => panic!("expected array, got {value}"),
        }
    }

    #[test]
    fn extracts_exact_dependencies() {
        let equation = CompiledEquation::compile(
            "T2w",
            "offset + scale*exp(-TE/T2)",
            &["TE", "offset", "scale"],
            &MAPS,
        )
        .unwrap();
        assert_eq!(equation.dependencies(), ["T2".to_string()]);
    }

    #[test]
    fn dependencies_follow_first_use() {
        let equation = CompiledEquation::compile(
            "FLAIR",
            "abs(PD)*exp(-T1SAT/T1)*exp(-TE/T2)*(1-2*exp(-TI/T1))",
            &["TE", "TI", "T1SAT"],
            &MAPS,
        )
        .unwrap();
        assert_eq!(equation.dependencies(), ["PD", "T1", "T2"]);
    }

    #[test]
    fn prefix_names_do_not_collide() {
        let equation =
            CompiledEquation::compile("X", "T10 * T1", &["T10"], &["T1", "T2"]).unwrap();
        assert_eq!(equation.dependencies(), ["T1".to_string()]);
        assert_eq!(
            equation.expr(),
            &Expr::Binary(
                BinaryOp::Mul,
                Box::new(Expr::Parameter("T10".into())),
                Box::new(Expr::Map("T1".into())),
            )
        );
    }

    #[test]
    fn unbalanced_parentheses_name_the_type() {
        let err = CompiledEquation::compile("GRE - 3T", "exp(-TR/T1", &["TR"], &MAPS).unwrap_err();
        assert_eq!(
            err,
            EquationError::UnbalancedParentheses {
                image_type: "GRE - 3T".into()
            }
        );
        assert_eq!(err.image_type(), "GRE - 3T");
    }

    #[test]
    fn unknown_symbols_are_rejected() {
        let err = CompiledEquation::compile("FSE", "PD*exp(-TE/T3)", &["TE"], &MAPS).unwrap_err();
        assert_eq!(
            err,
            EquationError::UnknownSymbol {
                image_type: "FSE".into(),
                symbol: "T3".into()
            }
        );
    }

    #[test]
    fn functions_need_call_syntax() {
        let err = CompiledEquation::compile("X", "exp * T1", &[], &MAPS).unwrap_err();
        assert!(matches!(err, EquationError::UnknownSymbol { symbol, .. } if symbol == "exp"));
    }

    #[test]
    fn general_code_is_not_accepted() {
        let err = CompiledEquation::compile("X", "__import__(T1)", &[], &MAPS).unwrap_err();
        assert!(matches!(err, EquationError::UnknownSymbol { .. }));
        let err = CompiledEquation::compile("X", "T1; T2", &[], &MAPS).unwrap_err();
        assert!(matches!(err, EquationError::UnexpectedCharacter { found: ';', .. }));
    }

    #[test]
    fn trailing_and_missing_operands_fail() {
        assert!(matches!(
            CompiledEquation::compile("X", "T1 *", &[], &MAPS),
            Err(EquationError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            CompiledEquation::compile("X", "T1 T2", &[], &MAPS),
            Err(EquationError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            CompiledEquation::compile("X", ")T1(", &[], &MAPS),
            Err(EquationError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn equations_without_maps_are_rejected() {
        assert!(matches!(
            CompiledEquation::compile("X", "1 + TE", &["TE"], &MAPS),
            Err(EquationError::NoMapReference { .. })
        ));
    }

    #[test]
    fn precedence_and_unary_minus() {
        let equation = CompiledEquation::compile("X", "1 - 2 * 3 + -T1 / 2", &[], &MAPS).unwrap();
        let t1 = array![4.0_f32].into_dyn();
        let bindings = Bindings::new().map("T1", t1.view());
        let result = as_array(equation.evaluate(&bindings).unwrap());
        assert_eq!(result, array![-7.0_f32].into_dyn());
    }

    #[test]
    fn pi_and_functions_evaluate() {
        let equation =
            CompiledEquation::compile("X", "cos(Pi) + sqrt(abs(TE)) + 0*T1", &["TE"], &MAPS)
                .unwrap();
        let t1 = ArrayD::<f32>::zeros(IxDyn(&[2]));
        let bindings = Bindings::new().parameter("TE", -16.0).map("T1", t1.view());
        let result = as_array(equation.evaluate(&bindings).unwrap());
        assert!(result.iter().all(|&v| (v - 3.0).abs() < 1e-6));
    }

    #[test]
    fn parameters_only_subtree_stays_scalar() {
        let equation = CompiledEquation::compile("X", "(TE + 1) * 2 + 0 * T1", &["TE"], &MAPS)
            .unwrap();
        let Expr::Binary(_, lhs, _) = equation.expr() else {
            panic!("expected binary root");
        };
        let bindings = Bindings::new().parameter("TE", 3.0);
        assert_eq!(scalar(eval::evaluate(lhs, &bindings).unwrap()), 8.0);
    }

    #[test]
    fn division_by_zero_propagates_non_finite_values() {
        let equation = CompiledEquation::compile("X", "TE / T2", &["TE"], &MAPS).unwrap();
        let t2 = array![0.0_f32, 2.0].into_dyn();
        let bindings = Bindings::new().parameter("TE", 4.0).map("T2", t2.view());
        let result = as_array(equation.evaluate(&bindings).unwrap());
        assert!(result[0].is_infinite());
        assert_eq!(result[1], 2.0);

        let equation = CompiledEquation::compile("X", "T2 / T2", &[], &MAPS).unwrap();
        let bindings = Bindings::new().map("T2", t2.view());
        let result = as_array(equation.evaluate(&bindings).unwrap());
        assert!(result[0].is_nan());
    }

    #[test]
    fn arrays_broadcast_against_each_other() {
        let equation = CompiledEquation::compile("X", "T1 + T2", &[], &MAPS).unwrap();
        let t1 = array![[1.0_f32, 2.0], [3.0, 4.0]].into_dyn();
        let t2 = array![10.0_f32, 20.0].into_dyn();
        let bindings = Bindings::new().map("T1", t1.view()).map("T2", t2.view());
        let result = as_array(equation.evaluate(&bindings).unwrap());
        assert_eq!(result, array![[11.0_f32, 22.0], [13.0, 24.0]].into_dyn());
    }

    #[test]
    fn incompatible_shapes_are_reported() {
        let equation = CompiledEquation::compile("X", "T1 * T2", &[], &MAPS).unwrap();
        let t1 = ArrayD::<f32>::zeros(IxDyn(&[2, 3]));
        let t2 = ArrayD::<f32>::zeros(IxDyn(&[4, 5]));
        let bindings = Bindings::new().map("T1", t1.view()).map("T2", t2.view());
        assert_eq!(
            equation.evaluate(&bindings),
            Err(EvalError::ShapeMismatch {
                left: vec![2, 3],
                right: vec![4, 5]
            })
        );
    }

    #[test]
    fn missing_bindings_are_reported() {
        let equation = CompiledEquation::compile("X", "TE * T1", &["TE"], &MAPS).unwrap();
        let t1 = ArrayD::<f32>::zeros(IxDyn(&[1]));
        assert_eq!(
            equation.evaluate(&Bindings::new().map("T1", t1.view())),
            Err(EvalError::UnboundParameter("TE".into()))
        );
        assert_eq!(
            equation.evaluate(&Bindings::new().parameter("TE", 1.0)),
            Err(EvalError::UnboundMap("T1".into()))
        );
    }

    proptest! {
        #[test]
        fn compilation_is_deterministic(
            te in 1.0f64..200.0,
            t2 in proptest::collection::vec(1.0f32..3000.0, 1..16),
        ) {
            let source = "abs(PD)*exp(-TE/T2) + sin(TE)/T2";
            let a = CompiledEquation::compile("X", source, &["TE"], &MAPS).unwrap();
            let b = CompiledEquation::compile("X", source, &["TE"], &MAPS).unwrap();
            prop_assert_eq!(&a, &b);

            let t2 = ArrayD::from_shape_vec(IxDyn(&[t2.len()]), t2).unwrap();
            let pd = t2.mapv(|v| v / 3.0);
            let bindings = Bindings::new()
                .parameter("TE", te)
                .map("T2", t2.view())
                .map("PD", pd.view());
            prop_assert_eq!(a.evaluate(&bindings), b.evaluate(&bindings));
        }
    }
}
