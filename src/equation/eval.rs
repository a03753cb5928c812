use ndarray::{ArrayD, ArrayViewD, IxDyn, Zip};
use std::collections::HashMap;
use thiserror::Error;

use super::{BinaryOp, Expr, Function};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("no value bound for scanner parameter `{0}`")]
    UnboundParameter(String),

    #[error("no array bound for quantitative map `{0}`")]
    UnboundMap(String),

    #[error("cannot combine arrays of shape {left:?} and {right:?}")]
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },
}

/// Values an equation is evaluated against
#[derive(Default)]
pub struct Bindings<'a> {
    parameters: HashMap<&'a str, f64>,
    maps: HashMap<&'a str, ArrayViewD<'a, f32>>,
}

impl<'a> Bindings<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameter(mut self, name: &'a str, value: f64) -> Self {
        self.parameters.insert(name, value);
        self
    }

    pub fn map(mut self, name: &'a str, data: ArrayViewD<'a, f32>) -> Self {
        self.maps.insert(name, data);
        self
    }

    pub fn insert_parameter(&mut self, name: &'a str, value: f64) {
        self.parameters.insert(name, value);
    }

    pub fn insert_map(&mut self, name: &'a str, data: ArrayViewD<'a, f32>) {
        self.maps.insert(name, data);
    }
}

/// Result of evaluating an equation
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Scalar(f64),
    Array(ArrayD<f32>),
}

impl Evaluation {
    /// Materialize as an array of the given shape, broadcasting a scalar
    pub fn into_array(self, shape: &[usize]) -> ArrayD<f32> {
        match self {
            Evaluation::Scalar(value) => ArrayD::from_elem(IxDyn(shape), value as f32),
            Evaluation::Array(array) => array,
        }
    }
}

enum Operand<'v> {
    Scalar(f64),
    View(ArrayViewD<'v, f32>),
    Owned(ArrayD<f32>),
}

impl Operand<'_> {
    fn into_evaluation(self) -> Evaluation {
        match self {
            Operand::Scalar(value) => Evaluation::Scalar(value),
            Operand::View(view) => Evaluation::Array(view.to_owned()),
            Operand::Owned(array) => Evaluation::Array(array),
        }
    }
}

pub(crate) fn evaluate(expr: &Expr, bindings: &Bindings<'_>) -> Result<Evaluation, EvalError> {
    eval_node(expr, bindings).map(Operand::into_evaluation)
}

fn eval_node<'v>(expr: &Expr, bindings: &'v Bindings<'_>) -> Result<Operand<'v>, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(Operand::Scalar(*value)),
        Expr::Parameter(name) => bindings
            .parameters
            .get(name.as_str())
            .copied()
            .map(Operand::Scalar)
            .ok_or_else(|| EvalError::UnboundParameter(name.clone())),
        Expr::Map(name) => bindings
            .maps
            .get(name.as_str())
            .map(|view| Operand::View(view.view()))
            .ok_or_else(|| EvalError::UnboundMap(name.clone())),
        Expr::Neg(inner) => Ok(unary(eval_node(inner, bindings)?, |x| -x)),
        Expr::Call(function, argument) => {
            let function = *function;
            Ok(unary(eval_node(argument, bindings)?, move |x| {
                function.apply(x)
            }))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval_node(lhs, bindings)?;
            let rhs = eval_node(rhs, bindings)?;
            binary(*op, lhs, rhs)
        }
    }
}

fn unary<'v>(operand: Operand<'v>, f: impl Fn(f64) -> f64 + Sync + Send) -> Operand<'v> {
    match operand {
        Operand::Scalar(value) => Operand::Scalar(f(value)),
        Operand::View(view) => {
            Operand::Owned(Zip::from(&view).par_map_collect(|&x| f(x as f64) as f32))
        }
        Operand::Owned(mut array) => {
            array.par_mapv_inplace(|x| f(x as f64) as f32);
            Operand::Owned(array)
        }
    }
}

fn binary<'v>(op: BinaryOp, lhs: Operand<'v>, rhs: Operand<'v>) -> Result<Operand<'v>, EvalError> {
    let result = match (lhs, rhs) {
        (Operand::Scalar(a), Operand::Scalar(b)) => Operand::Scalar(op.apply(a, b)),
        (Operand::Scalar(a), array) => unary(array, move |x| op.apply(a, x)),
        (array, Operand::Scalar(b)) => unary(array, move |x| op.apply(x, b)),
        (lhs, rhs) => {
            let lhs = as_view(&lhs);
            let rhs = as_view(&rhs);
            Operand::Owned(zip_arrays(op, lhs, rhs)?)
        }
    };
    Ok(result)
}

fn as_view<'s>(operand: &'s Operand<'_>) -> ArrayViewD<'s, f32> {
    match operand {
        Operand::View(view) => view.view(),
        Operand::Owned(array) => array.view(),
        Operand::Scalar(_) => unreachable!("scalars are handled before array zipping"),
    }
}

// element-wise with standard broadcasting of either side
fn zip_arrays(
    op: BinaryOp,
    lhs: ArrayViewD<'_, f32>,
    rhs: ArrayViewD<'_, f32>,
) -> Result<ArrayD<f32>, EvalError> {
    let combine = move |&a: &f32, &b: &f32| op.apply(a as f64, b as f64) as f32;

    if lhs.shape() == rhs.shape() {
        return Ok(Zip::from(&lhs).and(&rhs).par_map_collect(combine));
    }
    if let Some(rhs) = rhs.broadcast(lhs.raw_dim()) {
        return Ok(Zip::from(&lhs).and(&rhs).par_map_collect(combine));
    }
    if let Some(lhs) = lhs.broadcast(rhs.raw_dim()) {
        return Ok(Zip::from(&lhs).and(&rhs).par_map_collect(combine));
    }
    Err(EvalError::ShapeMismatch {
        left: lhs.shape().to_vec(),
        right: rhs.shape().to_vec(),
    })
}

impl BinaryOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }
}

impl Function {
    fn apply(self, x: f64) -> f64 {
        match self {
            Function::Exp => x.exp(),
            Function::Abs => x.abs(),
            Function::Sqrt => x.sqrt(),
            Function::Cos => x.cos(),
            Function::Sin => x.sin(),
            Function::Tan => x.tan(),
        }
    }
}
