//! Per-pixel raster algebra
//!
//! Normalization methods and the weighted sum are built as small expression
//! trees over input bands. Bands are named by single letters, `A`–`Z` then
//! `a`–`z`, which bounds an expression to 52 inputs.
//!
//! ```text
//! minmax            (A-min)/(max-min)
//! stepup            A>=threshold ? 1 : 0
//! bipiecewiselinear clamp((A-a)/(b-a), 0, 1)
//! weighted sum      0.4*A+0.6*B
//! ```

use ndarray::{Array2, ArrayView2};
use std::fmt;

use crate::catalog::{MethodArgs, UtilityKind};
use crate::error::{EngineError, Result};
use crate::maybe_rayon::*;

/// Maximum number of bands in one expression
pub const MAX_INPUTS: usize = 52;

/// Letter naming band `index`
pub fn band_symbol(index: usize) -> Option<char> {
    match index {
        0..=25 => Some((b'A' + index as u8) as char),
        26..=51 => Some((b'a' + (index - 26) as u8) as char),
        _ => None,
    }
}

/// Observed value range of an input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataRange {
    pub min: f64,
    pub max: f64,
}

impl DataRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// One percent of the range
    pub fn percent(&self) -> f64 {
        (self.max - self.min) / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn symbol(&self) -> char {
        match self {
            BinOp::Add => '+',
            BinOp::Sub => '-',
            BinOp::Mul => '*',
            BinOp::Div => '/',
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            BinOp::Add | BinOp::Sub => 1,
            BinOp::Mul | BinOp::Div => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Ge,
    Lt,
}

/// Expression tree over numbered bands
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Band(usize),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `1` where the comparison holds, `0` elsewhere
    Step {
        op: CmpOp,
        value: Box<Expr>,
        threshold: Box<Expr>,
    },
    Clamp {
        inner: Box<Expr>,
        lo: f64,
        hi: f64,
    },
}

impl Expr {
    fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn add(left: Expr, right: Expr) -> Expr {
        Self::binary(BinOp::Add, left, right)
    }

    pub fn sub(left: Expr, right: Expr) -> Expr {
        Self::binary(BinOp::Sub, left, right)
    }

    pub fn mul(left: Expr, right: Expr) -> Expr {
        Self::binary(BinOp::Mul, left, right)
    }

    pub fn div(left: Expr, right: Expr) -> Expr {
        Self::binary(BinOp::Div, left, right)
    }

    pub fn step(op: CmpOp, value: Expr, threshold: Expr) -> Expr {
        Expr::Step {
            op,
            value: Box::new(value),
            threshold: Box::new(threshold),
        }
    }

    pub fn clamp(inner: Expr, lo: f64, hi: f64) -> Expr {
        Expr::Clamp {
            inner: Box::new(inner),
            lo,
            hi,
        }
    }

    /// Evaluate for one pixel. `bands[i]` is the value of band `i`;
    /// missing bands and division by zero give NaN.
    pub fn eval(&self, bands: &[f64]) -> f64 {
        match self {
            Expr::Num(n) => *n,
            Expr::Band(i) => bands.get(*i).copied().unwrap_or(f64::NAN),
            Expr::Binary { op, left, right } => {
                let l = left.eval(bands);
                let r = right.eval(bands);
                match op {
                    BinOp::Add => l + r,
                    BinOp::Sub => l - r,
                    BinOp::Mul => l * r,
                    BinOp::Div => {
                        if r == 0.0 {
                            f64::NAN
                        } else {
                            l / r
                        }
                    }
                }
            }
            Expr::Step {
                op,
                value,
                threshold,
            } => {
                let v = value.eval(bands);
                let t = threshold.eval(bands);
                if v.is_nan() || t.is_nan() {
                    return f64::NAN;
                }
                let hit = match op {
                    CmpOp::Ge => v >= t,
                    CmpOp::Lt => v < t,
                };
                if hit {
                    1.0
                } else {
                    0.0
                }
            }
            Expr::Clamp { inner, lo, hi } => {
                let v = inner.eval(bands);
                if v.is_nan() {
                    v
                } else {
                    v.max(*lo).min(*hi)
                }
            }
        }
    }

    /// Number of bands the expression needs (highest index + 1)
    pub fn band_count(&self) -> usize {
        match self {
            Expr::Num(_) => 0,
            Expr::Band(i) => i + 1,
            Expr::Binary { left, right, .. } => left.band_count().max(right.band_count()),
            Expr::Step {
                value, threshold, ..
            } => value.band_count().max(threshold.band_count()),
            Expr::Clamp { inner, .. } => inner.band_count(),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Step { .. } => 0,
            _ => 3,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, parent: u8, right_side: bool) -> fmt::Result {
        let prec = self.precedence();
        let needs_parens = prec < parent || (right_side && prec == parent && prec < 3);
        if needs_parens {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(n) => write!(f, "{}", n),
            Expr::Band(i) => match band_symbol(*i) {
                Some(c) => write!(f, "{}", c),
                None => write!(f, "band{}", i),
            },
            Expr::Binary { op, left, right } => {
                let prec = op.precedence();
                left.fmt_child(f, prec, false)?;
                write!(f, "{}", op.symbol())?;
                // a-(b-c) and a/(b*c) keep their parentheses
                let strict = matches!(op, BinOp::Sub | BinOp::Div);
                right.fmt_child(f, prec, strict)
            }
            Expr::Step {
                op,
                value,
                threshold,
            } => {
                let cmp = match op {
                    CmpOp::Ge => ">=",
                    CmpOp::Lt => "<",
                };
                write!(f, "{}{}{} ? 1 : 0", value, cmp, threshold)
            }
            Expr::Clamp { inner, lo, hi } => write!(f, "clamp({}, {}, {})", inner, lo, hi),
        }
    }
}

fn degenerate(kind: UtilityKind, reason: impl Into<String>) -> EngineError {
    EngineError::DegenerateParameters {
        method: kind.name().to_string(),
        reason: reason.into(),
    }
}

/// Check arguments that can be rejected without looking at any data
pub fn check_args(kind: UtilityKind, args: &MethodArgs) -> Result<()> {
    if args.values().len() != kind.numvars() {
        return Err(EngineError::ArgumentCount {
            method: kind.name().to_string(),
            expected: kind.numvars(),
            got: args.values().len(),
        });
    }
    if let MethodArgs::Bounds { a, b } = *args {
        if a == b {
            return Err(degenerate(kind, format!("a == b ({})", a)));
        }
    }
    if args.values().iter().any(|v| !v.is_finite()) {
        return Err(degenerate(kind, "parameters must be finite"));
    }
    Ok(())
}

/// Build the normalization expression of `kind` over band `A`.
///
/// `range` is required by methods that use the input's min/max; percent
/// methods scale their parameters by `r = (max - min) / 100`.
pub fn build(kind: UtilityKind, args: &MethodArgs, range: Option<DataRange>) -> Result<Expr> {
    check_args(kind, args)?;

    let range = if kind.needs_data_range() {
        let range = range.ok_or_else(|| EngineError::MissingDataRange {
            method: kind.name().to_string(),
        })?;
        if !(range.min.is_finite() && range.max.is_finite()) {
            return Err(degenerate(kind, "data range is not finite"));
        }
        if range.min == range.max {
            return Err(degenerate(kind, format!("min == max ({})", range.min)));
        }
        Some(range)
    } else {
        None
    };

    let a = || Expr::Band(0);
    let num = Expr::Num;
    // threshold * r, kept symbolic so the rendering shows both factors
    let scaled = |v: f64| match range {
        Some(rg) => Expr::mul(num(v), num(rg.percent())),
        None => num(v),
    };

    let expr = match (kind, *args, range) {
        (UtilityKind::MinMax, _, Some(rg)) => Expr::div(
            Expr::sub(a(), num(rg.min)),
            Expr::sub(num(rg.max), num(rg.min)),
        ),
        (UtilityKind::MaxMin, _, Some(rg)) => Expr::div(
            Expr::sub(a(), num(rg.max)),
            Expr::sub(num(rg.min), num(rg.max)),
        ),
        (UtilityKind::StepUp, MethodArgs::Threshold(t), _) => Expr::step(CmpOp::Ge, a(), num(t)),
        (UtilityKind::StepDown, MethodArgs::Threshold(t), _) => Expr::step(CmpOp::Lt, a(), num(t)),
        (UtilityKind::StepUpPercent, MethodArgs::Threshold(t), Some(_)) => {
            Expr::step(CmpOp::Ge, a(), scaled(t))
        }
        (UtilityKind::StepDownPercent, MethodArgs::Threshold(t), Some(_)) => {
            Expr::step(CmpOp::Lt, a(), scaled(t))
        }
        (UtilityKind::BiPiecewiseLinear, MethodArgs::Bounds { a: lo, b: hi }, _) => Expr::clamp(
            Expr::div(Expr::sub(a(), num(lo)), Expr::sub(num(hi), num(lo))),
            0.0,
            1.0,
        ),
        (UtilityKind::BiPiecewiseLinearPercent, MethodArgs::Bounds { a: lo, b: hi }, Some(_)) => {
            Expr::clamp(
                Expr::div(Expr::sub(a(), scaled(lo)), Expr::sub(scaled(hi), scaled(lo))),
                0.0,
                1.0,
            )
        }
        _ => {
            return Err(EngineError::ArgumentCount {
                method: kind.name().to_string(),
                expected: kind.numvars(),
                got: args.values().len(),
            })
        }
    };
    Ok(expr)
}

/// Weighted sum `Σ weight_i/100 * band_i`, weights given in percent
pub fn weighted_sum(weights: &[f64]) -> Result<Expr> {
    if weights.is_empty() {
        return Err(EngineError::NoViableLayers(
            "no rasters to combine".to_string(),
        ));
    }
    if weights.len() > MAX_INPUTS {
        return Err(EngineError::TooManyInputs {
            max: MAX_INPUTS,
            got: weights.len(),
        });
    }

    let mut terms = weights
        .iter()
        .enumerate()
        .map(|(i, w)| Expr::mul(Expr::Num(w / 100.0), Expr::Band(i)));
    let first = terms.next().ok_or_else(|| {
        EngineError::NoViableLayers("no rasters to combine".to_string())
    })?;
    Ok(terms.fold(first, Expr::add))
}

/// One input band of an evaluation
#[derive(Debug, Clone, Copy)]
pub struct BandInput<'a> {
    pub data: ArrayView2<'a, f64>,
    pub nodata: Option<f64>,
}

impl<'a> BandInput<'a> {
    pub fn new(data: ArrayView2<'a, f64>, nodata: Option<f64>) -> Self {
        Self { data, nodata }
    }

    fn is_nodata(&self, v: f64) -> bool {
        v.is_nan() || matches!(self.nodata, Some(nd) if (v - nd).abs() < f64::EPSILON)
    }
}

/// Evaluate `expr` cell by cell over same-shaped bands.
///
/// A cell is `out_nodata` when any input is no-data there or the result
/// is NaN.
pub fn evaluate(expr: &Expr, inputs: &[BandInput<'_>], out_nodata: f64) -> Result<Array2<f64>> {
    let needed = expr.band_count();
    if inputs.len() < needed {
        return Err(EngineError::ArgumentCount {
            method: expr.to_string(),
            expected: needed,
            got: inputs.len(),
        });
    }
    let Some(first) = inputs.first() else {
        return Err(EngineError::NoViableLayers("no input bands".to_string()));
    };
    let (rows, cols) = first.data.dim();
    for input in &inputs[1..] {
        let (ar, ac) = input.data.dim();
        if (ar, ac) != (rows, cols) {
            return Err(suitability_core::Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar,
                ac,
            }
            .into());
        }
    }

    let data: Vec<f64> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![out_nodata; cols];
            let mut values = vec![0.0; inputs.len()];
            'cells: for (col, out) in row_data.iter_mut().enumerate() {
                for (slot, input) in values.iter_mut().zip(inputs) {
                    let v = input.data[[row, col]];
                    if input.is_nodata(v) {
                        continue 'cells;
                    }
                    *slot = v;
                }
                let v = expr.eval(&values);
                if !v.is_nan() {
                    *out = v;
                }
            }
            row_data
        })
        .collect();

    Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| suitability_core::Error::Other(e.to_string()).into())
}
