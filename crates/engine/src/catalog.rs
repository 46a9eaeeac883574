//! Utility function catalog
//!
//! The eight normalization methods, their parameters and defaults. The
//! method order is part of the public interface: positional indices are
//! accepted wherever a method name is.

use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, Result};

/// Normalization method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UtilityKind {
    MinMax,
    MaxMin,
    BiPiecewiseLinear,
    BiPiecewiseLinearPercent,
    StepUp,
    StepUpPercent,
    StepDown,
    StepDownPercent,
}

impl UtilityKind {
    /// All methods in catalog order
    pub const ALL: [UtilityKind; 8] = [
        UtilityKind::MinMax,
        UtilityKind::MaxMin,
        UtilityKind::BiPiecewiseLinear,
        UtilityKind::BiPiecewiseLinearPercent,
        UtilityKind::StepUp,
        UtilityKind::StepUpPercent,
        UtilityKind::StepDown,
        UtilityKind::StepDownPercent,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            UtilityKind::MinMax => "minmax",
            UtilityKind::MaxMin => "maxmin",
            UtilityKind::BiPiecewiseLinear => "bipiecewiselinear",
            UtilityKind::BiPiecewiseLinearPercent => "bipiecewiselinear_percent",
            UtilityKind::StepUp => "stepup",
            UtilityKind::StepUpPercent => "stepup_percent",
            UtilityKind::StepDown => "stepdown",
            UtilityKind::StepDownPercent => "stepdown_percent",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            UtilityKind::MinMax => "min-max",
            UtilityKind::MaxMin => "max-min",
            UtilityKind::BiPiecewiseLinear => "bi-piecewise-linear values",
            UtilityKind::BiPiecewiseLinearPercent => "bi-piecewise-linear percentages",
            UtilityKind::StepUp => "step up value",
            UtilityKind::StepUpPercent => "step up percentage",
            UtilityKind::StepDown => "step down value",
            UtilityKind::StepDownPercent => "step down percentage",
        }
    }

    /// Position in the catalog
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|k| k == self).unwrap_or_default()
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Number of user parameters
    pub fn numvars(&self) -> usize {
        self.param_names().len()
    }

    /// Parameter names, in the order values are given on the command line
    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            UtilityKind::MinMax | UtilityKind::MaxMin => &[],
            UtilityKind::BiPiecewiseLinear | UtilityKind::BiPiecewiseLinearPercent => &["a", "b"],
            _ => &["threshold"],
        }
    }

    /// Parameters are percentages of the data range rather than data values.
    ///
    /// Ranges of these parameters stay at 0..100 whatever the data.
    pub fn is_percent(&self) -> bool {
        matches!(
            self,
            UtilityKind::BiPiecewiseLinearPercent
                | UtilityKind::StepUpPercent
                | UtilityKind::StepDownPercent
        )
    }

    /// The expression depends on the input's min/max
    pub fn needs_data_range(&self) -> bool {
        matches!(self, UtilityKind::MinMax | UtilityKind::MaxMin) || self.is_percent()
    }

    /// Default parameter state
    fn default_params(&self) -> UtilityParams {
        match self {
            UtilityKind::MinMax | UtilityKind::MaxMin => UtilityParams::None,
            UtilityKind::BiPiecewiseLinear => UtilityParams::Bounds {
                a: ParamRange::with_value(50.0),
                b: ParamRange::with_value(50.0),
            },
            UtilityKind::BiPiecewiseLinearPercent => UtilityParams::Bounds {
                a: ParamRange::with_value(10.0),
                b: ParamRange::with_value(50.0),
            },
            _ => UtilityParams::Threshold(ParamRange::default()),
        }
    }
}

impl fmt::Display for UtilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UtilityKind {
    type Err = EngineError;

    /// Accepts a method name or its catalog index
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(kind) = Self::ALL.iter().find(|k| k.name().eq_ignore_ascii_case(s)) {
            return Ok(*kind);
        }
        s.parse::<usize>()
            .ok()
            .and_then(Self::from_index)
            .ok_or_else(|| EngineError::UnknownFunction(s.to_string()))
    }
}

/// A parameter's allowed range and its current value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub value: f64,
}

impl Default for ParamRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 100.0,
            value: 50.0,
        }
    }
}

impl ParamRange {
    pub fn new(min: f64, max: f64, value: f64) -> Self {
        let mut p = Self { min, max, value };
        p.clamp_value();
        p
    }

    fn with_value(value: f64) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    /// Move the range, keeping the value inside it
    pub fn set_range(&mut self, min: f64, max: f64) {
        self.min = min;
        self.max = max;
        self.clamp_value();
    }

    /// Set the value, clamped into the range. Returns the stored value.
    pub fn set_value(&mut self, value: f64) -> f64 {
        self.value = value;
        self.clamp_value();
        self.value
    }

    fn clamp_value(&mut self) {
        if self.min <= self.max {
            self.value = self.value.clamp(self.min, self.max);
        }
    }
}

/// Live parameter state of one utility function
#[derive(Debug, Clone, PartialEq)]
pub enum UtilityParams {
    None,
    Threshold(ParamRange),
    Bounds { a: ParamRange, b: ParamRange },
}

impl UtilityParams {
    /// Parameters in order
    pub fn ranges(&self) -> Vec<&ParamRange> {
        match self {
            UtilityParams::None => vec![],
            UtilityParams::Threshold(t) => vec![t],
            UtilityParams::Bounds { a, b } => vec![a, b],
        }
    }

    pub fn ranges_mut(&mut self) -> Vec<&mut ParamRange> {
        match self {
            UtilityParams::None => vec![],
            UtilityParams::Threshold(t) => vec![t],
            UtilityParams::Bounds { a, b } => vec![a, b],
        }
    }

    pub fn values(&self) -> Vec<f64> {
        self.ranges().iter().map(|p| p.value).collect()
    }

    /// Current values as builder arguments
    pub fn args(&self) -> MethodArgs {
        match self {
            UtilityParams::None => MethodArgs::None,
            UtilityParams::Threshold(t) => MethodArgs::Threshold(t.value),
            UtilityParams::Bounds { a, b } => MethodArgs::Bounds {
                a: a.value,
                b: b.value,
            },
        }
    }
}

/// Resolved numeric arguments of a method
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MethodArgs {
    None,
    Threshold(f64),
    Bounds { a: f64, b: f64 },
}

impl MethodArgs {
    /// Arguments for `kind` from positional values
    pub fn from_values(kind: UtilityKind, values: &[f64]) -> Result<Self> {
        if values.len() != kind.numvars() {
            return Err(EngineError::ArgumentCount {
                method: kind.name().to_string(),
                expected: kind.numvars(),
                got: values.len(),
            });
        }
        Ok(match values {
            [] => MethodArgs::None,
            [t] => MethodArgs::Threshold(*t),
            [a, b, ..] => MethodArgs::Bounds { a: *a, b: *b },
        })
    }

    pub fn values(&self) -> Vec<f64> {
        match *self {
            MethodArgs::None => vec![],
            MethodArgs::Threshold(t) => vec![t],
            MethodArgs::Bounds { a, b } => vec![a, b],
        }
    }

    /// Values joined by spaces, as shown in descriptions
    pub fn values_string(&self) -> String {
        self.values()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A catalog entry with its own parameter state
#[derive(Debug, Clone, PartialEq)]
pub struct UtilityFunction {
    pub kind: UtilityKind,
    pub params: UtilityParams,
}

impl UtilityFunction {
    pub fn new(kind: UtilityKind) -> Self {
        Self {
            kind,
            params: kind.default_params(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn numvars(&self) -> usize {
        self.kind.numvars()
    }

    /// Parameter by name
    pub fn param(&self, name: &str) -> Option<&ParamRange> {
        let idx = self.kind.param_names().iter().position(|n| *n == name)?;
        self.params.ranges().into_iter().nth(idx)
    }

    pub fn param_mut(&mut self, name: &str) -> Option<&mut ParamRange> {
        let idx = self.kind.param_names().iter().position(|n| *n == name)?;
        self.params.ranges_mut().into_iter().nth(idx)
    }

    pub fn args(&self) -> MethodArgs {
        self.params.args()
    }
}

/// Fresh copy of the whole catalog, in order
pub fn all() -> Vec<UtilityFunction> {
    UtilityKind::ALL.iter().map(|&k| UtilityFunction::new(k)).collect()
}

/// Method names in catalog order
pub fn names() -> [&'static str; 8] {
    UtilityKind::ALL.map(|k| k.name())
}

/// Catalog entry by name
pub fn get(name: &str) -> Result<UtilityFunction> {
    UtilityKind::ALL
        .iter()
        .find(|k| k.name() == name)
        .map(|&k| UtilityFunction::new(k))
        .ok_or_else(|| EngineError::UnknownFunction(name.to_string()))
}

/// Catalog entry by position
pub fn by_index(index: usize) -> Result<UtilityFunction> {
    UtilityKind::from_index(index)
        .map(UtilityFunction::new)
        .ok_or_else(|| EngineError::UnknownFunction(index.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_order_is_fixed() {
        assert_eq!(
            names(),
            [
                "minmax",
                "maxmin",
                "bipiecewiselinear",
                "bipiecewiselinear_percent",
                "stepup",
                "stepup_percent",
                "stepdown",
                "stepdown_percent",
            ]
        );
        for (i, kind) in UtilityKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(by_index(i).unwrap().kind, *kind);
        }
    }

    #[test]
    fn test_get_unknown() {
        assert!(matches!(get("sigmoid"), Err(EngineError::UnknownFunction(_))));
        assert!(by_index(8).is_err());
    }

    #[test]
    fn test_arity() {
        assert_eq!(get("minmax").unwrap().numvars(), 0);
        assert_eq!(get("stepdown_percent").unwrap().numvars(), 1);
        assert_eq!(get("bipiecewiselinear").unwrap().numvars(), 2);
        assert!(UtilityKind::StepUpPercent.needs_data_range());
        assert!(!UtilityKind::StepUp.needs_data_range());
    }

    #[test]
    fn test_parse_by_name_or_index() {
        assert_eq!("stepup".parse::<UtilityKind>().unwrap(), UtilityKind::StepUp);
        assert_eq!("3".parse::<UtilityKind>().unwrap(), UtilityKind::BiPiecewiseLinearPercent);
        assert!("12".parse::<UtilityKind>().is_err());
    }

    #[test]
    fn test_param_range_clamps() {
        let mut p = ParamRange::default();
        p.set_range(60.0, 80.0);
        assert_eq!(p.value, 60.0);
        assert_eq!(p.set_value(95.0), 80.0);
    }

    #[test]
    fn test_args_from_values() {
        assert_eq!(
            MethodArgs::from_values(UtilityKind::BiPiecewiseLinear, &[20.0, 80.0]).unwrap(),
            MethodArgs::Bounds { a: 20.0, b: 80.0 }
        );
        let err = MethodArgs::from_values(UtilityKind::StepUp, &[]).unwrap_err();
        assert!(matches!(err, EngineError::ArgumentCount { expected: 1, got: 0, .. }));
    }

    #[test]
    fn test_copies_are_independent() {
        let mut first = all();
        let second = all();
        if let Some(t) = first[4].param_mut("threshold") {
            t.set_value(7.0);
        }
        assert_eq!(first[4].param("threshold").unwrap().value, 7.0);
        assert_eq!(second[4].param("threshold").unwrap().value, 50.0);
        assert_eq!(get("stepup").unwrap().param("threshold").unwrap().value, 50.0);
    }
}
