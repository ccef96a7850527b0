use std::fmt::Debug;

use rand::Rng;
use rand_distr::Distribution as _;
use rand_pcg::Pcg64;
use statrs::distribution::Continuous;

use crate::error::NumericalError;
use crate::node::NodeId;
use crate::value::{Value, ValueType};

pub type LogLikelihood = f64;

/// A density over node values, parameterized by parent nodes.
///
/// Parameter values are handed over in the order of `parameters()`.
pub trait Distribution {
    fn name(&self) -> &'static str;
    fn parameters(&self) -> &[NodeId];
    fn parameters_mut(&mut self) -> &mut [NodeId];
    fn parameter_types(&self) -> Vec<ValueType>;
    fn value_type(&self) -> ValueType;
    fn log_density(&self, x: &Value, params: &[&Value]) -> Result<LogLikelihood, NumericalError>;
    fn sample(&self, params: &[&Value], g: &mut Pcg64) -> Result<Value, NumericalError>;
    fn clone_box(&self) -> Box<dyn Distribution>;

    fn log_density_ratio(
        &self,
        new: &Value,
        old: &Value,
        params: &[&Value],
    ) -> Result<LogLikelihood, NumericalError> {
        Ok(self.log_density(new, params)? - self.log_density(old, params)?)
    }
    /// Draws a fresh value, returning it together with the log ratio
    /// `ln p(old) - ln p(new)` that makes an independence proposal exact.
    fn resample(
        &self,
        old: &Value,
        params: &[&Value],
        g: &mut Pcg64,
    ) -> Result<(Value, LogLikelihood), NumericalError> {
        let new = self.sample(params, g)?;
        let ratio = self.log_density_ratio(old, &new, params)?;
        Ok((new, ratio))
    }
    fn swap_parameter(&mut self, old: NodeId, new: NodeId) -> bool {
        let mut found = false;
        for p in self.parameters_mut() {
            if *p == old {
                *p = new;
                found = true;
            }
        }
        found
    }
}
impl Debug for dyn Distribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Distribution<{}>{:?}", self.name(), self.parameters())
    }
}
impl Clone for Box<dyn Distribution> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

fn real(params: &[&Value], i: usize, name: &'static str) -> Result<f64, NumericalError> {
    params
        .get(i)
        .and_then(|v| v.as_real())
        .ok_or(NumericalError::WrongType(name))
}
fn invalid(name: &'static str, value: f64) -> NumericalError {
    NumericalError::InvalidParameter { name, value }
}
fn finite(name: &'static str, value: f64) -> Result<f64, NumericalError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid(name, value))
    }
}
fn positive(name: &'static str, value: f64) -> Result<f64, NumericalError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(invalid(name, value))
    }
}

/// `log_density` of `x`, with a NaN result reported as an error.
pub(crate) fn checked_log_density(
    distribution: &dyn Distribution,
    x: &Value,
    params: &[&Value],
) -> Result<LogLikelihood, NumericalError> {
    let ln_prob = distribution.log_density(x, params)?;
    if ln_prob.is_nan() {
        return Err(NumericalError::NotANumber);
    }
    Ok(ln_prob)
}

/// Exponential distribution with a rate parameter.
#[derive(Clone, Debug)]
pub struct Exponential {
    params: [NodeId; 1],
}
impl Exponential {
    pub fn new(rate: NodeId) -> Self {
        Self { params: [rate] }
    }
}
impl Distribution for Exponential {
    fn name(&self) -> &'static str {
        "exponential"
    }
    fn parameters(&self) -> &[NodeId] {
        &self.params
    }
    fn parameters_mut(&mut self) -> &mut [NodeId] {
        &mut self.params
    }
    fn parameter_types(&self) -> Vec<ValueType> {
        vec![ValueType::Real]
    }
    fn value_type(&self) -> ValueType {
        ValueType::Real
    }
    fn log_density(&self, x: &Value, params: &[&Value]) -> Result<LogLikelihood, NumericalError> {
        let rate = positive("rate", real(params, 0, "exponential")?)?;
        let x = x.as_real().ok_or(NumericalError::WrongType("exponential"))?;
        if x < 0.0 {
            return Err(NumericalError::OutOfSupport("exponential"));
        }
        let density = statrs::distribution::Exp::new(rate).map_err(|_| invalid("rate", rate))?;
        Ok(density.ln_pdf(x))
    }
    fn sample(&self, params: &[&Value], g: &mut Pcg64) -> Result<Value, NumericalError> {
        let rate = positive("rate", real(params, 0, "exponential")?)?;
        let sampler = rand_distr::Exp::new(rate).map_err(|_| invalid("rate", rate))?;
        Ok(Value::Real(sampler.sample(g)))
    }
    fn clone_box(&self) -> Box<dyn Distribution> {
        Box::new(self.clone())
    }
}

/// Normal distribution with mean and standard deviation.
#[derive(Clone, Debug)]
pub struct Normal {
    params: [NodeId; 2],
}
impl Normal {
    pub fn new(mean: NodeId, sd: NodeId) -> Self {
        Self { params: [mean, sd] }
    }
}
impl Distribution for Normal {
    fn name(&self) -> &'static str {
        "normal"
    }
    fn parameters(&self) -> &[NodeId] {
        &self.params
    }
    fn parameters_mut(&mut self) -> &mut [NodeId] {
        &mut self.params
    }
    fn parameter_types(&self) -> Vec<ValueType> {
        vec![ValueType::Real, ValueType::Real]
    }
    fn value_type(&self) -> ValueType {
        ValueType::Real
    }
    fn log_density(&self, x: &Value, params: &[&Value]) -> Result<LogLikelihood, NumericalError> {
        let mean = finite("mean", real(params, 0, "normal")?)?;
        let sd = positive("sd", real(params, 1, "normal")?)?;
        let x = x.as_real().ok_or(NumericalError::WrongType("normal"))?;
        let density = statrs::distribution::Normal::new(mean, sd).map_err(|_| invalid("sd", sd))?;
        Ok(density.ln_pdf(x))
    }
    fn sample(&self, params: &[&Value], g: &mut Pcg64) -> Result<Value, NumericalError> {
        let mean = finite("mean", real(params, 0, "normal")?)?;
        let sd = positive("sd", real(params, 1, "normal")?)?;
        let sampler = rand_distr::Normal::new(mean, sd).map_err(|_| invalid("sd", sd))?;
        Ok(Value::Real(sampler.sample(g)))
    }
    fn clone_box(&self) -> Box<dyn Distribution> {
        Box::new(self.clone())
    }
}

#[derive(Clone, Debug)]
pub struct Uniform {
    params: [NodeId; 2],
}
impl Uniform {
    pub fn new(lower: NodeId, upper: NodeId) -> Self {
        Self {
            params: [lower, upper],
        }
    }
}
impl Uniform {
    fn bounds(params: &[&Value]) -> Result<(f64, f64), NumericalError> {
        let lower = finite("lower", real(params, 0, "uniform")?)?;
        let upper = finite("upper", real(params, 1, "uniform")?)?;
        if upper <= lower {
            return Err(invalid("upper", upper));
        }
        Ok((lower, upper))
    }
}
impl Distribution for Uniform {
    fn name(&self) -> &'static str {
        "uniform"
    }
    fn parameters(&self) -> &[NodeId] {
        &self.params
    }
    fn parameters_mut(&mut self) -> &mut [NodeId] {
        &mut self.params
    }
    fn parameter_types(&self) -> Vec<ValueType> {
        vec![ValueType::Real, ValueType::Real]
    }
    fn value_type(&self) -> ValueType {
        ValueType::Real
    }
    fn log_density(&self, x: &Value, params: &[&Value]) -> Result<LogLikelihood, NumericalError> {
        let (lower, upper) = Self::bounds(params)?;
        let x = x.as_real().ok_or(NumericalError::WrongType("uniform"))?;
        if x >= lower && x <= upper {
            Ok(-(upper - lower).ln())
        } else {
            Err(NumericalError::OutOfSupport("uniform"))
        }
    }
    fn sample(&self, params: &[&Value], g: &mut Pcg64) -> Result<Value, NumericalError> {
        let (lower, upper) = Self::bounds(params)?;
        Ok(Value::Real(g.random_range(lower..upper)))
    }
    fn clone_box(&self) -> Box<dyn Distribution> {
        Box::new(self.clone())
    }
}

#[derive(Clone, Debug)]
pub struct Bernoulli {
    params: [NodeId; 1],
}
impl Bernoulli {
    pub fn new(p: NodeId) -> Self {
        Self { params: [p] }
    }
}
impl Bernoulli {
    fn probability(params: &[&Value]) -> Result<f64, NumericalError> {
        let p = real(params, 0, "bernoulli")?;
        if (0.0..=1.0).contains(&p) {
            Ok(p)
        } else {
            Err(invalid("p", p))
        }
    }
}
impl Distribution for Bernoulli {
    fn name(&self) -> &'static str {
        "bernoulli"
    }
    fn parameters(&self) -> &[NodeId] {
        &self.params
    }
    fn parameters_mut(&mut self) -> &mut [NodeId] {
        &mut self.params
    }
    fn parameter_types(&self) -> Vec<ValueType> {
        vec![ValueType::Real]
    }
    fn value_type(&self) -> ValueType {
        ValueType::Boolean
    }
    fn log_density(&self, x: &Value, params: &[&Value]) -> Result<LogLikelihood, NumericalError> {
        let p = Self::probability(params)?;
        let x = x.as_bool().ok_or(NumericalError::WrongType("bernoulli"))?;
        Ok(if x { p.ln() } else { (1.0 - p).ln() })
    }
    fn sample(&self, params: &[&Value], g: &mut Pcg64) -> Result<Value, NumericalError> {
        let p = Self::probability(params)?;
        Ok(Value::Boolean(g.random_bool(p)))
    }
    fn clone_box(&self) -> Box<dyn Distribution> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    fn id(i: u32) -> NodeId {
        NodeId::new(i)
    }

    #[test]
    fn exponential_density() {
        let d = Exponential::new(id(0));
        let ll = d.log_density(&Value::Real(1.5), &[&Value::Real(2.0)]).unwrap();
        assert!((ll - (2.0f64.ln() - 3.0)).abs() < 1e-12);
        assert!((ll + 2.306853).abs() < 1e-6);
        assert_eq!(
            d.log_density(&Value::Real(-1.0), &[&Value::Real(2.0)]),
            Err(NumericalError::OutOfSupport("exponential"))
        );
        assert!(d.log_density(&Value::Real(1.0), &[&Value::Real(-2.0)]).is_err());
    }

    #[test]
    fn normal_density() {
        let d = Normal::new(id(0), id(1));
        let ll = d
            .log_density(&Value::Real(0.0), &[&Value::Real(0.0), &Value::Real(1.0)])
            .unwrap();
        assert!((ll + 0.918938533).abs() < 1e-8);
        assert!(d
            .log_density(&Value::Real(0.0), &[&Value::Real(0.0), &Value::Real(0.0)])
            .is_err());
    }

    #[test]
    fn nan_densities_are_errors() {
        let d = Normal::new(id(0), id(1));
        let params = [&Value::Real(0.0), &Value::Real(1.0)];
        assert_eq!(
            checked_log_density(&d, &Value::Real(f64::NAN), &params),
            Err(NumericalError::NotANumber)
        );
        let ll = checked_log_density(&d, &Value::Real(0.0), &params).unwrap();
        assert!((ll + 0.918938533).abs() < 1e-8);
    }

    #[test]
    fn samplers_match_their_moments() {
        let mut g = Pcg64::seed_from_u64(11);
        let n = 20_000;
        let normal = Normal::new(id(0), id(1));
        let params = [&Value::Real(3.0), &Value::Real(2.0)];
        let xs: Vec<f64> = (0..n)
            .map(|_| normal.sample(&params, &mut g).unwrap().as_real().unwrap())
            .collect();
        let mean = xs.iter().sum::<f64>() / n as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 3.0).abs() < 0.1, "mean: {}", mean);
        assert!((var - 4.0).abs() < 0.3, "var: {}", var);

        let exp = Exponential::new(id(0));
        let rate = Value::Real(4.0);
        let mean = (0..n)
            .map(|_| exp.sample(&[&rate], &mut g).unwrap().as_real().unwrap())
            .sum::<f64>()
            / n as f64;
        assert!((mean - 0.25).abs() < 0.01, "mean: {}", mean);
        assert!(exp.sample(&[&Value::Real(0.0)], &mut g).is_err());
    }

    #[test]
    fn uniform_support() {
        let d = Uniform::new(id(0), id(1));
        let params = [&Value::Real(0.0), &Value::Real(4.0)];
        let ll = d.log_density(&Value::Real(1.0), &params).unwrap();
        assert!((ll + 4.0f64.ln()).abs() < 1e-12);
        assert!(d.log_density(&Value::Real(5.0), &params).is_err());
        let mut g = Pcg64::seed_from_u64(7);
        for _ in 0..100 {
            let x = d.sample(&params, &mut g).unwrap().as_real().unwrap();
            assert!((0.0..4.0).contains(&x));
        }
    }

    #[test]
    fn bernoulli_sampling() {
        let d = Bernoulli::new(id(0));
        let p = Value::Real(0.25);
        let mut g = Pcg64::seed_from_u64(1337);
        let hits = (0..4000)
            .filter(|_| d.sample(&[&p], &mut g).unwrap() == Value::Boolean(true))
            .count();
        let freq = hits as f64 / 4000.0;
        assert!((freq - 0.25).abs() < 0.03, "freq: {}", freq);
        assert!(d.sample(&[&Value::Real(1.5)], &mut g).is_err());
    }

    #[test]
    fn resample_ratio() {
        let d = Exponential::new(id(0));
        let rate = Value::Real(1.0);
        let mut g = Pcg64::seed_from_u64(3);
        let old = Value::Real(0.5);
        let (new, ratio) = d.resample(&old, &[&rate], &mut g).unwrap();
        let expected =
            d.log_density(&old, &[&rate]).unwrap() - d.log_density(&new, &[&rate]).unwrap();
        assert!((ratio - expected).abs() < 1e-12);
    }
}
