//! Built-in polarization functions.
//!
//! Every built-in takes an optional trailing time-shift argument:
//! `tt = t - tshift`. The shift defaults to zero, so a `-1` token in that
//! slot is equivalent to leaving it out. `polynom` is the exception: its
//! shift is the mandatory first argument.
//!
//! Phases are in degrees, frequencies in MHz and rates in 1/µs.

use std::f64::consts::{PI, SQRT_2};
use std::sync::Arc;

use crate::theory::special::{bessel_j0, dawson, integrate};
use crate::theory::{Arity, GlobalPart, TheoryFunction};

const TWO_PI: f64 = 2.0 * PI;
const DEG_TO_RAD: f64 = PI / 180.0;
const ONE_THIRD: f64 = 1.0 / 3.0;
const TWO_THIRDS: f64 = 2.0 / 3.0;

/// Time span covered by the tabulated longitudinal-field integral (µs).
const KT_TABLE_SPAN: f64 = 20.0;
const KT_INTEGRAL_EPS: f64 = 1e-12;

/// Which built-in function a [`Builtin`] computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    Asymmetry,
    SimpleExp,
    GeneralExp,
    SimpleGauss,
    StaticGaussKt,
    StaticKtLf,
    DynamicKtLf,
    CombiLgkt,
    SpinGlass,
    RandomAnisotropicHyperfine,
    Abragam,
    InternalField,
    TfCos,
    Bessel,
    InternalBessel,
    SkewedGauss,
    Polynomial,
}

impl BuiltinKind {
    /// Every built-in, in registration order.
    pub const ALL: [BuiltinKind; 17] = [
        BuiltinKind::Asymmetry,
        BuiltinKind::SimpleExp,
        BuiltinKind::GeneralExp,
        BuiltinKind::SimpleGauss,
        BuiltinKind::StaticGaussKt,
        BuiltinKind::StaticKtLf,
        BuiltinKind::DynamicKtLf,
        BuiltinKind::CombiLgkt,
        BuiltinKind::SpinGlass,
        BuiltinKind::RandomAnisotropicHyperfine,
        BuiltinKind::Abragam,
        BuiltinKind::InternalField,
        BuiltinKind::TfCos,
        BuiltinKind::Bessel,
        BuiltinKind::InternalBessel,
        BuiltinKind::SkewedGauss,
        BuiltinKind::Polynomial,
    ];

    fn name(self) -> &'static str {
        match self {
            BuiltinKind::Asymmetry => "asymmetry",
            BuiltinKind::SimpleExp => "simplExpo",
            BuiltinKind::GeneralExp => "generExpo",
            BuiltinKind::SimpleGauss => "simpleGss",
            BuiltinKind::StaticGaussKt => "statGssKt",
            BuiltinKind::StaticKtLf => "statKTTab",
            BuiltinKind::DynamicKtLf => "dynmKTTab",
            BuiltinKind::CombiLgkt => "combiLGKT",
            BuiltinKind::SpinGlass => "spinGlass",
            BuiltinKind::RandomAnisotropicHyperfine => "rdAnisoHf",
            BuiltinKind::Abragam => "abragam",
            BuiltinKind::InternalField => "internFld",
            BuiltinKind::TfCos => "TFieldCos",
            BuiltinKind::Bessel => "bessel",
            BuiltinKind::InternalBessel => "internBsl",
            BuiltinKind::SkewedGauss => "skewedGss",
            BuiltinKind::Polynomial => "polynom",
        }
    }

    fn abbreviation(self) -> &'static str {
        match self {
            BuiltinKind::Asymmetry => "a",
            BuiltinKind::SimpleExp => "se",
            BuiltinKind::GeneralExp => "ge",
            BuiltinKind::SimpleGauss => "sg",
            BuiltinKind::StaticGaussKt => "stg",
            BuiltinKind::StaticKtLf => "sktt",
            BuiltinKind::DynamicKtLf => "dktt",
            BuiltinKind::CombiLgkt => "lgkt",
            BuiltinKind::SpinGlass => "spg",
            BuiltinKind::RandomAnisotropicHyperfine => "rahf",
            BuiltinKind::Abragam => "ab",
            BuiltinKind::InternalField => "if",
            BuiltinKind::TfCos => "tf",
            BuiltinKind::Bessel => "b",
            BuiltinKind::InternalBessel => "ib",
            BuiltinKind::SkewedGauss => "skg",
            BuiltinKind::Polynomial => "p",
        }
    }

    /// Argument names including the optional time shift.
    fn parameter_names(self) -> &'static [&'static str] {
        match self {
            BuiltinKind::Asymmetry => &["asymmetry", "tshift"],
            BuiltinKind::SimpleExp => &["rate", "tshift"],
            BuiltinKind::GeneralExp => &["rate", "exponent", "tshift"],
            BuiltinKind::SimpleGauss => &["rate", "tshift"],
            BuiltinKind::StaticGaussKt => &["rate", "tshift"],
            BuiltinKind::StaticKtLf => &["frequency", "rate", "tshift"],
            BuiltinKind::DynamicKtLf => &["frequency", "rate", "hopping_rate", "tshift"],
            BuiltinKind::CombiLgkt => &["lorentz_rate", "gauss_rate", "tshift"],
            BuiltinKind::SpinGlass => &["rate", "hopping_rate", "order", "tshift"],
            BuiltinKind::RandomAnisotropicHyperfine => &["frequency", "rate", "tshift"],
            BuiltinKind::Abragam => &["rate", "hopping_rate", "tshift"],
            BuiltinKind::InternalField => &["phase", "frequency", "tf_rate", "lf_rate", "tshift"],
            BuiltinKind::TfCos => &["phase", "frequency", "tshift"],
            BuiltinKind::Bessel => &["phase", "frequency", "tshift"],
            BuiltinKind::InternalBessel => {
                &["fraction", "phase", "frequency", "tf_rate", "lf_rate", "tshift"]
            }
            BuiltinKind::SkewedGauss => &["phase", "frequency", "rate_minus", "rate_plus", "tshift"],
            BuiltinKind::Polynomial => &["tshift", "p0"],
        }
    }

    /// Number of arguments without the optional time shift.
    fn base_arity(self) -> usize {
        match self {
            BuiltinKind::Polynomial => 2,
            kind => kind.parameter_names().len() - 1,
        }
    }
}

/// A built-in theory function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    kind: BuiltinKind,
}

impl Builtin {
    pub fn new(kind: BuiltinKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> BuiltinKind {
        self.kind
    }

    /// All built-ins, ready to register.
    pub fn all() -> Vec<Arc<dyn TheoryFunction>> {
        BuiltinKind::ALL
            .iter()
            .map(|&kind| Arc::new(Builtin::new(kind)) as Arc<dyn TheoryFunction>)
            .collect()
    }

    /// Shifted time and the arguments without the shift.
    fn split<'a>(&self, t: f64, args: &'a [f64]) -> (f64, &'a [f64]) {
        let n = self.kind.base_arity();
        if args.len() > n {
            (t - args[n], &args[..n])
        } else {
            (t, args)
        }
    }
}

impl TheoryFunction for Builtin {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn abbreviation(&self) -> Option<&str> {
        Some(self.kind.abbreviation())
    }

    fn parameter_names(&self) -> &[&str] {
        self.kind.parameter_names()
    }

    fn argument_name(&self, slot: usize) -> String {
        match (self.kind, slot) {
            (BuiltinKind::Polynomial, 0) => "tshift".to_string(),
            (BuiltinKind::Polynomial, n) => format!("p{}", n - 1),
            (kind, n) => kind
                .parameter_names()
                .get(n)
                .map_or_else(|| format!("arg{}", n + 1), |name| (*name).to_string()),
        }
    }

    fn arity(&self) -> Arity {
        let n = self.kind.base_arity();
        match self.kind {
            BuiltinKind::Polynomial => Arity::AtLeast(n),
            _ => Arity::Range(n, n + 1),
        }
    }

    fn default_value(&self, slot: usize) -> Option<f64> {
        match self.kind {
            BuiltinKind::Polynomial if slot == 0 => Some(0.0),
            BuiltinKind::Polynomial => None,
            kind if slot == kind.base_arity() => Some(0.0),
            _ => None,
        }
    }

    fn evaluate(&self, t: f64, args: &[f64], global: Option<&GlobalPart>) -> f64 {
        let (tt, v) = match self.kind {
            BuiltinKind::Polynomial => (t - args[0], &args[1..]),
            _ => self.split(t, args),
        };
        match self.kind {
            BuiltinKind::Asymmetry => v[0],
            BuiltinKind::SimpleExp => (-v[0] * tt).exp(),
            BuiltinKind::GeneralExp => general_exp(tt, v[0], v[1]),
            BuiltinKind::SimpleGauss => (-0.5 * (v[0] * tt).powi(2)).exp(),
            BuiltinKind::StaticGaussKt => static_gauss_kt(tt, v[0]),
            BuiltinKind::StaticKtLf => {
                let table = global.and_then(|g| g.downcast_ref::<LfIntegralTable>());
                static_kt_lf(tt, v[0], v[1], table)
            }
            BuiltinKind::DynamicKtLf => dynamic_kt_lf(tt, v[0], v[1], v[2]),
            BuiltinKind::CombiLgkt => {
                let lt = v[0] * tt;
                let st2 = (v[1] * tt).powi(2);
                ONE_THIRD + TWO_THIRDS * (1.0 - lt - st2) * (-lt - 0.5 * st2).exp()
            }
            BuiltinKind::SpinGlass => spin_glass(tt, v[0], v[1], v[2]),
            BuiltinKind::RandomAnisotropicHyperfine => {
                let nu_t = v[0] * tt;
                let lambda_t = v[1] * tt;
                (1.0 - 0.5 * nu_t) * (-0.5 * nu_t).exp() / 6.0
                    + ONE_THIRD
                        * (1.0 - 0.25 * nu_t)
                        * (-0.25 * (nu_t + 2.44949 * lambda_t)).exp()
            }
            BuiltinKind::Abragam => {
                let gamma_t = v[1] * tt;
                (-(v[0] / v[1]).powi(2) * ((-gamma_t).exp() - 1.0 + gamma_t)).exp()
            }
            BuiltinKind::InternalField => {
                TWO_THIRDS * (DEG_TO_RAD * v[0] + TWO_PI * v[1] * tt).cos() * (-v[2] * tt).exp()
                    + ONE_THIRD * (-v[3] * tt).exp()
            }
            BuiltinKind::TfCos => (DEG_TO_RAD * v[0] + TWO_PI * v[1] * tt).cos(),
            BuiltinKind::Bessel => bessel_j0(DEG_TO_RAD * v[0] + TWO_PI * v[1] * tt),
            BuiltinKind::InternalBessel => {
                v[0] * bessel_j0(DEG_TO_RAD * v[1] + TWO_PI * v[2] * tt) * (-v[3] * tt).exp()
                    + (1.0 - v[0]) * (-v[4] * tt).exp()
            }
            BuiltinKind::SkewedGauss => skewed_gauss(tt, v[0], v[1], v[2], v[3]),
            BuiltinKind::Polynomial => polynomial(tt, v),
        }
    }

    fn needs_global_part(&self) -> bool {
        self.kind == BuiltinKind::StaticKtLf
    }

    fn global_part_key(&self, args: &[f64]) -> Vec<f64> {
        // the shift does not enter the table
        args.iter().take(2).copied().collect()
    }

    fn compute_global_part(&self, args: &[f64]) -> Option<GlobalPart> {
        if self.kind != BuiltinKind::StaticKtLf || args.len() < 2 {
            return None;
        }
        LfIntegralTable::build(args[0], args[1]).map(|table| Arc::new(table) as GlobalPart)
    }
}

fn polynomial(tt: f64, coefficients: &[f64]) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * tt + c)
}

/// exp(-(λt)^β). A negative base with a non-integer exponent has no real
/// power; the function is zero there.
fn general_exp(tt: f64, rate: f64, beta: f64) -> f64 {
    let base = rate * tt;
    if base < 0.0 && beta.fract() != 0.0 {
        return 0.0;
    }
    (-base.powf(beta)).exp()
}

fn static_gauss_kt(tt: f64, sigma: f64) -> f64 {
    let st2 = (sigma * tt).powi(2);
    ONE_THIRD + TWO_THIRDS * (1.0 - st2) * (-0.5 * st2).exp()
}

fn lf_integrand(x: f64, delta: f64, w0: f64) -> f64 {
    (-0.5 * (delta * x).powi(2)).exp() * (w0 * x).sin()
}

/// Cumulative ∫₀ᵗ exp(-½(Δx)²) sin(ω₀x) dx on a uniform grid.
#[derive(Debug, Clone)]
pub struct LfIntegralTable {
    delta: f64,
    w0: f64,
    dt: f64,
    cumulative: Vec<f64>,
}

impl LfIntegralTable {
    /// Tabulate for `frequency` (MHz) and `delta` (1/µs). No table is
    /// needed (and `None` is returned) in zero field.
    pub fn build(frequency: f64, delta: f64) -> Option<Self> {
        if frequency == 0.0 || !frequency.is_finite() || !delta.is_finite() {
            return None;
        }
        let w0 = TWO_PI * frequency.abs();
        // at least 40 grid points per oscillation period
        let dt = (TWO_PI / (40.0 * w0)).min(0.002).max(KT_TABLE_SPAN / 1.0e6);
        let n = (KT_TABLE_SPAN / dt).ceil() as usize;
        let mut cumulative = Vec::with_capacity(n + 1);
        cumulative.push(0.0);
        let mut sum = 0.0;
        for k in 0..n {
            sum += simpson_panel(k as f64 * dt, (k + 1) as f64 * dt, delta, w0);
            cumulative.push(sum);
        }
        Some(Self {
            delta,
            w0,
            dt,
            cumulative,
        })
    }

    /// ∫₀ᵗ of the integrand. The integrand is odd, so the integral is even in t.
    pub fn integral(&self, t: f64) -> f64 {
        let t = t.abs();
        let last = self.cumulative.len() - 1;
        let k = (t / self.dt).floor() as usize;
        if k >= last {
            let start = last as f64 * self.dt;
            return self.cumulative[last]
                + integrate(
                    &|x| lf_integrand(x, self.delta, self.w0),
                    start,
                    t,
                    KT_INTEGRAL_EPS,
                );
        }
        self.cumulative[k] + simpson_panel(k as f64 * self.dt, t, self.delta, self.w0)
    }

    fn matches(&self, delta: f64, w0: f64) -> bool {
        self.delta == delta && self.w0 == w0
    }
}

fn simpson_panel(a: f64, b: f64, delta: f64, w0: f64) -> f64 {
    let m = 0.5 * (a + b);
    (b - a) / 6.0
        * (lf_integrand(a, delta, w0) + 4.0 * lf_integrand(m, delta, w0) + lf_integrand(b, delta, w0))
}

/// Static Gaussian Kubo-Toyabe function in a longitudinal field.
///
/// Falls back to the zero-field form when the frequency vanishes. The time
/// integral comes from `table` when one matching the arguments is given,
/// and is integrated adaptively otherwise.
pub fn static_kt_lf(tt: f64, frequency: f64, delta: f64, table: Option<&LfIntegralTable>) -> f64 {
    if frequency == 0.0 {
        return static_gauss_kt(tt, delta);
    }
    let w0 = TWO_PI * frequency.abs();
    let integral = match table {
        Some(table) if table.matches(delta, w0) => table.integral(tt),
        _ => integrate(&|x| lf_integrand(x, delta, w0), 0.0, tt.abs(), KT_INTEGRAL_EPS),
    };
    1.0 - 2.0 * (delta / w0).powi(2) * (1.0 - (-0.5 * (delta * tt).powi(2)).exp() * (w0 * tt).cos())
        + 2.0 * delta.powi(4) / w0.powi(3) * integral
}

/// Dynamic Gaussian Kubo-Toyabe function in a longitudinal field, in the
/// Keren approximation `P(t) = exp(-Γ(t))`.
///
/// Accurate in the fast-fluctuation regime (hopping rate ≳ Δ) and for
/// strong fields; it does not reproduce the static ⅓ tail. A zero hopping
/// rate falls back to the static function.
pub fn dynamic_kt_lf(tt: f64, frequency: f64, delta: f64, hopping_rate: f64) -> f64 {
    if hopping_rate == 0.0 {
        return static_kt_lf(tt, frequency, delta, None);
    }
    let w = TWO_PI * frequency;
    let nu = hopping_rate;
    let w2 = w * w;
    let nu2 = nu * nu;
    let sum = w2 + nu2;
    let decay = (-nu * tt).exp();
    let gamma = 2.0 * delta * delta / (sum * sum)
        * (sum * nu * tt + (w2 - nu2) * (1.0 - decay * (w * tt).cos())
            - 2.0 * nu * w * decay * (w * tt).sin());
    (-gamma).exp()
}

fn spin_glass(tt: f64, rate: f64, hopping_rate: f64, q: f64) -> f64 {
    if rate == 0.0 {
        return 1.0;
    }
    let lambda2 = rate * rate;
    let lambda_t2_q = tt * tt * lambda2 * q;
    let rate2 = 4.0 * lambda2 * (1.0 - q) * tt / hopping_rate;
    let rate_l = rate2.sqrt();
    let rate_t = (rate2 + lambda_t2_q).sqrt();
    if rate_t == 0.0 {
        return 1.0;
    }
    ONE_THIRD * ((-rate_l).exp() + 2.0 * (1.0 - lambda_t2_q / rate_t) * (-rate_t).exp())
}

/// Skewed Gaussian field distribution. The phase term uses
/// `exp(-z²)·erfi(z) = 2/√π·F(z)` with Dawson's integral F, which stays
/// finite for every argument.
fn skewed_gauss(tt: f64, phase: f64, frequency: f64, sigma_m: f64, sigma_p: f64) -> f64 {
    let sm = sigma_m.abs();
    let sp = sigma_p.abs();
    let arg = DEG_TO_RAD * phase + TWO_PI * frequency * tt;
    let gp = (-0.5 * (sp * tt).powi(2)).exp();
    if sm == sp {
        return arg.cos() * gp;
    }
    let gm = (-0.5 * (sm * tt).powi(2)).exp();
    let zp = sp * tt / SQRT_2;
    let zm = sm * tt / SQRT_2;
    let wp = sp / (sm + sp);
    let wm = 1.0 - wp;
    let two_over_sqrt_pi = 2.0 / PI.sqrt();
    arg.cos() * (wm * gm + wp * gp)
        + arg.sin() * two_over_sqrt_pi * (wm * dawson(zm) - wp * dawson(zp))
}
