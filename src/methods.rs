use crate::error::ConfigError;
use crate::state::TreatmentState;
use std::collections::BTreeMap;

/// Density of water (kg/m^3)
pub const RHO_WATER: f64 = 1000.0;
/// Gravitational acceleration (m/s^2)
pub const GRAVITY: f64 = 9.81;

const CSTR_MAX_SUBSTEPS: usize = 1000;

/// Hydraulic and quality values a method sees for one link/pollutant in one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInputs {
    pub flow: f64,        // link flow (m^3/s)
    pub depth: f64,       // link flow depth (m)
    pub volume: f64,      // water stored in the link (m^3)
    pub inflow_conc: f64, // concentration entering the link this step (mg/L)
    pub dt: f64,          // step length (s)
}

/// A treatment method with its validated parameters.
///
/// Methods are resolved from their configuration names once, when the
/// configuration is loaded, so evaluating a step is a plain match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Method {
    EventMeanConc {
        c: f64,
    },
    ConstantRemoval {
        r: f64,
    },
    CoRemoval {
        r1: f64,
        r2: f64,
    },
    ConcDependRemoval {
        r_l: f64,
        bc: f64,
        r_u: f64,
    },
    NthOrderReaction {
        k: f64,
        n: f64,
    },
    KCModel {
        k: f64,
        c_s: f64,
    },
    GravitySettling {
        k: f64,
        c_s: f64,
    },
    Erosion {
        w: f64,
        so: f64,
        ss: f64,
        d50: f64,
    },
    Cstr {
        k: f64,
        n: f64,
        c0: f64,
    },
    Phosphorus {
        b1: f64,
        ceq0: f64,
        k: f64,
        l: f64,
        a: f64,
        e: f64,
    },
}

impl Method {
    /// Resolve a method by its configuration name and validate its parameter set.
    pub fn from_parameters(
        link: &str,
        name: &str,
        parameters: &BTreeMap<String, f64>,
    ) -> Result<Self, ConfigError> {
        let mut p = ParameterReader::new(link, name, parameters);
        let method = match name {
            "EventMeanConc" => Method::EventMeanConc {
                c: p.non_negative("C")?,
            },
            "ConstantRemoval" => Method::ConstantRemoval {
                r: p.fraction("R")?,
            },
            "CoRemoval" => Method::CoRemoval {
                r1: p.fraction("R1")?,
                r2: p.fraction("R2")?,
            },
            "ConcDependRemoval" => Method::ConcDependRemoval {
                r_l: p.fraction("R_l")?,
                bc: p.non_negative("BC")?,
                r_u: p.fraction("R_u")?,
            },
            "NthOrderReaction" => Method::NthOrderReaction {
                k: p.non_negative("k")?,
                n: p.non_negative("n")?,
            },
            "KCModel" | "kCModel" => Method::KCModel {
                k: p.non_negative("k")?,
                c_s: p.non_negative("C_s")?,
            },
            "GravitySettling" => Method::GravitySettling {
                k: p.non_negative("k")?,
                c_s: p.non_negative("C_s")?,
            },
            "Erosion" => Method::Erosion {
                w: p.positive("w")?,
                so: p.non_negative("So")?,
                ss: p.greater_than_one("Ss")?,
                d50: p.positive("d50")?,
            },
            "CSTR" => Method::Cstr {
                k: p.non_negative("k")?,
                n: p.non_negative("n")?,
                c0: p.non_negative("c0")?,
            },
            "Phosphorus" => Method::Phosphorus {
                b1: p.finite("B1")?,
                ceq0: p.non_negative("Ceq0")?,
                k: p.non_negative("k")?,
                l: p.non_negative("L")?,
                a: p.positive("A")?,
                e: p.porosity("E")?,
            },
            _ => {
                return Err(ConfigError::UnknownMethod {
                    link: link.to_string(),
                    method: name.to_string(),
                });
            }
        };
        p.finish()?;

        Ok(method)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::EventMeanConc { .. } => "EventMeanConc",
            Method::ConstantRemoval { .. } => "ConstantRemoval",
            Method::CoRemoval { .. } => "CoRemoval",
            Method::ConcDependRemoval { .. } => "ConcDependRemoval",
            Method::NthOrderReaction { .. } => "NthOrderReaction",
            Method::KCModel { .. } => "KCModel",
            Method::GravitySettling { .. } => "GravitySettling",
            Method::Erosion { .. } => "Erosion",
            Method::Cstr { .. } => "CSTR",
            Method::Phosphorus { .. } => "Phosphorus",
        }
    }

    /// Compute the concentration leaving the link for this step. Never negative.
    pub fn evaluate(&self, inputs: &StepInputs, state: &TreatmentState) -> f64 {
        let c_in = inputs.inflow_conc.max(0.0);
        let c_new = match *self {
            Method::EventMeanConc { c } => event_mean_conc(c),
            Method::ConstantRemoval { r } => constant_removal(c_in, r),
            Method::CoRemoval { r1, r2 } => co_removal(c_in, r1, r2),
            Method::ConcDependRemoval { r_l, bc, r_u } => conc_depend_removal(c_in, r_l, bc, r_u),
            Method::NthOrderReaction { k, n } => nth_order_reaction(c_in, k, n, inputs.dt),
            Method::KCModel { k, c_s } => k_c_model(c_in, k, c_s, inputs.depth, inputs.dt),
            Method::GravitySettling { k, c_s } => gravity_settling(c_in, k, c_s, inputs.dt),
            Method::Erosion { w, so, ss, d50 } => {
                erosion(c_in, inputs.flow, inputs.depth, w, so, ss, d50)
            }
            Method::Cstr { k, n, c0 } => cstr(
                state.previous_conc.unwrap_or(c0),
                c_in,
                inputs.flow,
                inputs.volume,
                k,
                n,
                inputs.dt,
            ),
            Method::Phosphorus {
                b1,
                ceq0,
                k,
                l,
                a,
                e,
            } => phosphorus(
                c_in,
                inputs.flow,
                state.elapsed + inputs.dt.max(0.0),
                b1,
                ceq0,
                k,
                l,
                a,
                e,
            ),
        };
        clamp_concentration(c_new)
    }
}

/// Negative and NaN concentrations become zero.
pub fn clamp_concentration(c: f64) -> f64 {
    f64::max(c, 0.0)
}

/// Event mean concentration: the link always carries `c`.
pub fn event_mean_conc(c: f64) -> f64 {
    c
}

pub fn constant_removal(c_in: f64, r: f64) -> f64 {
    c_in * (1.0 - r)
}

/// Removal of one pollutant chained with the removal fraction of a second
/// treatment it is tied to.
pub fn co_removal(c_in: f64, r1: f64, r2: f64) -> f64 {
    c_in * (1.0 - r1) * (1.0 - r2)
}

/// Removal fraction switches from `r_l` to `r_u` once the inflow
/// concentration exceeds the boundary `bc`. `c_in == bc` stays on the lower rate.
pub fn conc_depend_removal(c_in: f64, r_l: f64, bc: f64, r_u: f64) -> f64 {
    let r = if c_in <= bc { r_l } else { r_u };
    c_in * (1.0 - r)
}

/// Explicit integration of dC/dt = -k C^n over one step.
pub fn nth_order_reaction(c_in: f64, k: f64, n: f64, dt: f64) -> f64 {
    clamp_concentration(c_in - k * c_in.powf(n) * dt)
}

/// First-order decay toward a background concentration over the flow depth.
/// Without water in the link nothing settles.
pub fn k_c_model(c_in: f64, k: f64, c_s: f64, depth: f64, dt: f64) -> f64 {
    if depth <= 0.0 {
        return c_in;
    }
    c_s + (c_in - c_s) * (-k * dt / depth).exp()
}

/// Exponential relaxation toward the settled concentration `c_s`.
pub fn gravity_settling(c_in: f64, k: f64, c_s: f64, dt: f64) -> f64 {
    c_s + (c_in - c_s) * (-k * dt.max(0.0)).exp()
}

/// Engelund-Hansen (1967) total sediment load converted to a concentration and
/// added on top of the inflow concentration.
pub fn erosion(
    c_in: f64,  // inflow concentration (mg/L)
    flow: f64,  // link flow (m^3/s)
    depth: f64, // flow depth (m)
    w: f64,     // channel width (m)
    so: f64,    // bottom slope (m/m)
    ss: f64,    // specific gravity of the sediment
    d50: f64,   // median grain diameter (mm)
) -> f64 {
    if flow <= 0.0 || depth <= 0.0 {
        return c_in;
    }

    let d50_m = d50 / 1000.0;
    let rho_s = ss * RHO_WATER;

    let area = w * depth;
    let velocity = flow / area;
    let hydraulic_radius = area / (w + 2.0 * depth);
    let shear_stress = RHO_WATER * GRAVITY * hydraulic_radius * so;

    // Sediment discharge per unit width (kg/m/s)
    let qs = 0.05
        * rho_s
        * velocity.powi(2)
        * (d50_m / (GRAVITY * (ss - 1.0))).sqrt()
        * (shear_stress / ((rho_s - RHO_WATER) * GRAVITY * d50_m)).powf(1.5);

    // kg/m^3 -> mg/L
    let sediment_conc = qs * w / flow * 1000.0;
    c_in + sediment_conc
}

/// Completely stirred tank: dC/dt = Q/V (C_in - C) - k C^n, integrated with
/// RK4 from the previous concentration.
pub fn cstr(c_prev: f64, c_in: f64, flow: f64, volume: f64, k: f64, n: f64, dt: f64) -> f64 {
    if volume <= 0.0 {
        return c_in;
    }
    if dt <= 0.0 {
        return clamp_concentration(c_prev);
    }

    let q = flow.max(0.0);
    let rate = |c: f64| q / volume * (c_in - c) - k * clamp_concentration(c).powf(n);

    let (substeps, h) = cstr_substeps(q, volume, dt);

    let mut c = clamp_concentration(c_prev);
    for _ in 0..substeps {
        let k1 = rate(c);
        let k2 = rate(c + 0.5 * h * k1);
        let k3 = rate(c + 0.5 * h * k2);
        let k4 = rate(c + h * k3);
        c = clamp_concentration(c + h / 6.0 * (k1 + 2.0 * k2 + 2.0 * k3 + k4));
    }
    c
}

// Substep count and length. Substeps stay below a tenth of the residence
// time; past the cap only the end of the step is integrated, by which point
// the tank has been flushed a hundred times over.
fn cstr_substeps(flow: f64, volume: f64, dt: f64) -> (usize, f64) {
    let max_h = if flow > 0.0 { 0.1 * volume / flow } else { dt };
    let wanted = (dt / max_h).ceil();
    if !wanted.is_finite() || wanted < 1.0 {
        (1, dt)
    } else if wanted > CSTR_MAX_SUBSTEPS as f64 {
        (CSTR_MAX_SUBSTEPS, max_h)
    } else {
        let substeps = wanted as usize;
        (substeps, dt / substeps as f64)
    }
}

/// Equilibrium phosphorus uptake through a filter medium.
///
/// The equilibrium concentration drifts as `ceq0 * exp(b1 * t)` while the
/// medium loads up; the outflow relaxes from the inflow concentration toward it
/// with the pore residence time `l * a * e / q`.
pub fn phosphorus(
    c_in: f64,    // inflow concentration (mg/L)
    flow: f64,    // link flow (m^3/s)
    elapsed: f64, // time since treatment started (s)
    b1: f64,      // equilibrium drift rate (1/s)
    ceq0: f64,    // initial equilibrium concentration (mg/L)
    k: f64,       // uptake rate constant (1/s)
    l: f64,       // media depth (m)
    a: f64,       // media area (m^2)
    e: f64,       // porosity
) -> f64 {
    let ceq = ceq0 * (b1 * elapsed).exp();
    if flow <= 0.0 {
        return ceq;
    }
    ceq + (c_in - ceq) * (-k * l * a * e / flow).exp()
}

// Reads parameters by name and remembers which ones were consumed
struct ParameterReader<'a> {
    link: &'a str,
    method: &'a str,
    parameters: &'a BTreeMap<String, f64>,
    used: Vec<&'static str>,
}

impl<'a> ParameterReader<'a> {
    fn new(link: &'a str, method: &'a str, parameters: &'a BTreeMap<String, f64>) -> Self {
        ParameterReader {
            link,
            method,
            parameters,
            used: Vec::new(),
        }
    }

    fn invalid(&self, name: &str, value: f64, reason: &'static str) -> ConfigError {
        ConfigError::InvalidParameter {
            link: self.link.to_string(),
            method: self.method.to_string(),
            name: name.to_string(),
            value,
            reason,
        }
    }

    fn finite(&mut self, name: &'static str) -> Result<f64, ConfigError> {
        let value = *self
            .parameters
            .get(name)
            .ok_or_else(|| ConfigError::MissingParameter {
                link: self.link.to_string(),
                method: self.method.to_string(),
                name: name.to_string(),
            })?;
        self.used.push(name);
        if !value.is_finite() {
            return Err(self.invalid(name, value, "must be finite"));
        }
        Ok(value)
    }

    fn non_negative(&mut self, name: &'static str) -> Result<f64, ConfigError> {
        let value = self.finite(name)?;
        if value < 0.0 {
            return Err(self.invalid(name, value, "must not be negative"));
        }
        Ok(value)
    }

    fn positive(&mut self, name: &'static str) -> Result<f64, ConfigError> {
        let value = self.finite(name)?;
        if value <= 0.0 {
            return Err(self.invalid(name, value, "must be positive"));
        }
        Ok(value)
    }

    fn fraction(&mut self, name: &'static str) -> Result<f64, ConfigError> {
        let value = self.finite(name)?;
        if !(0.0..=1.0).contains(&value) {
            return Err(self.invalid(name, value, "must be between 0 and 1"));
        }
        Ok(value)
    }

    fn porosity(&mut self, name: &'static str) -> Result<f64, ConfigError> {
        let value = self.finite(name)?;
        if value <= 0.0 || value > 1.0 {
            return Err(self.invalid(name, value, "must be in (0, 1]"));
        }
        Ok(value)
    }

    fn greater_than_one(&mut self, name: &'static str) -> Result<f64, ConfigError> {
        let value = self.finite(name)?;
        if value <= 1.0 {
            return Err(self.invalid(name, value, "must be greater than 1"));
        }
        Ok(value)
    }

    fn finish(self) -> Result<(), ConfigError> {
        match self
            .parameters
            .keys()
            .find(|key| !self.used.iter().any(|used| *used == key.as_str()))
        {
            Some(extra) => Err(ConfigError::UnexpectedParameter {
                link: self.link.to_string(),
                method: self.method.to_string(),
                name: extra.clone(),
            }),
            None => Ok(()),
        }
    }
}
