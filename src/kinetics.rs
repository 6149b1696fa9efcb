use crate::cytoplasm::MIN_CONCENTRATION;
use anyhow::Result;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;

/// Named kinetic constants of a circuit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    values: BTreeMap<String, f64>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    /// Value of `name`, or 0.0 when absent. Presence is checked by `CytoplasmModel::validate`.
    #[inline(always)]
    pub fn get(&self, name: &str) -> f64 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Copies every entry of `overrides` over these values.
    pub fn merge(&mut self, overrides: &BTreeMap<String, f64>) {
        for (name, value) in overrides {
            self.values.insert(name.clone(), *value);
        }
    }
}

/// Read-only view handed to rate expressions.
pub struct KineticState<'a> {
    interior: &'a [f64],
    exterior: &'a [f64],
    params: &'a Parameters,
}

impl<'a> KineticState<'a> {
    pub fn new(interior: &'a [f64], exterior: &'a [f64], params: &'a Parameters) -> Self {
        KineticState { interior, exterior, params }
    }

    #[inline(always)]
    pub fn interior(&self, species: usize) -> f64 {
        self.interior[species]
    }

    #[inline(always)]
    pub fn exterior(&self, species: usize) -> f64 {
        self.exterior[species]
    }

    #[inline(always)]
    pub fn param(&self, name: &str) -> f64 {
        self.params.get(name)
    }
}

pub type RateFn = Box<dyn Fn(&KineticState) -> f64 + Send + Sync>;

/// Starting value of an interior species for an agent with no own or lineage entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initial {
    Fixed(f64),
    /// `high` with probability `p_high`, else `low`; drawn once per agent.
    Coin { low: f64, high: f64, p_high: f64 },
}

impl Initial {
    pub fn draw<R: Rng>(&self, rng: &mut R) -> f64 {
        match *self {
            Initial::Fixed(value) => value,
            Initial::Coin { low, high, p_high } => {
                if rng.random_bool(p_high.clamp(0.0, 1.0)) {
                    high
                } else {
                    low
                }
            }
        }
    }
}

/// Species integrated inside each agent.
pub struct InteriorSpecies {
    pub name: String,
    pub initial: Initial,
    pub rate: RateFn,
}

/// A concentration counts as present once it is above the post-step floor.
#[inline(always)]
fn present(value: f64) -> f64 {
    if value > MIN_CONCENTRATION {
        1.0
    } else {
        0.0
    }
}

/// Species secreted into (or absorbed from) its own diffusion field.
pub struct ExteriorSpecies {
    pub name: String,
    pub rate: RateFn,
}

/// A reaction circuit: species, their rate expressions and default constants.
pub struct CytoplasmModel {
    pub name: String,
    pub interior: Vec<InteriorSpecies>,
    pub exterior: Vec<ExteriorSpecies>,
    pub defaults: Parameters,
    pub required: Vec<String>,
}

impl fmt::Debug for CytoplasmModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CytoplasmModel")
            .field("name", &self.name)
            .field("interior", &self.interior.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("exterior", &self.exterior.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("defaults", &self.defaults)
            .finish()
    }
}

fn rate<F>(f: F) -> RateFn
where
    F: Fn(&KineticState) -> f64 + Send + Sync + 'static,
{
    Box::new(f)
}

impl CytoplasmModel {
    pub const PRESETS: [&'static str; 6] =
        ["aim", "arb", "monotonic_decreasing", "avigdor", "producer_receiver", "constant_secretion"];

    /// Built-in circuit by name.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "aim" => Ok(Self::aim()),
            "arb" => Ok(Self::arb()),
            "monotonic_decreasing" => Ok(Self::monotonic_decreasing()),
            "avigdor" => Ok(Self::avigdor()),
            "producer_receiver" => Ok(Self::producer_receiver()),
            "constant_secretion" => Ok(Self::constant_secretion()),
            _ => anyhow::bail!(
                "Unknown cytoplasm circuit '{}' (expected one of: {}).",
                name,
                Self::PRESETS.join(", ")
            ),
        }
    }

    /// Arbitrium-style AimP/AimR circuit.
    ///
    /// AimP is imported with Michaelis-Menten kinetics from the `testField` medium,
    /// AimR is self-activating, and both are lost to complex formation and dilution.
    pub fn aim() -> Self {
        const AIM_P: usize = 0;
        const AIM_R: usize = 1;
        const EXT_AIM_P: usize = 0;
        const TEST_FIELD: usize = 1;

        let interior = vec![
            InteriorSpecies {
                name: "AimP".to_string(),
                initial: Initial::Fixed(1.0),
                rate: rate(|s| {
                    let field = s.exterior(TEST_FIELD);
                    s.param("Kin") * field / (s.param("Kp") + field)
                        - s.param("Kon") * s.interior(AIM_P) * s.interior(AIM_R)
                        - s.param("DilRate") * s.interior(AIM_P)
                }),
            },
            InteriorSpecies {
                name: "AimR".to_string(),
                initial: Initial::Fixed(3.0),
                rate: rate(|s| {
                    let r = s.interior(AIM_R);
                    s.param("Ksyn") * r / (s.param("Kr") + r)
                        - s.param("Kon") * s.interior(AIM_P) * r
                        - s.param("DilRate") * r
                }),
            },
        ];
        let exterior = vec![
            ExteriorSpecies {
                name: "AimP".to_string(),
                rate: rate(|s| s.interior(AIM_R) * s.param("Source") - s.exterior(EXT_AIM_P) * s.param("Sink")),
            },
            ExteriorSpecies {
                name: "testField".to_string(),
                rate: rate(|s| {
                    s.exterior(EXT_AIM_P) * s.param("Sink") - s.exterior(TEST_FIELD) * s.param("SinkTest")
                }),
            },
        ];
        let defaults = Parameters::new()
            .with("Kin", 0.023)
            .with("Kp", 0.08)
            .with("Ksyn", 0.03)
            .with("Kr", 0.37)
            .with("Kon", 0.039)
            .with("DilRate", 0.007)
            .with("Source", 4.0)
            .with("Sink", 4.8)
            .with("SourceTest", 0.5)
            .with("SinkTest", 5.04);
        let required = ["Kin", "Kp", "Ksyn", "Kr", "Kon", "DilRate", "Source", "Sink", "SinkTest"]
            .iter()
            .map(|n| n.to_string())
            .collect();
        CytoplasmModel { name: "aim".to_string(), interior, exterior, defaults, required }
    }

    /// Single-medium AimP/AimR circuit: self-activating AimR secretes AimP,
    /// which is imported back with saturating uptake.
    pub fn arb() -> Self {
        const AIM_P: usize = 0;
        const AIM_R: usize = 1;
        const EXT_AIM_P: usize = 0;

        let interior = vec![
            InteriorSpecies {
                name: "AimP".to_string(),
                initial: Initial::Fixed(1.0),
                rate: rate(|s| {
                    let ext = s.exterior(EXT_AIM_P);
                    s.param("Kin") * ext / (s.param("Kp") + ext)
                        - s.param("Kon") * s.interior(AIM_P) * s.interior(AIM_R)
                        - s.param("DilRate") * s.interior(AIM_P)
                }),
            },
            InteriorSpecies {
                name: "AimR".to_string(),
                initial: Initial::Fixed(3.0),
                rate: rate(|s| {
                    let r = s.interior(AIM_R);
                    s.param("Ksyn") * r / (s.param("Kr") + r)
                        - s.param("Kon") * s.interior(AIM_P) * r
                        - s.param("DilRate") * r
                }),
            },
        ];
        let exterior = vec![ExteriorSpecies {
            name: "AimP".to_string(),
            rate: rate(|s| s.interior(AIM_R) * s.param("Source") - s.exterior(EXT_AIM_P) * s.param("Sink")),
        }];
        let defaults = Parameters::new()
            .with("Kin", 0.023)
            .with("Kp", 0.08)
            .with("Ksyn", 0.03)
            .with("Kr", 0.37)
            .with("Kon", 0.039)
            .with("DilRate", 0.007)
            .with("Source", 2.0)
            .with("Sink", 2.0);
        Self::with_all_required("arb", interior, exterior, defaults)
    }

    /// Bistable population: half the agents start without AimR and secrete AimP
    /// under IPTG induction; AimR carriers synthesise it under xylose and only absorb.
    pub fn monotonic_decreasing() -> Self {
        const AIM_P: usize = 0;
        const AIM_R: usize = 1;
        const EXT_AIM_P: usize = 0;

        let interior = vec![
            InteriorSpecies {
                name: "AimP".to_string(),
                initial: Initial::Fixed(0.5),
                rate: rate(|s| {
                    s.param("Kin") * s.exterior(EXT_AIM_P)
                        - s.param("Kon") * s.interior(AIM_P) * s.interior(AIM_R)
                        - s.param("DilRate") * s.interior(AIM_P)
                }),
            },
            InteriorSpecies {
                name: "AimR".to_string(),
                initial: Initial::Coin { low: 0.0, high: 5.0, p_high: 0.5 },
                rate: rate(|s| {
                    let r = s.interior(AIM_R);
                    let xylose = s.param("Xylose");
                    (s.param("Ksyn") * xylose / (s.param("Kx") + xylose)
                        - s.param("Kon") * s.interior(AIM_P) * r
                        - s.param("DilRate") * r)
                        * present(r)
                }),
            },
        ];
        let exterior = vec![ExteriorSpecies {
            name: "AimP".to_string(),
            rate: rate(|s| {
                let iptg = s.param("IPTG");
                s.param("Kout") * iptg / (s.param("Kiptg") + iptg) * (1.0 - present(s.interior(AIM_R)))
                    - s.param("Kin") * s.exterior(EXT_AIM_P)
            }),
        }];
        let defaults = Parameters::new()
            .with("Kin", 0.2)
            .with("Kout", 0.15)
            .with("Xylose", 0.015)
            .with("Kx", 0.02)
            .with("IPTG", 0.01)
            .with("Kiptg", 0.01)
            .with("Ksyn", 0.05)
            .with("Kon", 0.04)
            .with("DilRate", 0.006);
        Self::with_all_required("monotonic_decreasing", interior, exterior, defaults)
    }

    /// AimP/AimR circuit with IPTG-induced AimR synthesis and xylose-induced secretion.
    pub fn avigdor() -> Self {
        const AIM_P: usize = 0;
        const AIM_R: usize = 1;
        const EXT_AIM_P: usize = 0;

        let interior = vec![
            InteriorSpecies {
                name: "AimP".to_string(),
                initial: Initial::Fixed(1.0),
                rate: rate(|s| {
                    s.param("Kin") * s.exterior(EXT_AIM_P)
                        - s.param("Kon") * s.interior(AIM_P) * s.interior(AIM_R)
                        - s.param("DilRate") * s.interior(AIM_P)
                }),
            },
            InteriorSpecies {
                name: "AimR".to_string(),
                initial: Initial::Fixed(3.0),
                rate: rate(|s| {
                    let r = s.interior(AIM_R);
                    let iptg = s.param("IPTG");
                    s.param("Ksyn") * iptg / (s.param("Kiptg") + iptg) * r / (s.param("Kr") + r)
                        - s.param("Kon") * s.interior(AIM_P) * r
                        - s.param("DilRate") * r
                }),
            },
        ];
        let exterior = vec![ExteriorSpecies {
            name: "AimP".to_string(),
            rate: rate(|s| {
                let r = s.interior(AIM_R);
                let xylose = s.param("Xylose");
                s.param("Kout") * xylose / (s.param("Kx") + xylose) * r / (s.param("Kr") + r)
                    - s.param("Kin") * s.exterior(EXT_AIM_P)
            }),
        }];
        let defaults = Parameters::new()
            .with("Kin", 0.4)
            .with("Kout", 0.3)
            .with("Xylose", 0.04)
            .with("Kx", 0.02)
            .with("IPTG", 0.03)
            .with("Kiptg", 0.01)
            .with("Ksyn", 0.06)
            .with("Kr", 0.35)
            .with("Kon", 0.039)
            .with("DilRate", 0.008);
        Self::with_all_required("avigdor", interior, exterior, defaults)
    }

    /// Mixed population: producers secrete P, every agent imports it, and the
    /// receptor R drives a fluorescent reporter F.
    pub fn producer_receiver() -> Self {
        const PRODUCER: usize = 0;
        const P: usize = 1;
        const R: usize = 2;
        const F: usize = 3;
        const EXT_P: usize = 0;

        let interior = vec![
            InteriorSpecies {
                name: "producer".to_string(),
                initial: Initial::Coin { low: 0.0, high: 1.0, p_high: 0.5 },
                rate: rate(|_| 0.0),
            },
            InteriorSpecies {
                name: "P".to_string(),
                initial: Initial::Fixed(10.0),
                rate: rate(|s| {
                    s.param("Kin") * s.exterior(EXT_P)
                        - s.param("Kon") * s.interior(P) * s.interior(R)
                        - s.param("DilRate") * s.interior(P)
                }),
            },
            InteriorSpecies {
                name: "R".to_string(),
                initial: Initial::Fixed(10.0),
                rate: rate(|s| {
                    s.param("basal") + s.param("Ksyn")
                        - s.param("Kon") * s.interior(P) * s.interior(R)
                        - s.param("DilRate") * s.interior(R)
                }),
            },
            InteriorSpecies {
                name: "F".to_string(),
                initial: Initial::Fixed(0.0),
                rate: rate(|s| {
                    let r = s.interior(R);
                    s.param("KF") * r / (s.param("Kr") + r) - s.param("DilRate") * s.interior(F)
                }),
            },
        ];
        let exterior = vec![ExteriorSpecies {
            name: "P".to_string(),
            rate: rate(|s| {
                let producing = if s.interior(PRODUCER) > 0.5 { 1.0 } else { 0.0 };
                s.param("Kout") * producing - s.param("Kin") * s.exterior(EXT_P)
            }),
        }];
        let defaults = Parameters::new()
            .with("basal", 0.001)
            .with("Kin", 0.8)
            .with("Kout", 0.007)
            .with("Ksyn", 0.001)
            .with("Kon", 0.005)
            .with("DilRate", 0.00026)
            .with("KF", 0.03)
            .with("Kr", 30.0);
        Self::with_all_required("producer_receiver", interior, exterior, defaults)
    }

    fn with_all_required(
        name: &str,
        interior: Vec<InteriorSpecies>,
        exterior: Vec<ExteriorSpecies>,
        defaults: Parameters,
    ) -> Self {
        let required = defaults.names().map(str::to_string).collect();
        CytoplasmModel { name: name.to_string(), interior, exterior, defaults, required }
    }

    /// One interior species produced at a constant rate and secreted at a constant rate.
    pub fn constant_secretion() -> Self {
        let interior = vec![InteriorSpecies {
            name: "signal".to_string(),
            initial: Initial::Fixed(0.0),
            rate: rate(|s| s.param("production")),
        }];
        let exterior = vec![ExteriorSpecies {
            name: "signal".to_string(),
            rate: rate(|s| s.param("secretion")),
        }];
        let defaults = Parameters::new().with("production", 1.0).with("secretion", 1.0);
        CytoplasmModel {
            name: "constant_secretion".to_string(),
            interior,
            exterior,
            defaults,
            required: vec!["production".to_string(), "secretion".to_string()],
        }
    }

    pub fn interior_index(&self, name: &str) -> Option<usize> {
        self.interior.iter().position(|s| s.name == name)
    }

    /// Checks `params` supplies every constant the rate expressions read.
    pub fn validate(&self, params: &Parameters) -> Result<()> {
        let missing: Vec<&str> = self.required.iter().map(String::as_str).filter(|n| !params.contains(n)).collect();
        if !missing.is_empty() {
            anyhow::bail!("Circuit '{}' is missing kinetic parameters: {}.", self.name, missing.join(", "));
        }
        if let Some(bad) = params.names().find(|n| !params.get(n).is_finite()) {
            anyhow::bail!("Kinetic parameter '{}' of circuit '{}' is not finite.", bad, self.name);
        }
        Ok(())
    }
}
