use anyhow::{Context, Result};
use legato_core::{Axes, AxesLocation, AxisConfig, MotionOptions, PlannerConfig};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{collections::BTreeMap, fs, path::Path};

/// Machine configuration: planner settings and the axes it drives
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub axes: Vec<AxisConfig>,
}

/// A list of moves to plan, in order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    /// Home all axes before the first move
    #[serde(default)]
    pub home: bool,

    #[serde(default)]
    pub moves: Vec<MoveRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Target coordinate by axis name. Axes not named keep their location.
    pub target: BTreeMap<String, f64>,

    /// Fraction of the axis limits to move with
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Allow the planner to blend through this waypoint
    #[serde(default)]
    pub blend: bool,

    #[serde(default)]
    pub uncoordinated: bool,

    /// Skip backlash compensation
    #[serde(default)]
    pub speed_over_precision: bool,

    #[serde(default)]
    pub safe_zone: bool,

    /// Execute and wait for still-stand after this move
    #[serde(default)]
    pub wait: bool,
}

fn default_speed() -> f64 {
    1.0
}

/// Read a TOML or JSON file, detecting the format from the extension
fn from_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => from_toml(&content),
        Some("json") => from_json(&content),
        _ => from_toml(&content).or_else(|_| from_json(&content)),
    }
    .with_context(|| format!("invalid file {}", path.display()))
}

fn from_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    toml::from_str(content).context("failed to parse TOML")
}

fn from_json<T: DeserializeOwned>(content: &str) -> Result<T> {
    serde_json::from_str(content).context("failed to parse JSON")
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        from_file(path.as_ref())
    }

    #[allow(dead_code)]
    pub fn from_toml(content: &str) -> Result<Self> {
        from_toml(content)
    }

    #[allow(dead_code)]
    pub fn from_json(content: &str) -> Result<Self> {
        from_json(content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.axes.is_empty() {
            anyhow::bail!("at least one axis must be configured");
        }
        if self.planner.completion_timeout <= 0.0 {
            anyhow::bail!("planner.completion_timeout must be positive");
        }
        if self.planner.maximum_plan_history < 0.0 {
            anyhow::bail!("planner.maximum_plan_history cannot be negative");
        }

        for (i, axis) in self.axes.iter().enumerate() {
            let name = &axis.name;
            if name.is_empty() {
                anyhow::bail!("axes[{i}].name cannot be empty");
            }
            if self.axes[..i].iter().any(|other| other.name == *name) {
                anyhow::bail!("axis {name} is configured twice");
            }
            if axis.resolution <= 0.0 {
                anyhow::bail!("axis {name}: resolution must be positive");
            }
            if axis.velocity_max <= 0.0 || axis.acceleration_max <= 0.0 {
                anyhow::bail!(
                    "axis {name}: velocity_max and acceleration_max must be positive"
                );
            }
            if axis.jerk_max < 0.0 {
                anyhow::bail!("axis {name}: jerk_max cannot be negative");
            }
            if axis.backlash_speed_factor <= 0.0 {
                anyhow::bail!("axis {name}: backlash_speed_factor must be positive");
            }
            if let (Some(low), Some(high)) = (axis.soft_limit_low, axis.soft_limit_high)
                && low > high
            {
                anyhow::bail!(
                    "axis {name}: soft_limit_low {low} is above soft_limit_high {high}"
                );
            }
            if let (Some(low), Some(high)) = (axis.safe_zone_low, axis.safe_zone_high)
                && low > high
            {
                anyhow::bail!(
                    "axis {name}: safe_zone_low {low} is above safe_zone_high {high}"
                );
            }
        }

        Ok(())
    }

    pub fn axes(&self) -> Axes {
        Axes::new(self.axes.iter().cloned())
    }
}

impl Job {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        from_file(path.as_ref())
    }

    #[allow(dead_code)]
    pub fn from_toml(content: &str) -> Result<Self> {
        from_toml(content)
    }
}

impl MoveRequest {
    /// Resolve the axis names against the configured axes.
    pub fn target(&self, axes: &Axes) -> Result<AxesLocation> {
        self.target
            .iter()
            .map(|(name, coordinate)| {
                let axis = axes
                    .by_name(name)
                    .with_context(|| format!("unknown axis {name} in move target"))?;
                Ok((axis.id(), *coordinate))
            })
            .collect()
    }

    pub fn options(&self) -> MotionOptions {
        let mut options = MotionOptions::new();
        if self.blend {
            options = options.with_blend();
        }
        if self.uncoordinated {
            options = options.with_uncoordinated_motion();
        }
        if self.speed_over_precision {
            options = options.with_speed_over_precision();
        }
        if self.safe_zone {
            options = options.with_limit_to_safe_zone();
        }
        options
    }
}
