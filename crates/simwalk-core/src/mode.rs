//! ---
//! sw_section: "02-orchestration"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Walk mode resolution from the raw argument vector."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
//! Classification of the positional argument vector into a walk mode.
//!
//! Four shapes are recognised, keyed on length and keyword position:
//!
//! | len | keywords                          | control  | mode label          |
//! |-----|-----------------------------------|----------|---------------------|
//! | 6   | `[0] == vel`, `[2] == generator`  | velocity | `[1] + " " + [2]`   |
//! | 5   | `[0] == vel`                      | velocity | `[1]`               |
//! | 5   | `[1] == generator`                | torque   | `[0] + " " + [1]`   |
//! | 4   | none                              | torque   | `[0]`               |
//!
//! Trailing tokens are launcher bookkeeping and are ignored.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

pub const VELOCITY_KEYWORD: &str = "vel";
pub const PATTERN_GENERATOR: &str = "pattern_generator";

pub const VELOCITY_EXECUTABLE: &str = "integ_sim_walk_vel.py";
pub const VELOCITY_NODE: &str = "sim_walk_vel_py";
pub const TORQUE_EXECUTABLE: &str = "integ_sim_walk_torque.py";
pub const TORQUE_NODE: &str = "sim_walk_torque_py";

/// Which walking test executable drives the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Velocity,
    Torque,
}

impl ControlKind {
    pub fn executable(&self) -> &'static str {
        match self {
            ControlKind::Velocity => VELOCITY_EXECUTABLE,
            ControlKind::Torque => TORQUE_EXECUTABLE,
        }
    }

    pub fn node_name(&self) -> &'static str {
        match self {
            ControlKind::Velocity => VELOCITY_NODE,
            ControlKind::Torque => TORQUE_NODE,
        }
    }
}

/// The recognised argument vector shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentShape {
    VelocityWithGenerator,
    Velocity,
    TorqueWithGenerator,
    Torque,
}

impl ArgumentShape {
    /// Classify an argument vector, `None` when no shape matches.
    pub fn classify<S: AsRef<str>>(args: &[S]) -> Option<Self> {
        match args {
            [vel, _, generator, _, _, _]
                if vel.as_ref() == VELOCITY_KEYWORD && generator.as_ref() == PATTERN_GENERATOR =>
            {
                Some(ArgumentShape::VelocityWithGenerator)
            }
            [vel, _, _, _, _] if vel.as_ref() == VELOCITY_KEYWORD => Some(ArgumentShape::Velocity),
            [_, generator, _, _, _] if generator.as_ref() == PATTERN_GENERATOR => {
                Some(ArgumentShape::TorqueWithGenerator)
            }
            [_, _, _, _] => Some(ArgumentShape::Torque),
            _ => None,
        }
    }

    pub fn control(&self) -> ControlKind {
        match self {
            ArgumentShape::VelocityWithGenerator | ArgumentShape::Velocity => ControlKind::Velocity,
            ArgumentShape::TorqueWithGenerator | ArgumentShape::Torque => ControlKind::Torque,
        }
    }
}

/// Immutable description of the walk to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkMode {
    walk_kind: String,
    generator_kind: Option<String>,
    control: ControlKind,
}

impl WalkMode {
    pub fn walk_kind(&self) -> &str {
        &self.walk_kind
    }

    pub fn generator_kind(&self) -> Option<&str> {
        self.generator_kind.as_deref()
    }

    pub fn control(&self) -> ControlKind {
        self.control
    }

    pub fn executable(&self) -> &'static str {
        self.control.executable()
    }

    pub fn node_name(&self) -> &'static str {
        self.control.node_name()
    }

    /// Mode string handed to the test executable, e.g. `"on_spot pattern_generator"`.
    pub fn label(&self) -> String {
        match &self.generator_kind {
            Some(generator) => format!("{} {}", self.walk_kind, generator),
            None => self.walk_kind.clone(),
        }
    }

    /// The mode split into separate argv tokens.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.walk_kind.clone()];
        args.extend(self.generator_kind.clone());
        args
    }
}

impl fmt::Display for WalkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.executable())
    }
}

/// Resolve the walk mode from the arguments following the program name.
pub fn resolve<S: AsRef<str>>(args: &[S]) -> Result<WalkMode> {
    let arg = |index: usize| args[index].as_ref().to_owned();
    let shape = ArgumentShape::classify(args).ok_or_else(|| HarnessError::InvalidArguments {
        args: args.iter().map(|a| a.as_ref().to_owned()).collect(),
    })?;
    let (walk_kind, generator_kind) = match shape {
        ArgumentShape::VelocityWithGenerator => (arg(1), Some(arg(2))),
        ArgumentShape::Velocity => (arg(1), None),
        ArgumentShape::TorqueWithGenerator => (arg(0), Some(arg(1))),
        ArgumentShape::Torque => (arg(0), None),
    };
    Ok(WalkMode {
        walk_kind,
        generator_kind,
        control: shape.control(),
    })
}
