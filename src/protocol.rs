//! Pendant message catalog.
//!
//! Typed views of the JSON messages exchanged with the control backend.
//! Every message is an object whose `type` field selects the variant; the
//! channel itself only looks at that field, so these types are a
//! convenience for hosts and never required to use [`crate::channel`].

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelError, InboundMessage, OutboundMessage};

/// Jog reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JogMode {
    /// Move a single joint.
    #[default]
    Joint,
    /// Move the end effector along a Cartesian axis.
    Cartesian,
}

/// Positions of the six joints of the RRPRRR arm (degrees, mm for the prismatic joint).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct JointPositions {
    /// Joint 1, revolute.
    pub base_rotation: f64,
    /// Joint 2, revolute.
    pub shoulder_rotation: f64,
    /// Joint 3, prismatic (mm).
    pub prismatic_extension: f64,
    /// Joint 4, revolute.
    pub elbow_rotation: f64,
    /// Joint 5, revolute. Older backends call it `wrist_rotation`.
    #[serde(alias = "wrist_rotation")]
    pub elbow2_rotation: f64,
    /// Joint 6, revolute.
    pub end_effector_rotation: f64,
}

/// End-effector pose (mm, degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EePosition {
    /// X (mm).
    pub x: f64,
    /// Y (mm).
    pub y: f64,
    /// Z (mm).
    pub z: f64,
    /// Rotation about X (degrees).
    pub roll: f64,
    /// Rotation about Y (degrees).
    pub pitch: f64,
    /// Rotation about Z (degrees).
    pub yaw: f64,
}

/// Command sent from the pendant to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    /// Move one step of `increment` in `direction`.
    #[serde(rename = "jog_increment")]
    JogIncrement {
        /// Reference frame.
        mode: JogMode,
        /// Joint name, in joint mode.
        #[serde(skip_serializing_if = "Option::is_none")]
        joint: Option<String>,
        /// `x`, `y`, `z`, `roll`, `pitch` or `yaw`, in Cartesian mode.
        #[serde(skip_serializing_if = "Option::is_none")]
        axis: Option<String>,
        /// -1 or 1.
        direction: i8,
        /// Step size (degrees or mm).
        increment: f64,
    },
    /// Start continuous jogging until `jog_stop`.
    #[serde(rename = "jog_start")]
    JogStart {
        /// Reference frame.
        mode: JogMode,
        /// Joint name, in joint mode.
        #[serde(skip_serializing_if = "Option::is_none")]
        joint: Option<String>,
        /// Cartesian axis, in Cartesian mode.
        #[serde(skip_serializing_if = "Option::is_none")]
        axis: Option<String>,
        /// -1 or 1.
        direction: i8,
        /// Percent of maximum velocity (1-100).
        #[serde(skip_serializing_if = "Option::is_none")]
        velocity: Option<u8>,
    },
    /// End continuous jogging.
    #[serde(rename = "jog_stop")]
    JogStop,
    /// Change the continuous jog velocity.
    #[serde(rename = "jog_velocity")]
    JogVelocity {
        /// Percent of maximum velocity (1-100).
        velocity: u8,
    },
    /// Joint-space move to absolute positions.
    #[serde(rename = "moveJ")]
    MoveJ {
        /// Target joint positions.
        joint_positions: JointPositions,
        /// Percent of maximum velocity.
        #[serde(skip_serializing_if = "Option::is_none")]
        velocity: Option<u8>,
    },
    /// Linear move of the end effector.
    #[serde(rename = "moveL")]
    MoveL {
        /// Target end-effector pose.
        position: EePosition,
        /// Percent of maximum velocity.
        #[serde(skip_serializing_if = "Option::is_none")]
        velocity: Option<u8>,
    },
    /// Stop all motion immediately.
    #[serde(rename = "emergency_stop")]
    EmergencyStop,
}

impl Command {
    /// Single jog step for a joint.
    #[must_use]
    pub fn jog_joint(joint: impl Into<String>, direction: i8, increment: f64) -> Self {
        Self::JogIncrement {
            mode: JogMode::Joint,
            joint: Some(joint.into()),
            axis: None,
            direction: direction.signum(),
            increment,
        }
    }

    /// Single jog step along a Cartesian axis.
    #[must_use]
    pub fn jog_axis(axis: impl Into<String>, direction: i8, increment: f64) -> Self {
        Self::JogIncrement {
            mode: JogMode::Cartesian,
            joint: None,
            axis: Some(axis.into()),
            direction: direction.signum(),
            increment,
        }
    }
}

impl TryFrom<&Command> for OutboundMessage {
    type Error = ChannelError;

    fn try_from(command: &Command) -> Result<Self, Self::Error> {
        OutboundMessage::from_serialize(command)
    }
}

/// Stage of a running program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramStatus {
    /// Execution began.
    Started,
    /// A step is about to run.
    StepStarted,
    /// A step finished.
    StepCompleted,
    /// A step could not be carried out.
    StepFailed,
    /// Execution stopped early.
    Failed,
    /// Every step ran.
    Completed,
}

/// Message pushed from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Telemetry {
    /// Current arm pose. Sent on connect and after every move.
    #[serde(rename = "position_update")]
    PositionUpdate {
        /// Seconds since the Unix epoch.
        timestamp: f64,
        /// Joint positions.
        joint_positions: JointPositions,
        /// End-effector pose.
        ee_position: EePosition,
    },
    /// Program execution progress.
    #[serde(rename = "program_execution")]
    ProgramExecution {
        /// Stage reached.
        status: ProgramStatus,
        /// Program being run.
        program_id: String,
        /// 1-based index of the current step.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_index: Option<u32>,
        /// Step kind, such as `moveJ` or `wait`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_type: Option<String>,
        /// Step that ended a failed run.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_step: Option<u32>,
        /// Seconds since the Unix epoch.
        timestamp: f64,
    },
    /// Continuous jogging ended.
    #[serde(rename = "jog_stop")]
    JogStop,
    /// The emergency stop was triggered.
    #[serde(rename = "emergency_stop")]
    EmergencyStop,
}

impl TryFrom<&InboundMessage> for Telemetry {
    type Error = ChannelError;

    fn try_from(message: &InboundMessage) -> Result<Self, Self::Error> {
        message.decode()
    }
}

impl std::fmt::Display for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PositionUpdate {
                joint_positions: j,
                ee_position: p,
                ..
            } => write!(
                f,
                "position base={:.1} shoulder={:.1} ext={:.1} elbow={:.1} elbow2={:.1} ee={:.1} | x={:.1} y={:.1} z={:.1} r={:.1} p={:.1} y={:.1}",
                j.base_rotation,
                j.shoulder_rotation,
                j.prismatic_extension,
                j.elbow_rotation,
                j.elbow2_rotation,
                j.end_effector_rotation,
                p.x,
                p.y,
                p.z,
                p.roll,
                p.pitch,
                p.yaw
            ),
            Self::ProgramExecution {
                status,
                program_id,
                step_index,
                step_type,
                failed_step,
                ..
            } => {
                write!(f, "program {program_id} {status:?}")?;
                if let Some(index) = step_index {
                    write!(f, " step {index}")?;
                }
                if let Some(kind) = step_type {
                    write!(f, " ({kind})")?;
                }
                if let Some(step) = failed_step {
                    write!(f, " failed at step {step}")?;
                }
                Ok(())
            }
            Self::JogStop => write!(f, "jog stopped"),
            Self::EmergencyStop => write!(f, "EMERGENCY STOP"),
        }
    }
}
