//! Simulation error type.
//!
//! Every failure here is a programming or configuration error. Nothing is
//! retried and nothing is downgraded to a warning; callers decide how to react.

use std::fmt;

use thiserror::Error;

use crate::{pedestrian::PedestrianId, position::Position};

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotImplemented = 2,
    InvalidCoordinates = 4,
    CellOccupied = 7,
    CellBlocked = 8,
    CellNotOccupied = 9,
    ValueNotInitialized = 10,
    AlreadyInCell = 11,
    CannotMove = 12,
    InvalidConfiguration = 13,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// A single problem found while validating a scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigIssue {
    /// Dotted path of the offending field, e.g. `spawners[0].targets`.
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigIssue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("coordinates ({x}, {y}) are outside of the grid")]
    InvalidCoordinates { x: i32, y: i32 },

    #[error("cell {position} is blocked by an obstacle and cannot be entered")]
    CellBlocked { position: Position },

    #[error("cell {position} is already occupied by pedestrian {occupant}")]
    CellOccupied {
        position: Position,
        occupant: PedestrianId,
    },

    #[error("cell {position} is not occupied")]
    CellNotOccupied { position: Position },

    #[error("pedestrian is already in cell {position} and can't target it")]
    AlreadyInCell { position: Position },

    #[error("pedestrian {pedestrian} can't move")]
    CannotMove { pedestrian: PedestrianId },

    #[error("{value} has not been initialized yet")]
    NotInitialized { value: &'static str },

    #[error("unsupported {kind}: {value:?}")]
    Unsupported { kind: &'static str, value: String },

    #[error("invalid configuration: {}", join_issues(.0))]
    InvalidConfig(Vec<ConfigIssue>),
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SimulationError {
    pub fn code(&self) -> ErrorCode {
        use SimulationError::*;

        match self {
            InvalidCoordinates { .. } => ErrorCode::InvalidCoordinates,
            CellBlocked { .. } => ErrorCode::CellBlocked,
            CellOccupied { .. } => ErrorCode::CellOccupied,
            CellNotOccupied { .. } => ErrorCode::CellNotOccupied,
            AlreadyInCell { .. } => ErrorCode::AlreadyInCell,
            CannotMove { .. } => ErrorCode::CannotMove,
            NotInitialized { .. } => ErrorCode::ValueNotInitialized,
            Unsupported { .. } => ErrorCode::NotImplemented,
            InvalidConfig(_) => ErrorCode::InvalidConfiguration,
        }
    }

    pub(crate) fn unsupported(kind: &'static str, value: &str) -> Self {
        SimulationError::Unsupported {
            kind,
            value: value.to_owned(),
        }
    }
}

pub type SimResult<T> = Result<T, SimulationError>;
