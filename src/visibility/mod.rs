pub mod gate;

pub use gate::{GateTransition, VisibilityGate, VisibilitySignals};
