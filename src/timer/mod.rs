pub mod state;

pub use state::{AccrualState, DurationAccumulator};
