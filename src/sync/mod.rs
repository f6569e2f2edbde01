pub mod controller;
pub mod state;

pub use controller::{
    CachePolicy, FinalizeReason, Registered, Registration, SubjectController, SubjectSnapshot,
};
pub use state::{GateOutcome, SubjectTracker, SyncRequest, SyncState, SyncTrigger};
