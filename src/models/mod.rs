pub mod subject;

pub use subject::{Subject, SubjectKind};
