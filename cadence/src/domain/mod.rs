//! Domain types shared by the scheduler and executors

mod key;
mod outcome;

pub use key::Key;
pub use outcome::{AttemptKind, Outcome};
