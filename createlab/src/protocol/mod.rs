//! Wire-level building blocks shared by the command strategies.

pub mod echo;
pub mod hid;

// Re-export common types
pub use echo::{IoSettings, ReadOutcome, SerialIoHelper};
pub use hid::{CommandIdCounter, HidConnection, InputReport};
