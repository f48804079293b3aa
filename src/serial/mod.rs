//! Serial line commands and the mirrors that follow them.

pub mod command;
pub mod mirror;

pub use command::SerialCommand;
pub use mirror::{MirroredValue, MonitoredRegister, SerialCommandMirror};
