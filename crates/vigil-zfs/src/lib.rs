//! ZFS state extraction for the Vigil agent. `collector` drives one cycle;
//! `list`, `status`, `scan` and `tree` turn `zpool` text into the core model,
//! while `identity` and `serial` tie vdevs back to physical drives.

pub mod collector;
pub mod command;
pub mod history;
pub mod host;
pub mod human;
pub mod identity;
pub mod list;
pub mod locate;
pub mod scan;
pub mod serial;
pub mod status;
pub mod system;
pub mod tree;

pub use collector::ZfsCollector;
pub use command::{CancelToken, CommandRunner};
pub use identity::{IdentityResolver, STRATEGIES};
pub use locate::{ToolLocator, DEFAULT_SEARCH_DIRS};
pub use serial::{DeviceSerialMap, SerialCorrelator, SerialTools};
pub use system::SystemZpool;
