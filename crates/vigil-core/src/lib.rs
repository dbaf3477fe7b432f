pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod provider;

pub use config::{AgentCfg, HostCfg, SerialCfg, VigilConfig, ZfsCfg};
pub use error::{VigilError, VigilResult};
pub use model::{
    Device, ErrorCounts, HealthState, Pool, Report, ScanFunction, ScanInfo, ScanState,
    ScrubRecord, VdevType,
};
pub use provider::{ToolOutput, ZpoolTool};
