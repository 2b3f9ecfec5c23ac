pub mod monitor;

pub use monitor::{AlertEvent, MonitorService, ShutdownHandle};
