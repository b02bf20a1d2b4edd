#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use flow_sensor_k8s_index as index;
pub use flow_sensor_manager as manager;
pub use flow_sensor_transport as transport;

mod args;

pub use self::args::Args;
