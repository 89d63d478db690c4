pub mod schema;

pub use schema::{
    Config, DispatcherConfig, ExtensionConfig, HostGaConfig, PathsConfig, ReliabilityConfig,
};
