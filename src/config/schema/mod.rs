mod env_overrides;
mod loader;
#[cfg(test)]
mod test_env;
mod types;

pub use types::{
    Config, DispatcherConfig, ExtensionConfig, HostGaConfig, PathsConfig, ReliabilityConfig,
};
