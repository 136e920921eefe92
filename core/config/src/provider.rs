// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod file;

use serde::de::DeserializeOwned;

use crate::component::configuration::Configuration;
use crate::errors::ConfigError;

pub use file::FileConfigProvider;

/// Source of raw configuration text.
pub trait ConfigProvider {
    fn load(&self, location: &str) -> Result<String, ConfigError>;
}

/// Load a YAML document from `provider` and validate it.
pub fn load_yaml<T, P>(provider: &P, location: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Configuration<Error = ConfigError>,
    P: ConfigProvider + ?Sized,
{
    let raw = provider.load(location)?;
    let config: T = serde_yaml::from_str(&raw)?;
    config.validated()
}
