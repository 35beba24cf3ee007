use serde::{Deserialize, Serialize};

use crate::data::MalformedPolicy;

/// Settings that change how a site is built.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    /// What to do with a recognized data file that fails to parse
    pub on_malformed: MalformedPolicy,
}
