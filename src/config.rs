// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Configuration of a client node.

use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::message::Action;

/// Publishing interval of the data change subscription when none is configured, in ms.
pub const DEFAULT_PUBLISHING_INTERVAL: f64 = 1000.0;

/// A trait that handles the loading / saving and validity of configuration information.
pub trait Config: Serialize {
    fn save(&self, path: &Path) -> Result<(), ()> {
        if !self.is_valid() {
            error!("Config isn't valid and won't be saved");
            return Err(());
        }
        let s = serde_yaml::to_string(&self).map_err(|err| {
            error!("Cannot serialize configuration, error reason: {}", err);
        })?;
        let mut f = File::create(path).map_err(|err| {
            error!(
                "Cannot create the path {} to save the config, error = {}",
                path.to_string_lossy(),
                err
            );
        })?;
        f.write_all(s.as_bytes()).map_err(|err| {
            error!("Could not save config - error = {:?}", err);
        })
    }

    fn load<A>(path: &Path) -> Result<A, ()>
    where
        for<'de> A: Config + Deserialize<'de>,
    {
        let mut f = File::open(path).map_err(|_| {
            error!("Cannot open configuration file {}", path.to_string_lossy());
        })?;
        let mut s = String::new();
        f.read_to_string(&mut s).map_err(|_| {
            error!(
                "Cannot read configuration file {} to string",
                path.to_string_lossy()
            );
        })?;
        serde_yaml::from_str(&s).map_err(|err| {
            error!(
                "Cannot deserialize configuration from {}, error reason: {}",
                path.to_string_lossy(),
                err
            );
        })
    }

    fn is_valid(&self) -> bool;
}

/// Settings of one client node. Resolved once when the node starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientNodeConfig {
    /// Name of the node, prefixed to reported errors
    #[serde(default)]
    pub name: String,
    /// Endpoint url, e.g. `opc.tcp://localhost:4855/`
    pub endpoint: String,
    /// Action performed on each inbound message. Without one messages pass through.
    #[serde(default)]
    pub action: Option<Action>,
    /// Publishing interval of the data change subscription in milliseconds
    #[serde(default = "ClientNodeConfig::default_time")]
    pub time: f64,
    /// Forward verbose diagnostics to the host's log as well
    #[serde(default)]
    pub verbose: bool,
}

impl ClientNodeConfig {
    pub fn new<T>(endpoint: T, action: Option<Action>) -> ClientNodeConfig
    where
        T: Into<String>,
    {
        ClientNodeConfig {
            name: String::new(),
            endpoint: endpoint.into(),
            action,
            time: DEFAULT_PUBLISHING_INTERVAL,
            verbose: false,
        }
    }

    fn default_time() -> f64 {
        DEFAULT_PUBLISHING_INTERVAL
    }
}

impl Config for ClientNodeConfig {
    fn is_valid(&self) -> bool {
        let mut valid = true;
        if self.endpoint.is_empty() {
            error!("Endpoint url is empty");
            valid = false;
        } else if !self.endpoint.starts_with("opc.tcp://") {
            error!("Endpoint url {} is not an opc.tcp:// url", self.endpoint);
            valid = false;
        }
        if !(self.time.is_finite() && self.time > 0.0) {
            error!("Publishing interval {} is not a positive number", self.time);
            valid = false;
        }
        valid
    }
}
