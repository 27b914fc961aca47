//! Identity of the physical device a session opens.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which acquisition server, device and camera configuration to open.
///
/// Immutable for the duration of one session. The server name is only
/// checked by the SDK when the session opens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub server_name: String,
    pub device_index: u32,
    pub config_file: PathBuf,
}

impl DeviceIdentity {
    pub fn new(
        server_name: impl Into<String>,
        device_index: u32,
        config_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            device_index,
            config_file: config_file.into(),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] ({})",
            self.server_name,
            self.device_index,
            self.config_file.display()
        )
    }
}
