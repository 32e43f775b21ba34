//! Channel naming.
//!
//! A channel is identified by `<namespace>.<port>.<device>.control`. The
//! port and device components come from user configuration and are
//! escaped so the name is a single file name in the shm directory and two
//! different (port, device) pairs never share a name.

use crate::error::{ChannelError, ChannelResult};
use crate::platform::shm_dir;
use mbscript_common::shm::consts::CHANNEL_SUFFIX;
use std::fmt;
use std::path::PathBuf;

/// Validated channel identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    /// Build the name for a device.
    ///
    /// `port` and `device` go through [`escape_component`]. The namespace is
    /// taken as is and must itself be a valid file name fragment.
    pub fn for_device(namespace: &str, port: &str, device: &str) -> ChannelResult<Self> {
        if namespace.is_empty() || device.is_empty() {
            return Err(ChannelError::InvalidName {
                name: format!("{namespace}.{port}.{device}"),
            });
        }
        Self::parse(&format!(
            "{namespace}.{}.{}.{CHANNEL_SUFFIX}",
            escape_component(port),
            escape_component(device)
        ))
    }

    /// Accept an already composed name, as the child receives it.
    pub fn parse(name: &str) -> ChannelResult<Self> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains('/')
            && !name.contains('\0')
            && name.len() <= 255;
        if !valid {
            return Err(ChannelError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(Self(name.to_string()))
    }

    /// Name as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Backing file of the region.
    pub fn path(&self) -> PathBuf {
        shm_dir().join(&self.0)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Escape a name component for use inside a channel or file name.
///
/// `[A-Za-z0-9_-]` is kept; every other byte, `.` and `%` included, becomes
/// `%XX`. The mapping is injective and the result never contains a `.`.
pub fn escape_component(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for byte in component.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
