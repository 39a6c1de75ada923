use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Whether discovery still sees an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    #[default]
    Normal,
    Lost,
}

impl DiscoveryStatus {
    /// Value stored in the discovery-record `status` column.
    pub const fn code(self) -> i64 {
        match self {
            DiscoveryStatus::Normal => 0,
            DiscoveryStatus::Lost => 1,
        }
    }
}

impl TryFrom<i64> for DiscoveryStatus {
    type Error = CoreError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(DiscoveryStatus::Normal),
            1 => Ok(DiscoveryStatus::Lost),
            _ => Err(CoreError::UnknownCode {
                kind: "discovery status",
                code,
            }),
        }
    }
}

/// Engine-level object status. Storage encodings are per object kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    #[default]
    Enabled,
    Disabled,
}

impl ObjectStatus {
    /// The other status. A status write always flips between the two, so the
    /// previous value of a written status is its inverse.
    pub const fn inverse(self) -> Self {
        match self {
            ObjectStatus::Enabled => ObjectStatus::Disabled,
            ObjectStatus::Disabled => ObjectStatus::Enabled,
        }
    }
}

/// Who disabled an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableSource {
    #[default]
    Default,
    /// Disabled by discovery because the object was lost for too long.
    LostDiscovery,
}

impl DisableSource {
    /// Value stored in the discovery-record `disable_source` column.
    pub const fn code(self) -> i64 {
        match self {
            DisableSource::Default => 0,
            DisableSource::LostDiscovery => 1,
        }
    }
}

impl TryFrom<i64> for DisableSource {
    type Error = CoreError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(DisableSource::Default),
            1 => Ok(DisableSource::LostDiscovery),
            _ => Err(CoreError::UnknownCode {
                kind: "disable source",
                code,
            }),
        }
    }
}
