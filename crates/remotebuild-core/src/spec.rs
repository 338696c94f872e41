//! Submitted build specifications.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Kind of package build. Each kind maps to one container image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Aur,
}

impl JobType {
    pub const ALL: [JobType; 1] = [JobType::Aur];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Aur => "aur",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aur" => Ok(JobType::Aur),
            other => Err(Error::Validation(format!("unknown job type: {}", other))),
        }
    }
}

/// Destination kind for built artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadType {
    /// No method selected. Uploading with it always fails.
    #[default]
    None,
    #[serde(rename = "dmanager")]
    DataManager,
    #[serde(rename = "local")]
    LocalStorage,
}

impl UploadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadType::None => "none",
            UploadType::DataManager => "dmanager",
            UploadType::LocalStorage => "local",
        }
    }
}

impl fmt::Display for UploadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(UploadType::None),
            "dmanager" => Ok(UploadType::DataManager),
            "local" => Ok(UploadType::LocalStorage),
            other => Err(Error::Validation(format!("unknown upload type: {}", other))),
        }
    }
}

/// Argument keys understood by builds and uploads.
pub mod keys {
    pub const AUR_PACKAGE: &str = "aur_package";
    pub const DISABLE_CCACHE: &str = "disable_ccache";
    pub const DM_HOST: &str = "dm_host";
    pub const DM_USER: &str = "dm_user";
    pub const DM_TOKEN: &str = "dm_token";
    pub const DM_NAMESPACE: &str = "dm_namespace";
}

/// Free-form key/value arguments of a build request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildArgs(BTreeMap<String, String>);

impl BuildArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Value of `key`, treating blank strings as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn has_data_manager_args(&self) -> bool {
        self.data_manager().is_some()
    }

    pub fn has_namespace(&self) -> bool {
        self.get(keys::DM_NAMESPACE).is_some()
    }

    /// DataManager credentials, present only when host, user and token are all set.
    pub fn data_manager(&self) -> Option<DataManagerArgs> {
        Some(DataManagerArgs {
            host: self.get(keys::DM_HOST)?.to_string(),
            username: self.get(keys::DM_USER)?.to_string(),
            token: self.get(keys::DM_TOKEN)?.to_string(),
            namespace: self.get(keys::DM_NAMESPACE).map(str::to_string),
        })
    }
}

impl FromIterator<(String, String)> for BuildArgs {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataManagerArgs {
    pub host: String,
    pub username: String,
    /// Base64 encoded session token.
    pub token: String,
    pub namespace: Option<String>,
}

/// A build request as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub job_type: JobType,
    #[serde(default)]
    pub upload_type: UploadType,
    #[serde(default)]
    pub args: BuildArgs,
}
