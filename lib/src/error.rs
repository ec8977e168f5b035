use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("invalid cluster spec: {0}")]
    InvalidSpec(String),
    #[error("timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },
    #[error("instance {id} entered state {status} while waiting for it to run")]
    InstanceLost { id: String, status: String },
    #[error("instance {0} has no public address")]
    MissingPublicAddress(String),
    #[error("no instance found with public address {0}")]
    InstanceNotFound(IpAddr),
    #[error("could not find a join command in the output of {0}")]
    JoinCommandUnavailable(String),
    #[error("join command still contains placeholder {0}")]
    UnresolvedPlaceholder(&'static str),
    #[error("kubeadm init failed on primary master {address}: {stderr}")]
    PrimaryInitFailed { address: IpAddr, stderr: String },
    #[error("provider returned no key material for key pair {0}")]
    KeyMaterialMissing(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("error encoding json")]
    Serde(#[from] serde_json::Error),
}

/// An error reported by the cloud provider, keyed by the provider's error code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub code: Option<String>,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn is_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "provider error {}: {}", code, self.message),
            None => write!(f, "provider error: {}", self.message),
        }
    }
}
