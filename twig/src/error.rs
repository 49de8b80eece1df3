//! Error types, one per failure class: partial collection, fatal startup,
//! authorization and connection.

use std::path::PathBuf;
use thiserror::Error;

/// A single section of a snapshot could not be read. Never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectError {
    #[error("{0} is not readable: {1}")]
    Unreadable(&'static str, String),

    #[error("{0} reported no data")]
    Empty(&'static str),

    #[error("probe panicked while reading {0}")]
    Panicked(&'static str),
}

impl CollectError {
    pub fn unreadable<S: Into<String>>(section: &'static str, msg: S) -> Self {
        Self::Unreadable(section, msg.into())
    }
}

/// The machine identity could not be derived. Aborts startup.
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("machine id source {path} is unreadable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("machine id source {0} is empty")]
    Empty(String),

    #[error("no machine id source available on this platform")]
    NoSource,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,

    #[error("invalid credential")]
    Invalid,
}

/// Why a subscriber stopped receiving snapshots.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("subscriber fell behind and was disconnected")]
    Overflowed,

    #[error("snapshot cache closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::Invalid(msg.into())
    }
}
