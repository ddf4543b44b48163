//! Error types for the router.

use std::io;

use crate::interface::InterfaceId;
use crate::protocol::Protocol;

/// Rejections of a tap-inject request or of the daemon configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no protocols specified")]
    NoProtocols,

    #[error("unknown protocol '{0}'")]
    UnknownProtocol(String),

    #[error("{protocol} requires {requires}")]
    MissingPrerequisite {
        protocol: Protocol,
        requires: &'static str,
    },

    #[error("interface {0} does not exist")]
    UnknownInterface(InterfaceId),

    #[error("interface '{0}' does not exist")]
    UnknownInterfaceName(String),

    #[error("tap name not specified")]
    MissingTapName,

    #[error("invalid tap name '{0}' (1-15 characters, no '/' or whitespace)")]
    InvalidTapName(String),

    #[error("invalid MAC address '{0}'")]
    InvalidMac(String),

    #[error("duplicate interface {0}")]
    DuplicateInterface(String),

    #[error("failed to read config {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Failures while creating and wiring a host TAP device.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to open /dev/net/tun: {0}")]
    OpenTun(io::Error),

    #[error("failed to create tap '{0}': {1}")]
    Create(String, io::Error),

    #[error("failed to get interface index for '{0}': {1}")]
    IfIndex(String, io::Error),

    #[error("failed to set hardware address of '{0}': {1}")]
    HwAddr(String, io::Error),

    #[error("failed to set link state of '{0}': {1}")]
    LinkState(String, io::Error),

    #[error("failed to attach tap '{0}' to the dataplane: {1}")]
    Attach(String, DataplaneError),

    #[error("failed to cross-connect tap '{0}': {1}")]
    Xconnect(String, DataplaneError),

    #[error("failed to bring tap '{0}' up in the dataplane: {1}")]
    AdminUp(String, DataplaneError),

    #[error("interface {0} has no hardware address")]
    NoHardwareAddress(InterfaceId),
}

/// Failures reported by a dataplane mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataplaneError {
    #[error("no such interface {0}")]
    NoSuchInterface(InterfaceId),

    #[error("interface {0} already exists")]
    InterfaceExists(InterfaceId),

    #[error("interface name '{0}' already in use")]
    NameInUse(String),
}

/// Top-level router error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Dataplane(#[from] DataplaneError),

    #[error("netlink: {0}")]
    Netlink(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
