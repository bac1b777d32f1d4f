use std::net::SocketAddr;
use thiserror::Error;

/// Error type for registry mutations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid identity '{0}' (3-20 characters of letters, digits, '_', '-', '.')")]
    InvalidIdentity(String),

    #[error("Identity '{0}' is already in the session")]
    DuplicateIdentity(String),

    #[error("Unknown identity '{0}'")]
    UnknownIdentity(String),

    #[error("Session is full ({0} endpoints)")]
    RegistryFull(usize),

    #[error("Media address {addr} does not belong to the control host of '{identity}'")]
    AddressMismatch { identity: String, addr: SocketAddr },

    #[error("Media address {0} is bound to another endpoint")]
    AddressInUse(SocketAddr),
}
