//! One verifier per platform. Each runs decode, then signature (and chain)
//! verification, then policy, and never reorders them.

pub mod azure;
pub mod gcp;
mod jwt;
pub mod nitro;

pub use azure::AzureVerifier;
pub use gcp::GcpVerifier;
pub use nitro::NitroVerifier;
