/**
 * Offline KYC Verifier
 * Verifies a signed offline eKYC archive and matches its photo against live captures
 *
 * Stages:
 * - Archive extraction (share-code protected zip)
 * - Enveloped XML signature verification
 * - Demographic record parsing
 * - Face embedding comparison
 */

pub mod archive;
pub mod biometric;
pub mod c14n;
pub mod certificate;
pub mod config;
pub mod credential;
pub mod demographic;
pub mod embedding;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod signature;
pub mod similarity;

pub use error::{ErrorKind, KycError, Result};
