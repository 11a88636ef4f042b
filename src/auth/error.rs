//! Typed failures of the authorization code flow.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No authorization code in callback URL")]
    MissingCode,

    #[error("Authorization denied ({error}): {description}")]
    Denied { error: String, description: String },

    #[error("Timed out after {waited:?} waiting for redirect to {marker}")]
    RedirectTimeout { waited: Duration, marker: String },

    #[error("Token endpoint returned HTTP {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
}
