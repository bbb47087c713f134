use jsonwebtoken::{decode, DecodingKey, Validation};
use std::collections::HashSet;

use crate::config::JwtConfig;
use crate::error::{AppError, Result};
use crate::models::{Claims, CurrentUser, FileRecord};

/// Auth service: resolves credentials to callers and checks ownership.
/// Credential issuance lives in the account service.
pub struct AuthService;

impl AuthService {
    /// Validate a bearer token and return the caller's claims.
    /// Tokens signed with a rotated-out secret are still accepted.
    pub fn validate_token(token: &str, config: &JwtConfig) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        // Tokens minted at registration carry no expiry
        validation.required_spec_claims = HashSet::new();

        let keys = std::iter::once(config.secret.as_str())
            .chain(config.previous_secrets.iter().map(|s| s.as_str()));

        for secret in keys {
            if let Ok(token_data) = decode::<Claims>(
                token,
                &DecodingKey::from_secret(secret.as_bytes()),
                &validation,
            ) {
                return Ok(token_data.claims);
            }
        }

        Err(AppError::Unauthorized("Invalid or expired token".to_string()))
    }

    /// Resolve a credential to the calling user
    pub fn resolve_caller(token: &str, config: &JwtConfig) -> Result<CurrentUser> {
        let claims = Self::validate_token(token, config)?;
        if claims.id.is_empty() {
            return Err(AppError::Unauthorized("Token has no subject".to_string()));
        }
        Ok(CurrentUser {
            id: claims.id,
            email: claims.email,
        })
    }

    /// Only the owner may read, transform or delete a file
    pub fn authorize_owner(file: &FileRecord, caller_id: &str) -> Result<()> {
        if file.owner_id != caller_id {
            tracing::warn!(
                "Caller {} denied access to file {} owned by {}",
                caller_id,
                file.id,
                file.owner_id
            );
            return Err(AppError::AccessDenied("Access denied".to_string()));
        }
        Ok(())
    }
}
