use serde::{Deserialize, Serialize};

/// Authenticated caller, resolved by the auth middleware
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub email: Option<String>,
}

/// JWT Claims
///
/// Tokens from the account service carry the user id as `id`; standard
/// issuers use `sub`. `exp` is checked when present.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(alias = "sub")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<usize>,
}
