use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

/// Self-reported gender field from the registration form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

impl Default for Gender {
    fn default() -> Self {
        Gender::Other
    }
}

/// Account model
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub name: String,
    pub mobile: String,
    pub dob: String,
    pub gender: String,
    pub address: String,
    pub role: String,
    pub password_hash: String,
    pub email_verified: bool,
    pub registration_incomplete: bool,
    pub verified_at: Option<String>,
    pub created_at: String,
}

/// Account response (without credential data)
#[derive(Debug, Clone, Serialize)]
pub struct AccountResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub mobile: String,
    pub dob: String,
    pub gender: String,
    pub address: String,
    pub role: String,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<String>,
    pub created_at: String,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            name: account.name,
            mobile: account.mobile,
            dob: account.dob,
            gender: account.gender,
            address: account.address,
            role: account.role,
            email_verified: account.email_verified,
            verified_at: account.verified_at,
            created_at: account.created_at,
        }
    }
}

/// Registration request (profile payload plus credential pair)
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub dob: String,
    #[serde(default)]
    pub gender: Gender,
    pub address: String,
    #[serde(default)]
    pub role: Role,
    pub password: String,
    pub confirm_password: String,
}

/// Login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub account: AccountResponse,
}

/// Activation hand-off included in the registration response
#[derive(Debug, Serialize)]
pub struct ActivationHandoff {
    pub email: String,
    pub expires_in_secs: u64,
}

/// Registration response: the account, a session token (registration signs
/// the user in) and the activation hand-off.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub account: AccountResponse,
    pub activation: ActivationHandoff,
}

/// Current authenticated identity (extracted from JWT)
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub role: Role,
}

/// JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // account id
    pub email: String,
    pub role: String,
    pub jti: String,
    pub exp: usize, // expiration time
    pub iat: usize, // issued at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        assert_eq!(Role::from_str("admin"), Role::Admin);
        assert_eq!(Role::from_str("ADMIN"), Role::Admin);
        assert_eq!(Role::from_str("anything-else"), Role::User);
        assert_eq!(Role::Admin.as_str(), "admin");
        assert_eq!(Role::User.as_str(), "user");
    }

    #[test]
    fn register_request_defaults_role_and_gender() {
        let req: RegisterRequest = serde_json::from_str(
            r#"{
                "name": "Ada",
                "email": "ada@example.com",
                "mobile": "0123456789",
                "dob": "1990-01-01",
                "address": "1 Main St",
                "password": "password1",
                "confirm_password": "password1"
            }"#,
        )
        .unwrap();
        assert_eq!(req.role, Role::User);
        assert_eq!(req.gender, Gender::Other);
    }

    #[test]
    fn account_response_omits_verified_at_until_set() {
        let response = AccountResponse {
            id: "a1".into(),
            email: "ada@example.com".into(),
            name: "Ada".into(),
            mobile: "0123456789".into(),
            dob: "1990-01-01".into(),
            gender: "other".into(),
            address: "1 Main St".into(),
            role: "user".into(),
            email_verified: false,
            verified_at: None,
            created_at: "2026-01-01T00:00:00+00:00".into(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("verified_at").is_none());
        assert_eq!(json["email_verified"], false);
    }
}
