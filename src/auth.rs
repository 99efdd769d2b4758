use axum::http::HeaderMap;
use base64::{Engine, engine::general_purpose};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::{HashMap, HashSet};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub permissions: HashSet<String>,
}

impl User {
    pub fn guest() -> Self {
        Self {
            id: 0,
            name: "guest".to_string(),
            permissions: HashSet::new(),
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Users known to the service, keyed by lowercase name.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<String, User>,
}

impl UserDirectory {
    pub fn from_config(users: &[crate::UserConfig]) -> Self {
        let users = users
            .iter()
            .map(|u| {
                let user = User {
                    id: u.id,
                    name: u.name.trim().to_lowercase(),
                    permissions: u.permissions.iter().cloned().collect(),
                };
                (user.name.clone(), user)
            })
            .collect();
        Self { users }
    }

    pub fn get(&self, name: &str) -> Option<&User> {
        self.users.get(&name.trim().to_lowercase())
    }

    /// Resolve the request's user from its session cookie, falling back to
    /// the configured guest account (or a bare guest).
    pub fn current_user(&self, headers: &HeaderMap, secret: &str) -> User {
        if let Some(name) = get_authenticated_user(headers, secret) {
            if let Some(user) = self.get(&name) {
                return user.clone();
            }
            debug!(user = %name, "Session names an unknown user, treating as guest");
        }
        self.get("guest").cloned().unwrap_or_else(User::guest)
    }
}

pub fn create_signed_cookie(secret: &str, value: &str) -> Result<String, String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| "Invalid secret key")?;
    mac.update(value.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);
    Ok(format!("{}:{}", value, signature_b64))
}

pub fn verify_signed_cookie(secret: &str, signed_value: &str) -> bool {
    if let Some((value, signature_b64)) = signed_value.split_once(':')
        && let Ok(signature) = general_purpose::URL_SAFE_NO_PAD.decode(signature_b64)
        && let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes())
    {
        mac.update(value.as_bytes());
        return mac.verify_slice(&signature).is_ok();
    }
    false
}

pub fn get_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get("cookie")?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|cookie| {
            let (key, value) = cookie.trim().split_once('=')?;
            if key.trim() == name {
                Some(value.trim().to_string())
            } else {
                None
            }
        })
}

/// Check the session cookie and return the username it was issued for
pub fn get_authenticated_user(headers: &HeaderMap, secret: &str) -> Option<String> {
    get_cookie_value(headers, SESSION_COOKIE).and_then(|signed_value| {
        if verify_signed_cookie(secret, &signed_value) {
            signed_value.split(':').next().map(|s| s.to_string())
        } else {
            None
        }
    })
}
