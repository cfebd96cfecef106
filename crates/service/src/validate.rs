//! Input validation for orchestrator entry points.
//!
//! Every failure is `AuthError::Validation` with a message naming the field.
//! Lengths are counted in characters, not bytes.

use warden_core::{AuthError, AuthResult};

pub const EMAIL_MAX: usize = 255;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 100;
pub const NAME_MIN: usize = 2;
pub const NAME_MAX: usize = 100;
pub const WORKSPACE_NAME_MAX: usize = 100;
pub const AVATAR_URL_MAX: usize = 500;

/// Trimmed, lower-cased form under which emails are stored and looked up.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Validate and normalise an email address.
pub fn email(raw: &str) -> AuthResult<String> {
    let email = normalize_email(raw);
    if email.is_empty() {
        return Err(AuthError::validation("email is required"));
    }
    if email.chars().count() > EMAIL_MAX {
        return Err(AuthError::validation(format!("email must be at most {EMAIL_MAX} characters")));
    }
    if !looks_like_email(&email) {
        return Err(AuthError::validation("email is not a valid address"));
    }
    Ok(email)
}

fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}

pub fn password(raw: &str) -> AuthResult<()> {
    let len = raw.chars().count();
    if len < PASSWORD_MIN {
        return Err(AuthError::validation(format!("password must be at least {PASSWORD_MIN} characters")));
    }
    if len > PASSWORD_MAX {
        return Err(AuthError::validation(format!("password must be at most {PASSWORD_MAX} characters")));
    }
    Ok(())
}

/// Display name of a user; returned trimmed.
pub fn name(raw: &str) -> AuthResult<String> {
    let name = raw.trim();
    let len = name.chars().count();
    if !(NAME_MIN..=NAME_MAX).contains(&len) {
        return Err(AuthError::validation(format!(
            "name must be between {NAME_MIN} and {NAME_MAX} characters"
        )));
    }
    Ok(name.to_string())
}

pub fn workspace_name(raw: &str) -> AuthResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AuthError::validation("workspace name is required"));
    }
    if name.chars().count() > WORKSPACE_NAME_MAX {
        return Err(AuthError::validation(format!(
            "workspace name must be at most {WORKSPACE_NAME_MAX} characters"
        )));
    }
    Ok(name.to_string())
}

/// Absolute http(s) URL for an avatar image.
pub fn avatar_url(raw: &str) -> AuthResult<String> {
    let url = raw.trim();
    if url.chars().count() > AVATAR_URL_MAX {
        return Err(AuthError::validation(format!("avatar_url must be at most {AVATAR_URL_MAX} characters")));
    }
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| AuthError::validation("avatar_url must be an http(s) URL"))?;
    if rest.is_empty() || rest.starts_with('/') || url.chars().any(char::is_whitespace) {
        return Err(AuthError::validation("avatar_url must be an http(s) URL"));
    }
    Ok(url.to_string())
}
