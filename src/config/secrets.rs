//! Secret handling utilities.
//!
//! Re-exports the secrecy types used by [`Config`](super::Config), plus a
//! helper for logging connection strings without their credentials.

pub use secrecy::{ExposeSecret, SecretString};

/// Render a database URL with any password replaced by `***`.
pub fn redacted_url(url: &SecretString) -> String {
    let raw = url.expose_secret();
    let Some((scheme, rest)) = raw.split_once("://") else {
        return "***".to_string();
    };
    match rest.split_once('@') {
        Some((creds, host)) => {
            let user = creds.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_masked() {
        let url = SecretString::from("postgres://workq:hunter2@db:5432/workq");
        assert_eq!(redacted_url(&url), "postgres://workq:***@db:5432/workq");
    }

    #[test]
    fn url_without_credentials_is_unchanged() {
        let url = SecretString::from("postgres://db/workq");
        assert_eq!(redacted_url(&url), "postgres://db/workq");
    }
}
