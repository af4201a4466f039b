//! Per-tenant repository settings carried to the repository worker.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryAuthMethod {
    #[default]
    UsernamePassword,
    PrivateKey,
}

/// Connection settings for a tenant's remote repository.
///
/// Secrets (`password`, `private_key`, `private_key_password`) are stripped
/// before settings are returned to callers and restored from the stored copy
/// when a caller saves settings without them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySettings {
    pub repository_uri: String,
    pub auth_method: RepositoryAuthMethod,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub private_key_file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub private_key_password: Option<String>,
    pub default_branch: String,
    pub read_only: bool,
    pub show_merge_commits: bool,
}

impl RepositorySettings {
    #[must_use]
    pub fn new(repository_uri: impl Into<String>, default_branch: impl Into<String>) -> Self {
        Self {
            repository_uri: repository_uri.into(),
            default_branch: default_branch.into(),
            ..Self::default()
        }
    }

    /// Copy of these settings with every secret removed.
    #[must_use]
    pub fn without_secrets(&self) -> Self {
        Self {
            password: None,
            private_key: None,
            private_key_password: None,
            ..self.clone()
        }
    }

    /// Fills secrets missing from `self` with the ones in `stored`.
    ///
    /// Secrets are only carried over when the auth method is unchanged; a
    /// password never becomes a private key passphrase.
    pub fn restore_secrets_from(&mut self, stored: &RepositorySettings) {
        if self.auth_method != stored.auth_method {
            return;
        }
        match self.auth_method {
            RepositoryAuthMethod::UsernamePassword => {
                if self.password.is_none() {
                    self.password.clone_from(&stored.password);
                }
            }
            RepositoryAuthMethod::PrivateKey => {
                if self.private_key.is_none() {
                    self.private_key.clone_from(&stored.private_key);
                    self.private_key_file_name
                        .clone_from(&stored.private_key_file_name);
                }
                if self.private_key_password.is_none() {
                    self.private_key_password
                        .clone_from(&stored.private_key_password);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> RepositorySettings {
        RepositorySettings {
            username: Some("git".to_string()),
            password: Some("secret".to_string()),
            ..RepositorySettings::new("https://git.example.com/repo.git", "main")
        }
    }

    #[test]
    fn without_secrets_strips_password_and_keys() {
        let mut settings = stored();
        settings.private_key = Some("key".to_string());
        let public = settings.without_secrets();
        assert_eq!(public.password, None);
        assert_eq!(public.private_key, None);
        assert_eq!(public.username.as_deref(), Some("git"));
    }

    #[test]
    fn restore_fills_missing_password() {
        let mut incoming = stored().without_secrets();
        incoming.restore_secrets_from(&stored());
        assert_eq!(incoming.password.as_deref(), Some("secret"));
    }

    #[test]
    fn restore_keeps_explicit_password() {
        let mut incoming = stored();
        incoming.password = Some("rotated".to_string());
        incoming.restore_secrets_from(&stored());
        assert_eq!(incoming.password.as_deref(), Some("rotated"));
    }

    #[test]
    fn restore_skips_when_auth_method_changes() {
        let mut incoming = stored().without_secrets();
        incoming.auth_method = RepositoryAuthMethod::PrivateKey;
        incoming.restore_secrets_from(&stored());
        assert_eq!(incoming.private_key_password, None);
        assert_eq!(incoming.password, None);
    }
}
