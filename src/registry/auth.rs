use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// GitHub token; the registry expects it base64-encoded as the bearer value.
pub const GITHUB_TOKEN_VAR: &str = "GITHUB_TOKEN";
/// GitLab token; sent to the registry as is.
pub const GITLAB_TOKEN_VAR: &str = "GITLAB_RELEASE_TOKEN";

/// Picks the registry bearer token from the given credentials.
///
/// A non-empty GitHub token wins and is base64-encoded, otherwise a non-empty
/// GitLab token is used verbatim.
pub fn auth_token(github: Option<&str>, gitlab: Option<&str>) -> Option<String> {
    match (github, gitlab) {
        (Some(token), _) if !token.is_empty() => Some(STANDARD.encode(token)),
        (_, Some(token)) if !token.is_empty() => Some(token.to_string()),
        _ => None,
    }
}

/// Reads the registry bearer token from the environment.
pub fn auth_token_from_env() -> Option<String> {
    let github = std::env::var(GITHUB_TOKEN_VAR).ok();
    let gitlab = std::env::var(GITLAB_TOKEN_VAR).ok();
    let token = auth_token(github.as_deref(), gitlab.as_deref());
    if token.is_none() {
        tracing::debug!("no registry token in environment, requests are anonymous");
    }
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_token_is_encoded() {
        assert_eq!(
            auth_token(Some("ghp_abc"), Some("glpat")),
            Some("Z2hwX2FiYw==".to_string())
        );
    }

    #[test]
    fn test_gitlab_token_is_fallback() {
        assert_eq!(auth_token(None, Some("glpat")), Some("glpat".to_string()));
        assert_eq!(auth_token(Some(""), Some("glpat")), Some("glpat".to_string()));
    }

    #[test]
    fn test_no_token() {
        assert_eq!(auth_token(None, None), None);
        assert_eq!(auth_token(Some(""), Some("")), None);
    }
}
