use async_trait::async_trait;
use queuewire_core::ClientResult;

use crate::transport::Headers;

/// Environment variable read by [`TokenAuth::from_env`].
pub const TOKEN_ENV: &str = "HF_TOKEN";

/// Credential artifacts attached to outgoing requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub bearer_token: Option<String>,
    pub cookies: Vec<String>,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
            cookies: Vec::new(),
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookies.push(cookie.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bearer_token.is_none() && self.cookies.is_empty()
    }

    /// `Authorization` and `Cookie` headers for these credentials.
    pub fn headers(&self) -> Headers {
        let mut headers = Vec::new();
        if let Some(token) = &self.bearer_token {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        if !self.cookies.is_empty() {
            headers.push(("Cookie".to_string(), self.cookies.join("; ")));
        }
        headers
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Credentials to use against the app at `root`.
    async fn credentials(&self, root: &str) -> ClientResult<Credentials>;
}

/// Static bearer token.
#[derive(Debug, Clone, Default)]
pub struct TokenAuth {
    token: Option<String>,
}

impl TokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Token from `HF_TOKEN`, if set and non-empty.
    pub fn from_env() -> Self {
        Self {
            token: std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()),
        }
    }

    /// Explicit token if given, else the environment.
    pub fn from_option(token: Option<String>) -> Self {
        match token {
            Some(token) => Self::new(token),
            None => Self::from_env(),
        }
    }
}

#[async_trait]
impl AuthProvider for TokenAuth {
    async fn credentials(&self, _root: &str) -> ClientResult<Credentials> {
        Ok(Credentials {
            bearer_token: self.token.clone(),
            cookies: Vec::new(),
        })
    }
}

/// No credentials at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthProvider for NoAuth {
    async fn credentials(&self, _root: &str) -> ClientResult<Credentials> {
        Ok(Credentials::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_from_credentials() {
        let creds = Credentials::bearer("hf_x").with_cookie("a=1").with_cookie("b=2");
        assert_eq!(
            creds.headers(),
            vec![
                ("Authorization".to_string(), "Bearer hf_x".to_string()),
                ("Cookie".to_string(), "a=1; b=2".to_string()),
            ]
        );
        assert!(Credentials::default().headers().is_empty());
    }

    #[test]
    fn providers() {
        let creds = tokio_test::block_on(TokenAuth::new("t").credentials("http://app")).unwrap();
        assert_eq!(creds.bearer_token.as_deref(), Some("t"));
        assert_eq!(creds.headers().len(), 1);

        let creds = tokio_test::block_on(TokenAuth::from_option(Some("explicit".into())).credentials("http://app")).unwrap();
        assert_eq!(creds.bearer_token.as_deref(), Some("explicit"));

        assert!(tokio_test::block_on(NoAuth.credentials("http://app")).unwrap().is_empty());
    }
}
