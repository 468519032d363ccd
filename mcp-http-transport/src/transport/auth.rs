//! Authorization and custom header hooks.
//!
//! Both hooks receive everything they need as arguments: the
//! [`AuthProvider`] sees the method, URI and headers of the request being
//! built, the [`HeadersSupplier`] sees the message being sent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use url::Url;

use super::config::AuthConfig;
use crate::error::{ConfigError, McpError, McpResult};
use crate::messages::ClientMessage;

/// The request an [`AuthProvider`] is asked to authorize.
#[derive(Debug, Clone, Copy)]
pub struct AuthInput<'a> {
    /// HTTP method of the outgoing request
    pub method: &'a Method,
    /// Target URI
    pub uri: &'a Url,
    /// Headers assembled so far
    pub headers: &'a HeaderMap,
}

/// A single credential header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeader {
    /// Header name, usually `Authorization`
    pub name: String,
    /// Header value
    pub value: String,
}

impl AuthHeader {
    /// An `Authorization` header.
    pub fn authorization(value: impl Into<String>) -> Self {
        Self {
            name: reqwest::header::AUTHORIZATION.as_str().to_string(),
            value: value.into(),
        }
    }

    /// Append this header to `headers`.
    pub fn apply(&self, headers: &mut HeaderMap) -> McpResult<()> {
        let name = HeaderName::try_from(self.name.as_str())
            .map_err(|e| invalid_header(&self.name, e))?;
        let value = HeaderValue::try_from(self.value.as_str())
            .map_err(|e| invalid_header(&self.name, e))?;
        headers.insert(name, value);
        Ok(())
    }
}

/// Source of credentials, consulted once per outgoing HTTP request.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Credential for `input`, or `None` to send the request unauthenticated.
    async fn authorization(&self, input: &AuthInput<'_>) -> McpResult<Option<AuthHeader>>;
}

/// Provider returning the same credential for every request.
#[derive(Debug, Clone)]
pub struct StaticAuthProvider {
    header: AuthHeader,
}

impl StaticAuthProvider {
    /// Provider for a fixed header.
    pub fn new(header: AuthHeader) -> Self {
        Self { header }
    }

    /// Build a provider from configuration.
    pub fn from_config(config: &AuthConfig) -> McpResult<Self> {
        config.validate()?;
        let header = match config {
            AuthConfig::Bearer { token } => {
                AuthHeader::authorization(format!("Bearer {}", token))
            }
            AuthConfig::Header { name, value } => AuthHeader {
                name: name.clone(),
                value: value.clone(),
            },
        };
        Ok(Self::new(header))
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn authorization(&self, _input: &AuthInput<'_>) -> McpResult<Option<AuthHeader>> {
        Ok(Some(self.header.clone()))
    }
}

/// Extra headers computed per outgoing HTTP request.
pub trait HeadersSupplier: Send + Sync {
    /// Headers to attach when sending `message`; `None` for requests that
    /// carry no message, such as the SSE subscription or session termination.
    fn headers(&self, message: Option<&ClientMessage>) -> HashMap<String, String>;
}

impl HeadersSupplier for HashMap<String, String> {
    fn headers(&self, _message: Option<&ClientMessage>) -> HashMap<String, String> {
        self.clone()
    }
}

/// [`HeadersSupplier`] backed by a closure.
pub struct FnHeadersSupplier<F>(pub F);

impl<F> HeadersSupplier for FnHeadersSupplier<F>
where
    F: Fn(Option<&ClientMessage>) -> HashMap<String, String> + Send + Sync,
{
    fn headers(&self, message: Option<&ClientMessage>) -> HashMap<String, String> {
        (self.0)(message)
    }
}

/// Authorization and header hooks attached to a transport.
#[derive(Clone, Default)]
pub struct RequestDecorator {
    auth: Option<Arc<dyn AuthProvider>>,
    headers: Option<Arc<dyn HeadersSupplier>>,
}

impl RequestDecorator {
    /// Decorator with the given hooks.
    pub fn new(
        auth: Option<Arc<dyn AuthProvider>>,
        headers: Option<Arc<dyn HeadersSupplier>>,
    ) -> Self {
        Self { auth, headers }
    }

    /// Decorator built from configured static headers and auth.
    pub fn from_config(
        headers: &HashMap<String, String>,
        auth: Option<&AuthConfig>,
    ) -> McpResult<Self> {
        let auth = match auth {
            Some(config) => {
                let provider = StaticAuthProvider::from_config(config)?;
                Some(Arc::new(provider) as Arc<dyn AuthProvider>)
            }
            None => None,
        };
        let headers = if headers.is_empty() {
            None
        } else {
            Some(Arc::new(headers.clone()) as Arc<dyn HeadersSupplier>)
        };
        Ok(Self { auth, headers })
    }

    /// Replace the auth provider.
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Replace the headers supplier.
    pub fn with_headers(mut self, headers: Arc<dyn HeadersSupplier>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Add custom headers for `message`, then the credential, to `headers`.
    ///
    /// The auth provider sees the custom headers already in place.
    pub async fn decorate(
        &self,
        method: &Method,
        uri: &Url,
        message: Option<&ClientMessage>,
        headers: &mut HeaderMap,
    ) -> McpResult<()> {
        if let Some(supplier) = &self.headers {
            for (name, value) in supplier.headers(message) {
                AuthHeader { name, value }.apply(headers)?;
            }
        }

        if let Some(provider) = &self.auth {
            let input = AuthInput {
                method,
                uri,
                headers: &*headers,
            };
            if let Some(credential) = provider.authorization(&input).await? {
                credential.apply(headers)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RequestDecorator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDecorator")
            .field("auth", &self.auth.is_some())
            .field("headers", &self.headers.is_some())
            .finish()
    }
}

fn invalid_header(name: &str, err: impl std::fmt::Display) -> McpError {
    ConfigError::InvalidValue {
        parameter: "headers".to_string(),
        value: name.to_string(),
        reason: format!("Invalid HTTP header: {}", err),
    }
    .into()
}
