//! Request and Response envelope types.
//!
//! Only the envelope fields needed for dispatch and correlation are typed.
//! Bodies and parameters stay as raw [`Value`]s for the layers above.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::identifiers::Token;

// ============================================================================
// Types
// ============================================================================

/// Header collection. Ordered so encoded envelopes are deterministic.
pub type Headers = BTreeMap<String, String>;

// ============================================================================
// Request
// ============================================================================

/// A call in either direction.
///
/// # Format
///
/// ```json
/// {
///   "method": "GET",
///   "resource": "/feeds/sensor1",
///   "token": "uuid",
///   "headers": { "Content-Type": "application/json" },
///   "params": { "limit": 10 },
///   "body": { ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Verb, for example `GET`, `POST`, `PUT` or `DELETE`.
    pub method: String,

    /// Target resource path.
    #[serde(default)]
    pub resource: String,

    /// Correlation token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,

    /// Request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: Headers,

    /// Query parameters.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,

    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Request {
    /// Creates a request with a freshly generated token.
    #[must_use]
    pub fn new(method: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            resource: resource.into(),
            token: Some(Token::generate()),
            headers: Headers::new(),
            params: Map::new(),
            body: None,
        }
    }

    /// Replaces the token.
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: impl Into<Token>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets a header, replacing any existing header of the same name.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        set_header(&mut self.headers, name.into(), value.into());
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets the payload.
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a header in place, replacing any header of the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        set_header(&mut self.headers, name.into(), value.into());
    }

    /// Looks up a header, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Looks up a parameter, ignoring ASCII case.
    ///
    /// Arrays yield their first element. Strings are returned verbatim,
    /// other scalars as JSON text.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<String> {
        let value = self
            .params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)?;

        let value = match value {
            Value::Array(items) => items.first()?,
            other => other,
        };

        match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// The answer to a [`Request`], matched by token.
///
/// # Format
///
/// ```json
/// {
///   "status": 200,
///   "resource": "/feeds/sensor1",
///   "token": "uuid",
///   "headers": { ... },
///   "body": { ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Status code, HTTP-like.
    pub status: i32,

    /// Resource the response refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Token of the request this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,

    /// Response headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: Headers,

    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    /// Creates an empty response with the given status.
    #[must_use]
    pub fn new(status: i32) -> Self {
        Self {
            status,
            resource: None,
            token: None,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Creates an empty `200` response.
    #[inline]
    #[must_use]
    pub fn ok() -> Self {
        Self::new(200)
    }

    /// Sets the resource.
    #[inline]
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Sets the token.
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: impl Into<Token>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the payload.
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Adds a header, replacing any header of the same name.
    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        set_header(&mut self.headers, name.into(), value.into());
    }

    /// Looks up a header, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns `true` for 2xx statuses.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserializes the body. A missing body deserializes from `null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the body does not match `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self.body.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(body)?)
    }
}

// ============================================================================
// Message
// ============================================================================

/// A decoded envelope, classified by key presence.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Inbound or outbound call.
    Request(Request),
    /// Answer correlated by token.
    Response(Response),
}

impl Message {
    /// Returns the token carried by the message, if any.
    #[must_use]
    pub fn token(&self) -> Option<&Token> {
        match self {
            Self::Request(request) => request.token.as_ref(),
            Self::Response(response) => response.token.as_ref(),
        }
    }
}

// ============================================================================
// Header Helpers
// ============================================================================

fn find_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn set_header(headers: &mut Headers, name: String, value: String) {
    headers.retain(|key, _| !key.eq_ignore_ascii_case(&name));
    headers.insert(name, value);
}

// ============================================================================
// Tests
// ============================================================================
