//! Request result types.
//!
//! A request resolves to a [`FetchValue`]:
//!
//! - [`FetchValue::Data`] : the decoded body, the default shape
//! - [`FetchValue::WithHeaders`] : the decoded body plus a selection of response headers
//! - [`FetchValue::Raw`] : the untouched transport response
//!
//! Only the first two shapes are cacheable. Raw responses always bypass the
//! cache, so the `Raw` variant is skipped by serde and serializing it fails.

use std::collections::BTreeMap;

use bytes::Bytes;
use http::{HeaderMap, StatusCode, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Response headers selected by name. Absent headers map to `None`.
pub type ResponseHeaders = BTreeMap<String, Option<String>>;

/// Decoded response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Body decoded as JSON (`content-type` contains `application/json`).
    Json(serde_json::Value),
    /// Body kept as text. Numeric text is not converted.
    Text(String),
}

impl Payload {
    /// Decodes a body according to its content type.
    pub fn decode(content_type: Option<&str>, body: &[u8]) -> Result<Self, serde_json::Error> {
        match content_type {
            Some(ct) if ct.contains("application/json") => {
                serde_json::from_slice(body).map(Payload::Json)
            }
            _ => Ok(Payload::Text(String::from_utf8_lossy(body).into_owned())),
        }
    }

    /// Returns the text body, if this payload is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Json(_) => None,
        }
    }

    /// Returns the JSON body, if this payload is JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    /// Deserializes the payload into `T`. Text payloads deserialize as a JSON string.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Payload::Json(value) => T::deserialize(value),
            Payload::Text(text) => T::deserialize(serde_json::Value::String(text.clone())),
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_owned())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

/// The result a request resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchValue {
    /// Decoded body only.
    Data(Payload),
    /// Decoded body with the requested response headers.
    WithHeaders {
        /// Decoded body.
        data: Payload,
        /// Selected response headers.
        headers: ResponseHeaders,
    },
    /// Untouched transport response. Never cached.
    #[serde(skip)]
    Raw(RawResponse),
}

impl FetchValue {
    /// Returns the decoded body, if any.
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            FetchValue::Data(data) | FetchValue::WithHeaders { data, .. } => Some(data),
            FetchValue::Raw(_) => None,
        }
    }

    /// Returns the selected response headers, if any.
    pub fn headers(&self) -> Option<&ResponseHeaders> {
        match self {
            FetchValue::WithHeaders { headers, .. } => Some(headers),
            _ => None,
        }
    }

    /// Returns the raw transport response, if this value carries one.
    pub fn raw(&self) -> Option<&RawResponse> {
        match self {
            FetchValue::Raw(response) => Some(response),
            _ => None,
        }
    }

    /// `true` for shapes that may be written to a cache.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, FetchValue::Raw(_))
    }

    /// Deserializes the decoded body into `T`.
    ///
    /// Raw responses are decoded from their body bytes as JSON.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            FetchValue::Data(data) | FetchValue::WithHeaders { data, .. } => data.deserialize(),
            FetchValue::Raw(response) => response.json(),
        }
    }
}

impl From<Payload> for FetchValue {
    fn from(value: Payload) -> Self {
        FetchValue::Data(value)
    }
}

/// A completed transport response with a fully buffered body.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl RawResponse {
    /// Creates a response from its parts.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        RawResponse {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Returns the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns all response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Looks up a header value by name. Non UTF-8 values are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns the `content-type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    /// Returns the body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Decodes the body according to its content type.
    pub fn payload(&self) -> Result<Payload, serde_json::Error> {
        Payload::decode(self.content_type(), &self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde_json::json;

    #[test]
    fn numeric_text_stays_text() {
        let payload = Payload::decode(Some("text/plain"), b"5").unwrap();
        assert_eq!(payload, Payload::Text("5".to_owned()));
    }

    #[test]
    fn json_content_type_decodes_json() {
        let payload =
            Payload::decode(Some("application/json; charset=utf-8"), br#"{"a":"b"}"#).unwrap();
        assert_eq!(payload, Payload::Json(json!({"a": "b"})));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(Payload::decode(Some("application/json"), b"{oops").is_err());
    }

    #[test]
    fn raw_values_cannot_be_serialized() {
        let raw = FetchValue::Raw(RawResponse::new(StatusCode::OK, HeaderMap::new(), "ok"));
        assert!(!raw.is_cacheable());
        assert!(serde_json::to_vec(&raw).is_err());
    }

    #[test]
    fn with_headers_survives_serialization() {
        let mut headers = ResponseHeaders::new();
        headers.insert("x-total".to_owned(), Some("3".to_owned()));
        headers.insert("x-missing".to_owned(), None);
        let value = FetchValue::WithHeaders {
            data: Payload::Json(json!([1, 2, 3])),
            headers,
        };
        let bytes = serde_json::to_vec(&value).unwrap();
        let back: FetchValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn typed_deserialization() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct User {
            name: String,
        }
        let value = FetchValue::Data(Payload::Json(json!({"name": "test"})));
        assert_eq!(
            value.deserialize::<User>().unwrap(),
            User {
                name: "test".to_owned()
            }
        );
        let text = FetchValue::Data(Payload::Text("ok".to_owned()));
        assert_eq!(text.deserialize::<String>().unwrap(), "ok");
    }

    #[test]
    fn raw_response_header_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        let response = RawResponse::new(StatusCode::ACCEPTED, headers, "{}");
        assert!(response.is_success());
        assert_eq!(response.header("X-Request-Id"), Some("abc"));
        assert_eq!(response.header("missing"), None);
    }
}
