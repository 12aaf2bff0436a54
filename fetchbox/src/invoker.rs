//! Transport invocation: request preparation and outcome classification.

use std::sync::Arc;

use fetchbox_core::{
    FormPart, Payload, RawResponse, ResponseHeaders, Transport, TransportBody, TransportError,
    TransportRequest,
};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_PUT_POST_CONTENT_TYPE, RequestConfig, RequestData};
use crate::error::FetchError;

/// Classified successful outcome of a transport call.
#[derive(Debug)]
pub(crate) enum Invoked {
    /// The untouched response, for `is_use_origin`.
    Raw(RawResponse),
    /// Decoded body and the selected response headers.
    Parsed {
        data: Payload,
        headers: ResponseHeaders,
    },
}

/// Joins `url` onto `base_url` unless `url` is absolute.
pub(crate) fn resolve_url(url: &str, base_url: Option<&str>) -> String {
    let is_absolute = url.starts_with("//")
        || url
            .split_once("://")
            .is_some_and(|(scheme, _)| {
                !scheme.is_empty()
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
            });
    match base_url {
        Some(base) if !is_absolute && !base.is_empty() => {
            if url.is_empty() {
                base.to_owned()
            } else {
                format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    url.trim_start_matches('/')
                )
            }
        }
        _ => url.to_owned(),
    }
}

/// Renders one query value. Arrays join their items with `,`; nested objects
/// are rendered as JSON text.
fn query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(query_value).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

/// Characters `encodeURI` leaves untouched besides ASCII alphanumerics.
const URI_KEEP: &str = "-_.!~*'();/?:@&=+$,#";

fn encode_uri(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() || URI_KEEP.contains(ch) {
            encoded.push(ch);
        } else {
            encoded.push_str(&urlencoding::encode(ch.encode_utf8(&mut [0; 4])));
        }
    }
    encoded
}

/// Appends query parameters to `url`.
///
/// Objects become `key=value` pairs joined with `&`, and arrays use their
/// indices as keys. Any other value is appended verbatim. With `encode` the
/// joined pairs are URI-encoded twice, leaving URI delimiters as they are.
/// `?` is used unless `url` already has a query.
pub(crate) fn append_query(url: String, params: Option<&Value>, encode: bool) -> String {
    let pairs: Vec<String> = match params {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| format!("{key}={}", query_value(value)))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, value)| format!("{index}={}", query_value(value)))
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![query_value(other)],
    };
    let query = match (params, encode) {
        (Some(Value::Object(_) | Value::Array(_)), true) => encode_uri(&encode_uri(&pairs.join("&"))),
        _ => pairs.join("&"),
    };
    if query.is_empty() {
        return url;
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

fn query_from_data(data: Option<&RequestData>) -> Option<Value> {
    match data? {
        RequestData::Json(value) => Some(value.clone()),
        RequestData::Text(text) => Some(Value::String(text.clone())),
        RequestData::Multipart(_) => None,
    }
}

fn form_parts(map: &serde_json::Map<String, Value>) -> Vec<FormPart> {
    let mut parts = Vec::with_capacity(map.len());
    for (name, value) in map {
        match value {
            Value::Array(files) if name == "files" => {
                parts.extend(files.iter().map(|file| FormPart::text(name, query_value(file))));
            }
            other => parts.push(FormPart::text(name, query_value(other))),
        }
    }
    parts
}

/// Encodes the body of a non-`GET` request.
pub(crate) fn encode_body(data: Option<&RequestData>, is_file: bool) -> Option<TransportBody> {
    match data? {
        RequestData::Text(text) => Some(TransportBody::Text(text.clone())),
        RequestData::Multipart(parts) => Some(TransportBody::Multipart(parts.clone())),
        RequestData::Json(Value::String(text)) => Some(TransportBody::Text(text.clone())),
        RequestData::Json(Value::Object(map)) if is_file => {
            Some(TransportBody::Multipart(form_parts(map)))
        }
        RequestData::Json(value) => Some(TransportBody::Text(value.to_string())),
    }
}

/// Builds the transport request for a merged configuration.
pub(crate) fn prepare(
    config: &RequestConfig,
    signal: CancellationToken,
) -> Result<TransportRequest, String> {
    let method = config.method();
    let mut url = resolve_url(
        config.url.as_deref().unwrap_or_default(),
        config.base_url.as_deref(),
    );
    let mut headers = config.headers.clone().unwrap_or_default();
    let is_encode_url = config.is_encode_url();

    let body = if method == Method::GET {
        url = append_query(url, query_from_data(config.data.as_ref()).as_ref(), is_encode_url);
        None
    } else {
        url = append_query(url, config.query.as_ref(), is_encode_url);
        let is_file = config.is_file();
        if !is_file
            && (method == Method::POST || method == Method::PUT)
            && !headers.contains_key(CONTENT_TYPE)
        {
            let content_type = config
                .default_put_post_content_type
                .as_deref()
                .unwrap_or(DEFAULT_PUT_POST_CONTENT_TYPE);
            let value = HeaderValue::from_str(content_type).map_err(|err| err.to_string())?;
            headers.insert(CONTENT_TYPE, value);
        }
        encode_body(config.data.as_ref(), is_file)
    };

    if let (Some(origin), Some(keys)) = (&config.origin_headers, &config.inject_header_keys) {
        inject_headers(&mut headers, origin, keys)?;
    }

    Ok(TransportRequest {
        url,
        method,
        headers,
        body,
        credentials: config.credentials(),
        mode: config.mode(),
        signal,
    })
}

fn inject_headers(
    headers: &mut HeaderMap,
    origin: &HeaderMap,
    keys: &[smol_str::SmolStr],
) -> Result<(), String> {
    for key in keys {
        if let Some(value) = origin.get(key.as_str()) {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|err| err.to_string())?;
            headers.insert(name, value.clone());
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct PrepareError(String);

/// Sorts a finished response into a value or an error.
pub(crate) fn classify(
    config: &Arc<RequestConfig>,
    response: RawResponse,
) -> Result<Invoked, FetchError> {
    let status = response.status();
    if !status.is_success() && !config.is_ignored(status.as_u16()) {
        let text = response.text();
        let message = if text.is_empty() {
            status.canonical_reason().unwrap_or_default().to_owned()
        } else {
            text
        };
        return Err(FetchError::http(message, status.as_u16(), Arc::clone(config)));
    }
    if config.is_use_origin() {
        return Ok(Invoked::Raw(response));
    }
    let data = response
        .payload()
        .map_err(|err| FetchError::network(err, Arc::clone(config)))?;
    let headers = config
        .response_header_keys
        .iter()
        .flatten()
        .map(|key| (key.to_string(), response.header(key).map(str::to_owned)))
        .collect();
    Ok(Invoked::Parsed { data, headers })
}

/// Prepares, issues and classifies one transport call.
pub(crate) async fn invoke(
    transport: &dyn Transport,
    config: &Arc<RequestConfig>,
    signal: CancellationToken,
) -> Result<Invoked, FetchError> {
    let request = prepare(config, signal)
        .map_err(|message| FetchError::network(PrepareError(message), Arc::clone(config)))?;
    let response = transport
        .invoke(request)
        .await
        .map_err(|err: TransportError| FetchError::network(err, Arc::clone(config)))?;
    classify(config, response)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::StatusCode;
    use serde_json::json;

    use super::*;

    #[test]
    fn resolve_relative_and_absolute_urls() {
        assert_eq!(resolve_url("/users", Some("http://api/")), "http://api/users");
        assert_eq!(resolve_url("users", Some("http://api")), "http://api/users");
        assert_eq!(resolve_url("https://other/x", Some("http://api")), "https://other/x");
        assert_eq!(resolve_url("//cdn/x", Some("http://api")), "//cdn/x");
        assert_eq!(resolve_url("/users", None), "/users");
    }

    #[test]
    fn query_objects_become_pairs() {
        let url = append_query("/a".to_owned(), Some(&json!({"a": "x", "b": 2})), false);
        assert_eq!(url, "/a?a=x&b=2");
        let url = append_query("/a?z=1".to_owned(), Some(&json!({"b": 2})), false);
        assert_eq!(url, "/a?z=1&b=2");
    }

    #[test]
    fn query_strings_are_appended_verbatim() {
        let url = append_query("/a".to_owned(), Some(&json!("x=1&y=2")), false);
        assert_eq!(url, "/a?x=1&y=2");
        assert_eq!(append_query("/a".to_owned(), None, false), "/a");
        assert_eq!(append_query("/a".to_owned(), Some(&json!({})), false), "/a");
    }

    #[test]
    fn encoded_queries_are_encoded_twice() {
        let url = append_query("/a".to_owned(), Some(&json!({"q": "a b"})), true);
        assert_eq!(url, "/a?q=a%2520b");
    }

    #[test]
    fn encoding_keeps_uri_delimiters() {
        let url = append_query("/a".to_owned(), Some(&json!({"next": "/users?page=2"})), true);
        assert_eq!(url, "/a?next=/users?page=2");
        let url = append_query("/a".to_owned(), Some(&json!({"at": "a@b:c,d+e"})), true);
        assert_eq!(url, "/a?at=a@b:c,d+e");

        let url = append_query("/a".to_owned(), Some(&json!({"q": "é"})), true);
        assert_eq!(url, "/a?q=%25C3%25A9");
    }

    #[test]
    fn query_arrays_use_indices_as_keys() {
        let url = append_query("/a".to_owned(), Some(&json!(["a", "b"])), false);
        assert_eq!(url, "/a?0=a&1=b");
        let url = append_query("/a".to_owned(), Some(&json!({"ids": [1, 2]})), false);
        assert_eq!(url, "/a?ids=1,2");
    }

    #[test]
    fn get_embeds_data_and_sends_no_body() {
        let config = RequestConfig::new(Method::GET, "/search")
            .with_base_url("http://api")
            .with_data(json!({"q": "rust"}));
        let request = prepare(&config, CancellationToken::new()).unwrap();
        assert_eq!(request.url, "http://api/search?q=rust");
        assert!(request.body.is_none());
        assert!(request.headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn post_defaults_content_type_and_embeds_query() {
        let config = RequestConfig::new(Method::POST, "/items")
            .with_data(json!({"name": "x"}))
            .with_query(json!({"dry": true}));
        let request = prepare(&config, CancellationToken::new()).unwrap();
        assert_eq!(request.url, "/items?dry=true");
        assert_eq!(
            request.headers.get(CONTENT_TYPE).unwrap(),
            DEFAULT_PUT_POST_CONTENT_TYPE
        );
        assert_eq!(
            request.body,
            Some(TransportBody::Text(r#"{"name":"x"}"#.to_owned()))
        );
    }

    #[test]
    fn explicit_content_type_is_kept() {
        let config = RequestConfig::new(Method::PUT, "/items")
            .with_header("Content-Type", "text/plain")
            .with_data("raw");
        let request = prepare(&config, CancellationToken::new()).unwrap();
        assert_eq!(request.headers.get(CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(request.body, Some(TransportBody::Text("raw".to_owned())));
    }

    #[test]
    fn file_uploads_become_multipart() {
        let mut config = RequestConfig::new(Method::POST, "/upload")
            .with_data(json!({"files": ["a.txt", "b.txt"], "kind": "doc"}));
        config.is_file = Some(true);
        let request = prepare(&config, CancellationToken::new()).unwrap();
        assert!(request.headers.get(CONTENT_TYPE).is_none());
        assert_eq!(
            request.body,
            Some(TransportBody::Multipart(vec![
                FormPart::text("files", "a.txt"),
                FormPart::text("files", "b.txt"),
                FormPart::text("kind", "doc"),
            ]))
        );
    }

    #[test]
    fn origin_headers_are_injected() {
        let mut origin = HeaderMap::new();
        origin.insert("x-request-id", HeaderValue::from_static("req-1"));
        origin.insert("x-unrelated", HeaderValue::from_static("no"));
        let mut config = RequestConfig::defaults().merge(RequestConfig::new(Method::GET, "/a"));
        config.origin_headers = Some(origin);

        let request = prepare(&config, CancellationToken::new()).unwrap();
        assert_eq!(request.headers.get("x-request-id").unwrap(), "req-1");
        assert!(request.headers.get("x-unrelated").is_none());
    }

    fn response(status: u16, content_type: &str, body: &'static str) -> RawResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers.insert("x-total", HeaderValue::from_static("7"));
        RawResponse::new(
            StatusCode::from_u16(status).unwrap(),
            headers,
            Bytes::from_static(body.as_bytes()),
        )
    }

    #[test]
    fn non_success_status_is_an_http_error() {
        let config = Arc::new(RequestConfig::default());
        let err = classify(&config, response(404, "text/plain", "no such user")).unwrap_err();
        assert!(err.is_http());
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.message(), "no such user");

        let err = classify(&config, response(503, "text/plain", "")).unwrap_err();
        assert_eq!(err.message(), "Service Unavailable");
    }

    #[test]
    fn ignored_status_is_decoded() {
        let mut config = RequestConfig::default();
        config.ignore = Some(vec![404]);
        let invoked = classify(&Arc::new(config), response(404, "application/json", "[]")).unwrap();
        assert!(matches!(invoked, Invoked::Parsed { data: Payload::Json(_), .. }));
    }

    #[test]
    fn selected_headers_are_collected() {
        let config = Arc::new(
            RequestConfig::default().with_response_header_keys(["x-total", "x-missing"]),
        );
        let Invoked::Parsed { headers, .. } =
            classify(&config, response(200, "text/plain", "ok")).unwrap()
        else {
            panic!("expected parsed response");
        };
        assert_eq!(headers.get("x-total"), Some(&Some("7".to_owned())));
        assert_eq!(headers.get("x-missing"), Some(&None));
    }

    #[test]
    fn malformed_json_is_a_network_error() {
        let config = Arc::new(RequestConfig::default());
        let err = classify(&config, response(200, "application/json", "{oops")).unwrap_err();
        assert!(err.is_network());
    }
}
