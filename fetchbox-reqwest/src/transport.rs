//! [`Transport`] implementation over a [`reqwest::Client`].

use async_trait::async_trait;
use fetchbox_core::{
    FormPart, FormValue, RawResponse, Transport, TransportBody, TransportError, TransportRequest,
};
use reqwest::multipart::{Form, Part};
use tracing::trace;

/// Sends fetchbox requests with a [`reqwest::Client`].
///
/// The response body is buffered completely before it is handed back, so the
/// engine can cache and share it.
///
/// `credentials` and `mode` describe browser fetch policies and have no
/// counterpart in a native client; they are ignored. Configure cookies on the
/// `reqwest::Client` instead.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wraps an existing client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Returns the wrapped client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl From<reqwest::Client> for ReqwestTransport {
    fn from(client: reqwest::Client) -> Self {
        Self::new(client)
    }
}

fn form_part(part: FormPart) -> Result<(String, Part), TransportError> {
    let value = match part.value {
        FormValue::Text(text) => Part::text(text),
        FormValue::File {
            file_name,
            content_type,
            bytes,
        } => {
            let file = Part::bytes(bytes.to_vec()).file_name(file_name);
            match content_type {
                Some(content_type) => file
                    .mime_str(&content_type)
                    .map_err(|err| TransportError::InvalidRequest(err.to_string()))?,
                None => file,
            }
        }
    };
    Ok((part.name, value))
}

fn multipart(parts: Vec<FormPart>) -> Result<Form, TransportError> {
    parts.into_iter().try_fold(Form::new(), |form, part| {
        let (name, part) = form_part(part)?;
        Ok(form.part(name, part))
    })
}

fn classify_error(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Connection(Box::new(err))
    }
}

impl ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        builder = match request.body {
            Some(TransportBody::Text(text)) => builder.body(text),
            Some(TransportBody::Bytes(bytes)) => builder.body(bytes),
            Some(TransportBody::Multipart(parts)) => builder.multipart(multipart(parts)?),
            None => builder,
        };

        let response = builder.send().await.map_err(classify_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify_error)?;
        trace!(%status, bytes = body.len(), "response buffered");
        Ok(RawResponse::new(status, headers, body))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn invoke(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        let signal = request.signal.clone();
        signal
            .run_until_cancelled(self.send(request))
            .await
            .unwrap_or(Err(TransportError::Aborted))
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}
