use crate::api::client::{ApiRequest, ApiResponse, HttpClient, MultipartForm, RequestBody};
use crate::api::error::ClientError;
use crate::config::ClientConfig;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!("rust-upload-client/", env!("CARGO_PKG_VERSION"));

/// Payload slice handed to the transport at a time; progress is reported per slice.
const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

/// `HttpClient` over a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ReqwestClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        // A trailing slash makes `join` append to the base path instead of replacing it.
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)
            .map_err(|e| ClientError::Network(format!("Invalid API base URL '{}': {}", base_url, e)))?;

        Ok(Self { http, base_url })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::new(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn url_for(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::Network(format!("Invalid request path '{}': {}", path, e)))
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let url = self.url_for(&request.path)?;
        let mut builder = self.http.request(request.method.clone(), url);

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(fields) => {
                let encoded = serde_urlencoded::to_string(&fields)
                    .map_err(|e| ClientError::Decode(e.to_string()))?;
                builder
                    .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(encoded)
            }
            RequestBody::Multipart(form) => builder.multipart(build_multipart(form)?),
        };

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        tracing::debug!("{} {} -> {}", request.method, request.path, status);
        Ok(ApiResponse { status, body })
    }
}

fn build_multipart(form: MultipartForm) -> Result<Form, ClientError> {
    let MultipartForm {
        fields,
        file_field,
        file,
        progress,
    } = form;

    let total = file.data.len() as u64;
    let chunks: Vec<Bytes> = (0..file.data.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| {
            let end = (start + UPLOAD_CHUNK_SIZE).min(file.data.len());
            file.data.slice(start..end)
        })
        .collect();

    let mut sent = 0u64;
    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len() as u64;
        if let Some(sink) = &progress {
            sink.report(sent, total);
        }
        Ok::<Bytes, std::io::Error>(chunk)
    }));

    let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
        .file_name(file.name.clone())
        .mime_str(&file.mime_type)
        .map_err(|e| ClientError::Network(format!("Invalid media type '{}': {}", file.mime_type, e)))?;

    let form = fields
        .into_iter()
        .fold(Form::new(), |form, (name, value)| form.text(name, value))
        .part(file_field, part);
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_keeps_base_path() {
        let client = ReqwestClient::new("http://localhost:8000/v1", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url_for("/documents/upload").unwrap().as_str(),
            "http://localhost:8000/v1/documents/upload"
        );

        let client = ReqwestClient::new("http://localhost:8000/v1/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url_for("documents/abc/status").unwrap().as_str(),
            "http://localhost:8000/v1/documents/abc/status"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ReqwestClient::new("not a url", Duration::from_secs(5)).is_err());
    }
}
