use futures_util::{future::BoxFuture, FutureExt};
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use super::{
    types::ApiErrorBody, AdDisplayUpdate, AdResult, AdSlotRequest, ApiError, ApiResponse,
    ApiResult, PageViewInit, PageViewRegistration, PageViewUpdate, TrackingApi,
};

/// JSON-over-HTTPS client for the tracking backend.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    host: String,
}

impl HttpApi {
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_client(Client::new(), host)
    }

    pub fn with_client(client: Client, host: impl Into<String>) -> Self {
        let host = host.into().trim_end_matches('/').to_string();
        Self { client, host }
    }

    async fn request<B, T>(&self, method: Method, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.host, path);
        let response = self
            .client
            .request(method, &url)
            .json(body)
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        decode_response(status, &bytes)
    }
}

/// Resolves a backend-relative path against `host`. Empty paths stay empty;
/// absolute URLs pass through untouched.
pub fn resolve_media_url(host: &str, path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    if Url::parse(path).is_ok() {
        return path.to_string();
    }
    let host = host.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{host}{path}")
    } else {
        format!("{host}/{path}")
    }
}

pub(crate) fn decode_response<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> ApiResult<T> {
    if !status.is_success() {
        let error_body: ApiErrorBody = serde_json::from_slice(body)
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        let message = if error_body.message.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            error_body.message
        };
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }

    let envelope: ApiResponse<T> =
        serde_json::from_slice(body).map_err(|err| ApiError::Decode(err.to_string()))?;
    Ok(envelope.data)
}

impl TrackingApi for HttpApi {
    fn register_page_view(&self, body: PageViewInit) -> BoxFuture<'_, ApiResult<PageViewRegistration>> {
        async move { self.request(Method::POST, "/track/page-view", &body).await }.boxed()
    }

    fn update_page_view(&self, body: PageViewUpdate) -> BoxFuture<'_, ApiResult<bool>> {
        async move { self.request(Method::PUT, "/track/page-view", &body).await }.boxed()
    }

    fn fetch_ad_for_slot(&self, body: AdSlotRequest) -> BoxFuture<'_, ApiResult<AdResult>> {
        async move { self.request(Method::POST, "/track/ad-slot", &body).await }.boxed()
    }

    fn update_ad_display(
        &self,
        display_id: String,
        body: AdDisplayUpdate,
    ) -> BoxFuture<'_, ApiResult<bool>> {
        async move {
            let path = format!("/track/ad-slot/{display_id}");
            self.request(Method::PUT, &path, &body).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_unwraps_envelope() {
        let body = br#"{"code":0,"message":"ok","data":{"visitId":"v1"}}"#;
        let parsed: PageViewRegistration = decode_response(StatusCode::OK, body).unwrap();
        assert_eq!(parsed.visit_id, "v1");
    }

    #[test]
    fn failure_uses_body_message() {
        let body = br#"{"code":400,"message":"unknown domain","data":null}"#;
        let err = decode_response::<bool>(StatusCode::BAD_REQUEST, body).unwrap_err();
        assert_eq!(
            err,
            ApiError::Status {
                status: 400,
                message: "unknown domain".into()
            }
        );
    }

    #[test]
    fn failure_without_message_uses_status_text() {
        let err = decode_response::<bool>(StatusCode::SERVICE_UNAVAILABLE, b"{}").unwrap_err();
        assert_eq!(
            err,
            ApiError::Status {
                status: 503,
                message: "Service Unavailable".into()
            }
        );
    }

    #[test]
    fn undecodable_body_is_decode_error() {
        let err = decode_response::<bool>(StatusCode::BAD_GATEWAY, b"<html>").unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
        let err = decode_response::<bool>(StatusCode::OK, b"not json").unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn media_paths_resolve_against_host() {
        let host = "https://api.example/v1/";
        assert_eq!(resolve_media_url(host, "/media/a.png"), "https://api.example/v1/media/a.png");
        assert_eq!(resolve_media_url(host, "media/a.png"), "https://api.example/v1/media/a.png");
        assert_eq!(resolve_media_url(host, "https://cdn.example/a.png"), "https://cdn.example/a.png");
        assert_eq!(resolve_media_url(host, ""), "");
    }
}
