pub mod http;
pub mod types;

use futures_util::future::BoxFuture;
use thiserror::Error;

pub use http::{resolve_media_url, HttpApi};
pub use types::{
    AdDisplayUpdate, AdLayout, AdResult, AdSlotRequest, AdType, ApiResponse, PageViewInit,
    PageViewRegistration, PageViewUpdate,
};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// Non-2xx status; `message` comes from the body when it has one.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("transport error: {0}")]
    Transport(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Backend calls the tracking core depends on. Futures are boxed so the
/// trait stays object safe and can be shared as `Arc<dyn TrackingApi>`.
pub trait TrackingApi: Send + Sync {
    fn register_page_view(&self, body: PageViewInit) -> BoxFuture<'_, ApiResult<PageViewRegistration>>;

    fn update_page_view(&self, body: PageViewUpdate) -> BoxFuture<'_, ApiResult<bool>>;

    fn fetch_ad_for_slot(&self, body: AdSlotRequest) -> BoxFuture<'_, ApiResult<AdResult>>;

    fn update_ad_display(
        &self,
        display_id: String,
        body: AdDisplayUpdate,
    ) -> BoxFuture<'_, ApiResult<bool>>;
}
