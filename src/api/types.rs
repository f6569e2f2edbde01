use serde::{Deserialize, Serialize};

/// Response envelope shared by every backend endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: T,
}

/// Error body; only `message` matters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AdType {
    Image,
    Video,
}

impl From<AdType> for u8 {
    fn from(value: AdType) -> Self {
        match value {
            AdType::Image => 0,
            AdType::Video => 1,
        }
    }
}

impl TryFrom<u8> for AdType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AdType::Image),
            1 => Ok(AdType::Video),
            other => Err(format!("unknown ad type {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AdLayout {
    Video,
    Banner,
    Sidebar,
}

impl AdLayout {
    /// Layout for an image slot: explicit attribute first, otherwise taller
    /// than wide means sidebar.
    pub fn for_image_slot(attribute: Option<&str>, width: f64, height: f64) -> Self {
        match attribute {
            Some("sidebar") => AdLayout::Sidebar,
            Some("banner") => AdLayout::Banner,
            _ if height > width => AdLayout::Sidebar,
            _ => AdLayout::Banner,
        }
    }
}

impl From<AdLayout> for u8 {
    fn from(value: AdLayout) -> Self {
        match value {
            AdLayout::Video => 0,
            AdLayout::Banner => 1,
            AdLayout::Sidebar => 2,
        }
    }
}

impl TryFrom<u8> for AdLayout {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AdLayout::Video),
            1 => Ok(AdLayout::Banner),
            2 => Ok(AdLayout::Sidebar),
            other => Err(format!("unknown ad layout {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageViewInit {
    pub domain: String,
    pub category_name: String,
    pub track_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageViewRegistration {
    pub visit_id: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageViewUpdate {
    pub visit_id: String,
    pub duration: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdSlotRequest {
    pub ad_type: AdType,
    pub ad_layout: AdLayout,
    pub track_id: String,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdResult {
    pub display_id: String,
    pub media_url: String,
    pub title: String,
    pub landing_page: String,
    pub ad_layout: AdLayout,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdDisplayUpdate {
    pub duration: f64,
    #[serde(serialize_with = "serialize_clicked")]
    pub clicked: bool,
}

fn serialize_clicked<S: serde::Serializer>(clicked: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*clicked))
}
