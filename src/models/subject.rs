use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SubjectKind {
    PageView,
    AdDisplay,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::PageView => "pageView",
            SubjectKind::AdDisplay => "adDisplay",
        }
    }
}

/// One unit of tracked attention: a page visit in a category, or one ad display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub subject_id: String,
    pub kind: SubjectKind,
    /// Backend-issued visit or display id; `None` until registered.
    pub remote_id: Option<String>,
}

impl Subject {
    pub fn page_view(category: impl Into<String>) -> Self {
        Self {
            subject_id: category.into(),
            kind: SubjectKind::PageView,
            remote_id: None,
        }
    }

    pub fn ad_display(slot_id: impl Into<String>) -> Self {
        Self {
            subject_id: slot_id.into(),
            kind: SubjectKind::AdDisplay,
            remote_id: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.remote_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Human-readable label used in logs.
    pub fn label(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.subject_id)
    }
}
