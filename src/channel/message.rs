use serde::{Deserialize, Serialize};

/// Wire messages between the host page and the tracker frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ChannelMessage {
    /// Tracker -> host, once the track id is resolved.
    #[serde(rename = "ready")]
    Ready {
        #[serde(rename = "trackId")]
        track_id: String,
    },
    /// Host -> tracker, whenever the page category signal changes.
    #[serde(rename = "updateCategory")]
    CategoryChanged {
        #[serde(rename = "categoryName")]
        category: Option<String>,
    },
}

impl ChannelMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelMessage::Ready { .. } => "ready",
            ChannelMessage::CategoryChanged { .. } => "updateCategory",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_format_matches_window_messages() {
        let ready = ChannelMessage::Ready {
            track_id: "t1".into(),
        };
        assert_eq!(
            serde_json::to_value(&ready).unwrap(),
            json!({"type": "ready", "trackId": "t1"})
        );

        let parsed: ChannelMessage =
            serde_json::from_value(json!({"type": "updateCategory", "categoryName": null})).unwrap();
        assert_eq!(parsed, ChannelMessage::CategoryChanged { category: None });
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        assert!(serde_json::from_value::<ChannelMessage>(json!({"type": "trackerReady"})).is_err());
    }
}
