//! Request and response bodies exchanged with the pageviews HTTP API.
//!
//! The server serializes these types and clients may deserialize them
//! without depending on the server crate.

use serde::{Deserialize, Serialize};

/// View count for a single content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewCount {
    pub slug: String,
    pub views: u64,
}

/// Counts for a listing, in the order the slugs were requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewCountsResponse {
    pub category: String,
    pub counts: Vec<ViewCount>,
}

/// Acknowledgement for a view event. Recording happens in the background,
/// so `recorded` only means the event was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordViewResponse {
    pub slug: String,
    pub recorded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturedItem {
    pub slug: String,
    pub views: u64,
    pub pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturedResponse {
    pub category: String,
    pub items: Vec<FeaturedItem>,
}

/// Body of every non-2xx API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `invalid_slug`.
    pub code: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_response_keeps_request_order() {
        let body = ViewCountsResponse {
            category: "projects".to_string(),
            counts: vec![
                ViewCount {
                    slug: "b".to_string(),
                    views: 2,
                },
                ViewCount {
                    slug: "a".to_string(),
                    views: 0,
                },
            ],
        };

        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["counts"][0]["slug"], "b");
        assert_eq!(json["counts"][1]["views"], 0);
    }

    #[test]
    fn error_body_omits_missing_hint() {
        let body = ErrorBody {
            code: "not_found".to_string(),
            error: "Unknown content category".to_string(),
            hint: None,
        };
        let json = serde_json::to_string(&body).expect("serialize");
        assert!(!json.contains("hint"));

        let parsed: ErrorBody =
            serde_json::from_str(r#"{"code":"x","error":"y"}"#).expect("deserialize");
        assert_eq!(parsed.hint, None);
    }
}
