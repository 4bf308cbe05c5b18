//! Pagination-cursor translation between the tool surface and OData
//!
//! Callers page with `{page_size, cursor}`; upstream pages with `$top` /
//! `$skiptoken` and hands back an `@odata.nextLink`. The cursor we re-emit is
//! the `$skiptoken` value extracted from that link.

use serde::Deserialize;
use serde_json::Value;

/// Caller-facing pagination window.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    /// Page size, mapped to `$top`
    pub page_size: Option<u32>,
    /// Opaque cursor from a previous response, mapped to `$skiptoken`
    pub cursor: Option<String>,
}

/// Translate a pagination window into OData query parameters.
#[must_use]
pub fn pagination_query(pagination: Option<&Pagination>) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let Some(p) = pagination else {
        return params;
    };
    if let Some(size) = p.page_size {
        params.push(("$top".to_string(), size.to_string()));
    }
    if let Some(cursor) = &p.cursor {
        if !cursor.is_empty() {
            params.push(("$skiptoken".to_string(), cursor.clone()));
        }
    }
    params
}

/// Extract the next-page cursor from an upstream collection payload.
///
/// Returns the value after the last `$skiptoken=` in `@odata.nextLink`, or
/// `None` when the link is absent or carries no skiptoken.
#[must_use]
pub fn next_cursor(payload: &Value) -> Option<String> {
    let next_link = payload.get("@odata.nextLink")?.as_str()?;
    next_link
        .rsplit_once("$skiptoken=")
        .map(|(_, token)| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_pagination_yields_no_params() {
        assert!(pagination_query(None).is_empty());
        assert!(pagination_query(Some(&Pagination::default())).is_empty());
    }

    #[test]
    fn page_size_and_cursor_map_to_odata_params() {
        let p = Pagination {
            page_size: Some(25),
            cursor: Some("abc123".to_string()),
        };
        let params = pagination_query(Some(&p));
        assert_eq!(
            params,
            vec![
                ("$top".to_string(), "25".to_string()),
                ("$skiptoken".to_string(), "abc123".to_string()),
            ]
        );
    }

    #[test]
    fn next_cursor_extracts_skiptoken() {
        let payload = json!({
            "value": [],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/me/messages?$top=10&$skiptoken=XyZ42"
        });
        assert_eq!(next_cursor(&payload), Some("XyZ42".to_string()));
    }

    #[test]
    fn next_cursor_uses_last_skiptoken_occurrence() {
        let payload = json!({
            "@odata.nextLink": "https://g/x?$skiptoken=first&$skiptoken=second"
        });
        assert_eq!(next_cursor(&payload), Some("second".to_string()));
    }

    #[test]
    fn next_cursor_is_none_without_link() {
        assert_eq!(next_cursor(&json!({"value": []})), None);
    }

    #[test]
    fn next_cursor_is_none_when_link_has_no_skiptoken() {
        let payload = json!({
            "@odata.nextLink": "https://g/me/messages?$skip=20"
        });
        assert_eq!(next_cursor(&payload), None);
    }
}
