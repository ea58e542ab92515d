//! REST response envelope and pagination.

use serde::{Deserialize, Serialize};

/// Uniform REST response envelope: `{success, data?, error?, message?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Response payload.
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error description if the request failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Creates a successful envelope.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    /// Creates a failed envelope.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
        }
    }

    /// Unwraps the payload, or returns the server's error description.
    ///
    /// A successful envelope without `data` is treated as a failure because
    /// every call site that asks for the payload needs it.
    pub fn into_data(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err("response carried no data".into()),
            (false, _) => Err(self
                .error
                .or(self.message)
                .unwrap_or_else(|| "request failed".into())),
        }
    }
}

/// Acknowledgement body for command endpoints (`{success}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Whether the command was accepted.
    pub success: bool,
}

impl Ack {
    /// An accepting acknowledgement.
    pub const YES: Ack = Ack { success: true };
}

/// Pagination metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// Total number of items.
    pub total: u32,
    /// Total number of pages.
    pub total_pages: u32,
    /// Whether a later page exists.
    pub has_next: bool,
    /// Whether an earlier page exists.
    pub has_prev: bool,
}

impl Pagination {
    /// Computes pagination metadata for `page` of a collection of `total` items.
    pub fn for_page(page: u32, limit: u32, total: u32) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

/// A page of items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    /// Items on this page.
    pub data: Vec<T>,
    /// Pagination metadata.
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    /// Slices `page` (1-based) out of `items`.
    pub fn slice(items: &[T], page: u32, limit: u32) -> Self
    where
        T: Clone,
    {
        let total = items.len() as u32;
        let start = (page.saturating_sub(1) as usize).saturating_mul(limit as usize);
        let data = items
            .iter()
            .skip(start)
            .take(limit as usize)
            .cloned()
            .collect();
        Self {
            data,
            pagination: Pagination::for_page(page, limit, total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_math() {
        let p = Pagination::for_page(1, 10, 20);
        assert_eq!(p.total_pages, 2);
        assert!(p.has_next);
        assert!(!p.has_prev);

        let p = Pagination::for_page(2, 10, 20);
        assert!(!p.has_next);
        assert!(p.has_prev);

        let p = Pagination::for_page(1, 10, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_next);
    }

    #[test]
    fn slice_pages() {
        let items: Vec<u32> = (1..=25).collect();
        let page = Paginated::slice(&items, 3, 10);
        assert_eq!(page.data, vec![21, 22, 23, 24, 25]);
        assert!(!page.pagination.has_next);

        let past_end = Paginated::slice(&items, 9, 10);
        assert!(past_end.data.is_empty());
    }

    #[test]
    fn envelope_into_data() {
        let ok: ApiResponse<u32> = serde_json::from_str(r#"{"success":true,"data":7}"#).unwrap();
        assert_eq!(ok.into_data(), Ok(7));

        let err: ApiResponse<u32> =
            serde_json::from_str(r#"{"success":false,"error":"Post not found"}"#).unwrap();
        assert_eq!(err.into_data(), Err("Post not found".to_string()));

        let empty: ApiResponse<u32> = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(empty.into_data().is_err());
    }
}
