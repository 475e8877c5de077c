use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A page as returned by a source page list
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PageInfo {
    pub index: usize,
    pub url: String,
    pub image_url: Option<String>,
}

/// Raw image body and the content type reported by the server, if any
#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub content_type: Option<String>,
    pub data: Bytes,
}
