use serde::{Deserialize, Serialize};

pub const MAX_TITLE_LENGTH: usize = 200;
pub const MAX_LOCATION_LENGTH: usize = 200;
pub const MAX_DESCRIPTION_LENGTH: usize = 5000;
pub const MAX_IMAGE_URL_LENGTH: usize = 2048;

/// Request body for POST /api/houses
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateListingRequest {
    pub title: String,
    pub location: String,
    /// Monthly rent in KES
    pub price: i64,
    pub description: String,
    #[serde(alias = "imageUrl")]
    pub image_url: Option<String>,
}

/// Request body for PUT/PATCH /api/houses/:id; absent fields are kept
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateListingRequest {
    pub title: Option<String>,
    pub location: Option<String>,
    pub price: Option<i64>,
    pub description: Option<String>,
    /// An empty string removes the image
    #[serde(alias = "imageUrl")]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteListingResponse {
    pub message: String,
    pub id: String,
}
