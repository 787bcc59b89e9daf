//! House listing handlers
//!
//! Reads are public. Mutations require an authenticated identity, and
//! update/delete additionally require that identity to be the listing's seller.

use super::AppState;
use crate::api::models::{
    CreateListingRequest, DeleteListingResponse, UpdateListingRequest, MAX_DESCRIPTION_LENGTH,
    MAX_IMAGE_URL_LENGTH, MAX_LOCATION_LENGTH, MAX_TITLE_LENGTH,
};
use crate::auth::middleware::AuthUser;
use crate::auth::ownership::{authorize, Access};
use crate::core::error::{Result, RentError};
use crate::db::models::{Listing, Seller};
use crate::db::repository::Repository;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

fn required_text(field: &str, value: &str, max: usize) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RentError::ValidationError(format!("{} is required", field)));
    }
    if value.chars().count() > max {
        return Err(RentError::ValidationError(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(value.to_string())
}

fn valid_price(price: i64) -> Result<i64> {
    if price <= 0 {
        return Err(RentError::ValidationError("Price must be a positive number".to_string()));
    }
    Ok(price)
}

/// Blank means no image
fn optional_image_url(url: Option<&str>) -> Result<Option<String>> {
    let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    if url.len() > MAX_IMAGE_URL_LENGTH || !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(RentError::ValidationError(
            "Image URL must be an http(s) address".to_string(),
        ));
    }
    Ok(Some(url.to_string()))
}

/// Load a listing and check that `user` may mutate it
async fn owned_listing(state: &AppState, user: &AuthUser, id: &str) -> Result<Listing> {
    let listing = state
        .listing_repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| RentError::NotFound(format!("Listing {} not found", id)))?;

    let access = authorize(&user.id, &listing.seller.id);
    if access == Access::Forbidden {
        tracing::warn!(
            user_id = %user.id,
            listing_id = %listing.id,
            seller_id = %listing.seller.id,
            "Ownership check failed"
        );
    }
    access.require()?;

    Ok(listing)
}

/// Handler for GET /api/houses - All listings, newest first
pub async fn list_listings(State(state): State<AppState>) -> Result<Json<Vec<Listing>>> {
    Ok(Json(state.listing_repo.find_all().await?))
}

/// Handler for GET /api/houses/:id
pub async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Listing>> {
    state
        .listing_repo
        .find_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| RentError::NotFound(format!("Listing {} not found", id)))
}

/// Handler for GET /api/users/me/houses - The caller's own listings
pub async fn my_listings(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Listing>>> {
    Ok(Json(state.listing_repo.find_by_seller(&user.id).await?))
}

/// Handler for POST /api/houses
pub async fn create_listing(
    State(state): State<AppState>,
    user: AuthUser,
    body: std::result::Result<Json<CreateListingRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(req) = body?;
    let now = Utc::now().to_rfc3339();

    let listing = Listing {
        id: Uuid::new_v4().to_string(),
        title: required_text("Title", &req.title, MAX_TITLE_LENGTH)?,
        location: required_text("Location", &req.location, MAX_LOCATION_LENGTH)?,
        price: valid_price(req.price)?,
        description: required_text("Description", &req.description, MAX_DESCRIPTION_LENGTH)?,
        image_url: optional_image_url(req.image_url.as_deref())?,
        seller: Seller {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
        },
        created_at: now.clone(),
        updated_at: now,
    };

    state.listing_repo.create(&listing).await?;
    tracing::info!(user_id = %user.id, listing_id = %listing.id, "Listing created");

    Ok((StatusCode::CREATED, Json(listing)))
}

/// Handler for PUT|PATCH /api/houses/:id
pub async fn update_listing(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    body: std::result::Result<Json<UpdateListingRequest>, JsonRejection>,
) -> Result<Json<Listing>> {
    let Json(req) = body?;
    let mut listing = owned_listing(&state, &user, &id).await?;

    if let Some(title) = req.title {
        listing.title = required_text("Title", &title, MAX_TITLE_LENGTH)?;
    }
    if let Some(location) = req.location {
        listing.location = required_text("Location", &location, MAX_LOCATION_LENGTH)?;
    }
    if let Some(price) = req.price {
        listing.price = valid_price(price)?;
    }
    if let Some(description) = req.description {
        listing.description = required_text("Description", &description, MAX_DESCRIPTION_LENGTH)?;
    }
    if let Some(image_url) = req.image_url {
        listing.image_url = optional_image_url(Some(&image_url))?;
    }
    listing.updated_at = Utc::now().to_rfc3339();

    state.listing_repo.update(&listing).await?;
    tracing::info!(user_id = %user.id, listing_id = %listing.id, "Listing updated");

    Ok(Json(listing))
}

/// Handler for DELETE /api/houses/:id
pub async fn delete_listing(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DeleteListingResponse>> {
    let listing = owned_listing(&state, &user, &id).await?;

    state.listing_repo.delete(&listing.id).await?;
    tracing::info!(user_id = %user.id, listing_id = %listing.id, "Listing deleted");

    Ok(Json(DeleteListingResponse {
        message: "Listing deleted".to_string(),
        id: listing.id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_text() {
        assert_eq!(required_text("Title", "  Bedsitter ", 10).unwrap(), "Bedsitter");
        assert!(required_text("Title", "   ", 10).is_err());
        assert!(required_text("Title", "a very long title", 5).is_err());
    }

    #[test]
    fn test_price_must_be_positive() {
        assert!(valid_price(0).is_err());
        assert!(valid_price(-5).is_err());
        assert_eq!(valid_price(25_000).unwrap(), 25_000);
    }

    #[test]
    fn test_image_url() {
        assert_eq!(optional_image_url(None).unwrap(), None);
        assert_eq!(optional_image_url(Some("  ")).unwrap(), None);
        assert!(optional_image_url(Some("ftp://x/y.png")).is_err());
        assert_eq!(
            optional_image_url(Some("https://cdn.example.com/a.jpg")).unwrap().as_deref(),
            Some("https://cdn.example.com/a.jpg")
        );
    }
}
