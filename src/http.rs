//! HTTP surface for the cart service.
//!
//! The gateway in front of this service authenticates the caller and forwards
//! the user id in the `x-user-id` header. `trusted_user` turns that header into
//! an [`AuthenticatedUser`] extension; handlers read it via [`RequireUser`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, Request, State},
    http::{request::Parts, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::{Validate, ValidationErrors};

use crate::domain::value_objects::{ProductId, SellerId, UserId};
use crate::service::{AddToCart, CartView, UpdateQuantity};
use crate::{CartService, CartServiceError};

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub carts: Arc<CartService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "agrimart-cart"})) }))
        .route("/api/v1/cart", get(get_cart))
        .route("/api/v1/cart/add", post(add_to_cart))
        .route("/api/v1/cart/update", post(update_quantity).put(update_quantity))
        .route("/api/v1/cart/item/:item_id", delete(remove_item))
        .route("/api/v1/cart/clear", delete(clear_cart))
        .layer(middleware::from_fn(trusted_user))
        .with_state(state)
}

// =============================================================================
// Authentication
// =============================================================================

#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserId);

/// Copies the gateway-supplied user id into the request extensions.
pub async fn trusted_user(mut request: Request, next: Next) -> Response {
    let user = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| UserId::new(v).ok());
    if let Some(user) = user {
        request.extensions_mut().insert(AuthenticatedUser(user));
    }
    next.run(request).await
}

/// Extractor that requires an authenticated user.
#[derive(Debug, Clone)]
pub struct RequireUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .map(|u| RequireUser(u.0.clone()))
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "Authentication required", "code": "UNAUTHENTICATED"})),
                )
                    .into_response()
            })
    }
}

// =============================================================================
// Request / response bodies
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    #[validate(required, length(min = 1))]
    pub product_id: Option<String>,
    #[validate(required, range(min = 1))]
    pub quantity: Option<i64>,
    #[serde(rename = "selectedsize", alias = "selectedSize")]
    #[validate(required, length(min = 1))]
    pub selected_size: Option<String>,
    #[validate(required, length(min = 1))]
    pub seller_id: Option<String>,
    /// Accepted from clients but never trusted; prices come from the catalog.
    pub selected_price: Option<f64>,
    pub selected_discounted_price: Option<f64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQuantityRequest {
    #[validate(required, length(min = 1))]
    pub product_id: Option<String>,
    #[serde(alias = "quantity")]
    #[validate(required)]
    pub new_quantity: Option<i64>,
    #[serde(rename = "selectedsize", alias = "selectedSize")]
    #[validate(required, length(min = 1))]
    pub selected_size: Option<String>,
    #[validate(required, length(min = 1))]
    pub seller_id: Option<String>,
    pub selected_price: Option<f64>,
    pub selected_discounted_price: Option<f64>,
}

impl TryFrom<AddToCartRequest> for AddToCart {
    type Error = CartServiceError;

    fn try_from(req: AddToCartRequest) -> Result<Self, Self::Error> {
        req.validate().map_err(first_violation)?;
        let quantity = req.quantity.unwrap_or_default();
        Ok(AddToCart {
            product_id: ProductId::new(req.product_id.unwrap_or_default())?,
            selected_size: req.selected_size.unwrap_or_default(),
            seller_id: SellerId::new(req.seller_id.unwrap_or_default())?,
            quantity: u32::try_from(quantity).map_err(|_| CartServiceError::validation("quantity", "is too large"))?,
        })
    }
}

impl TryFrom<UpdateQuantityRequest> for UpdateQuantity {
    type Error = CartServiceError;

    fn try_from(req: UpdateQuantityRequest) -> Result<Self, Self::Error> {
        req.validate().map_err(first_violation)?;
        Ok(UpdateQuantity {
            product_id: ProductId::new(req.product_id.unwrap_or_default())?,
            selected_size: req.selected_size.unwrap_or_default(),
            seller_id: SellerId::new(req.seller_id.unwrap_or_default())?,
            new_quantity: req.new_quantity.unwrap_or_default(),
        })
    }
}

fn first_violation(errors: ValidationErrors) -> CartServiceError {
    let field_errors = errors.field_errors();
    let mut fields: Vec<_> = field_errors.keys().copied().collect();
    fields.sort_unstable();
    match fields.first() {
        Some(field) => {
            let code = field_errors
                .get(field)
                .and_then(|errs| errs.first())
                .map(|e| e.code.to_string())
                .unwrap_or_default();
            let reason = if code == "required" { "is required".to_string() } else { format!("failed {code} check") };
            CartServiceError::validation(canonical_field(field), reason)
        }
        None => CartServiceError::validation("body", "is invalid"),
    }
}

/// Field names as the service reports them, whichever layer rejected the body.
fn canonical_field(key: &str) -> &str {
    match key {
        "selectedsize" | "selected_size" => "selectedSize",
        "product_id" => "productId",
        "seller_id" => "sellerId",
        "new_quantity" => "newQuantity",
        other => other,
    }
}

fn body_rejection(rejection: JsonRejection) -> CartServiceError {
    CartServiceError::validation("body", rejection.body_text())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CartResponse {
    pub cart: CartView,
}

impl IntoResponse for CartServiceError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            CartServiceError::Validation { field, .. } => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": message, "code": "VALIDATION_FAILED", "field": field})),
            )
                .into_response(),
            CartServiceError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                Json(json!({"error": message, "code": "NOT_FOUND", "resource": resource.to_string()})),
            )
                .into_response(),
            CartServiceError::StockExceeded { ceiling, cart } => (
                StatusCode::CONFLICT,
                Json(json!({"error": message, "code": "STOCK_EXCEEDED", "ceiling": ceiling, "cart": cart})),
            )
                .into_response(),
            CartServiceError::TransientStorage(detail) => {
                tracing::error!(%detail, "Cart storage failure");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"error": "Cart storage temporarily unavailable", "code": "STORAGE_UNAVAILABLE"})),
                )
                    .into_response()
            }
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /api/v1/cart
async fn get_cart(State(s): State<AppState>, RequireUser(user): RequireUser) -> Result<Json<CartResponse>, CartServiceError> {
    let cart = s.carts.get_cart(&user).await?;
    Ok(Json(CartResponse { cart }))
}

/// POST /api/v1/cart/add
async fn add_to_cart(
    State(s): State<AppState>,
    RequireUser(user): RequireUser,
    body: Result<Json<AddToCartRequest>, JsonRejection>,
) -> Result<Json<CartResponse>, CartServiceError> {
    let Json(req) = body.map_err(body_rejection)?;
    let cart = s.carts.add_to_cart(&user, req.try_into()?).await?;
    Ok(Json(CartResponse { cart }))
}

/// PUT|POST /api/v1/cart/update
async fn update_quantity(
    State(s): State<AppState>,
    RequireUser(user): RequireUser,
    body: Result<Json<UpdateQuantityRequest>, JsonRejection>,
) -> Result<Json<CartResponse>, CartServiceError> {
    let Json(req) = body.map_err(body_rejection)?;
    let cart = s.carts.update_quantity(&user, req.try_into()?).await?;
    Ok(Json(CartResponse { cart }))
}

/// DELETE /api/v1/cart/item/:item_id
async fn remove_item(
    State(s): State<AppState>,
    RequireUser(user): RequireUser,
    Path(item_id): Path<String>,
) -> Result<Json<CartResponse>, CartServiceError> {
    let cart = s.carts.remove_item(&user, &item_id).await?;
    Ok(Json(CartResponse { cart }))
}

/// DELETE /api/v1/cart/clear
async fn clear_cart(State(s): State<AppState>, RequireUser(user): RequireUser) -> Result<Json<CartResponse>, CartServiceError> {
    let cart = s.carts.clear_cart(&user).await?;
    Ok(Json(CartResponse { cart }))
}
