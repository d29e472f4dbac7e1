use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    database,
    error::AppError,
    models::{Cart, CartItem, Order, OrderWithCustomer, User},
    orders::{self, CheckoutSessionRequest, CreateOrderRequest, UpdateOrderRequest},
    reviews::{self, CreateReviewRequest, DeleteReviewRequest, UpdateReviewRequest},
    state::SharedState,
};

pub const SIGNATURE_HEADER: &str = "gateway-signature";

/// `GET /orders`: every order ascending by creation time, customer joined.
pub async fn all_orders(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.redis_connection.clone();
    let order_ids = database::all_order_ids(&mut conn).await?;

    let mut users: HashMap<String, Option<User>> = HashMap::new();
    let mut result = Vec::with_capacity(order_ids.len());

    for order_id in order_ids {
        let Some(order) = database::get_order(&mut conn, &order_id).await? else {
            continue;
        };

        let customer_detail = match users.get(&order.customer) {
            Some(user) => user.clone(),
            None => {
                let user = database::get_user(&mut conn, &order.customer).await?;
                users.insert(order.customer.clone(), user.clone());
                user
            }
        };

        result.push(OrderWithCustomer {
            order,
            customer_detail,
        });
    }

    Ok(Json(result))
}

/// `GET /orders/user/:userId`: one user's orders ascending by creation
/// time. Line items already carry their name/description/price snapshots.
pub async fn orders_for_user(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.redis_connection.clone();
    let order_ids = database::user_order_ids(&mut conn, &user_id).await?;

    let mut result: Vec<Order> = Vec::with_capacity(order_ids.len());
    for order_id in order_ids {
        if let Some(order) = database::get_order(&mut conn, &order_id).await? {
            result.push(order);
        }
    }

    Ok(Json(result))
}

/// `POST /orders`
pub async fn create_order(
    State(state): State<SharedState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let order = orders::create_order(state, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Order created successfully and email sent.",
            "order": order,
        })),
    ))
}

/// `POST /orders/checkout-session`
pub async fn checkout_session(
    State(state): State<SharedState>,
    Json(request): Json<CheckoutSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session_id = orders::create_checkout_session(state, request).await?;

    Ok((StatusCode::CREATED, Json(json!({ "id": session_id }))))
}

/// `POST /orders/webhook`: raw body plus signature header; nothing in the
/// payload is parsed before the signature verifies.
pub async fn webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    orders::handle_webhook(state, &body, signature).await?;

    Ok(Json(json!({ "received": true })))
}

/// `GET /orders/count`
pub async fn order_count(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.redis_connection.clone();
    let count = database::order_count(&mut conn).await?;

    Ok(Json(json!({ "count": count })))
}

/// `GET /orders/:id`
pub async fn single_order(
    State(state): State<SharedState>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.redis_connection.clone();
    let order = database::get_order(&mut conn, &order_id)
        .await?
        .ok_or(AppError::NotFound("Order"))?;

    Ok(Json(order))
}

/// `PUT /orders`
pub async fn update_order(
    State(state): State<SharedState>,
    Json(request): Json<UpdateOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    orders::update_status(state, request).await?;

    Ok(Json(json!({ "msg": "Successfully Updated and email sent" })))
}

/// `POST /orders/review`
pub async fn create_review(
    State(state): State<SharedState>,
    Json(request): Json<CreateReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    reviews::create_review(state, request).await?;

    Ok(Json(json!({ "message": "Review submitted successfully" })))
}

/// `PUT /orders/review`
pub async fn update_review(
    State(state): State<SharedState>,
    Json(request): Json<UpdateReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    reviews::update_review(state, request).await?;

    Ok(Json(json!({ "msg": "Review updated successfully" })))
}

/// `DELETE /orders/review`
pub async fn delete_review(
    State(state): State<SharedState>,
    Json(request): Json<DeleteReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    reviews::delete_review(state, request).await?;

    Ok(Json(json!({ "msg": "Review deleted successfully" })))
}

/// `GET /orders/reviews/:id`: all reviews for a food id.
pub async fn food_reviews(
    State(state): State<SharedState>,
    Path(food_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let result = reviews::reviews_for_food(state, &food_id).await?;

    Ok(Json(json!({ "reviews": result })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartRequest {
    pub user_id: Option<String>,
    pub items: Option<Vec<CartItem>>,
    pub total_price: Option<f64>,
}

/// `POST /carts` is find-or-create: the per-user key makes every write an
/// upsert of the single cart a user may have.
pub async fn upsert_cart(
    State(state): State<SharedState>,
    Json(request): Json<CartRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = match request.user_id {
        Some(id) if !id.is_empty() => id,
        _ => return Err(AppError::validation("User ID is required")),
    };
    let items = request
        .items
        .ok_or_else(|| AppError::validation("Items are required"))?;
    let total_price = request
        .total_price
        .ok_or_else(|| AppError::validation("Total price is required"))?;

    if !orders::total_matches(
        items.iter().map(|item| (item.price, item.quantity)),
        total_price,
    ) {
        return Err(AppError::validation(
            "Total price does not match the cart items",
        ));
    }

    let cart = Cart {
        user,
        items,
        total_price,
    };

    let mut conn = state.redis_connection.clone();
    database::put_cart(&mut conn, &cart).await?;

    Ok(Json(json!({ "message": "Cart saved" })))
}

/// `GET /carts/:userId`
pub async fn get_cart(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.redis_connection.clone();
    let cart = database::get_cart(&mut conn, &user_id)
        .await?
        .ok_or(AppError::NotFound("Cart"))?;

    Ok(Json(cart))
}

/// `DELETE /carts/:userId`
pub async fn delete_cart(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = state.redis_connection.clone();

    if !database::delete_cart(&mut conn, &user_id).await? {
        return Err(AppError::NotFound("Cart"));
    }

    Ok(Json(json!({ "message": "Cart deleted" })))
}
