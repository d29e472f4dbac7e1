//! # Review sub-flow
//!
//! Ratings are keyed by (order, food) and a customer may only rate foods
//! that were line items of that order. The food's aggregate count/sum moves
//! by the delta of each write, so the stored aggregate always equals a full
//! recount across every order without ever performing one.

use serde::Deserialize;

use crate::{
    database,
    error::AppError,
    models::{Rating, Review},
    state::SharedState,
};

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewRequest {
    pub order_id: Option<String>,
    pub food_id: Option<String>,
    pub rating: Option<u8>,
    #[serde(default)]
    pub review_text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReviewRequest {
    pub order_id: Option<String>,
    pub food_id: Option<String>,
    pub new_rating: Option<u8>,
    #[serde(default)]
    pub new_comment: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReviewRequest {
    pub order_id: Option<String>,
    pub food_id: Option<String>,
}

/// Aggregate (count, sum) movement for a rating write. `old` is the score
/// being replaced, `new` the one taking its place; `None` on either side
/// means absent.
fn rating_delta(old: Option<u8>, new: Option<u8>) -> (i64, i64) {
    let count = i64::from(new.is_some()) - i64::from(old.is_some());
    let sum = new.map_or(0, i64::from) - old.map_or(0, i64::from);

    (count, sum)
}

fn require_field(value: Option<String>, message: &str) -> Result<String, AppError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::validation(message)),
    }
}

async fn write_review(
    state: SharedState,
    order_id: String,
    food_id: String,
    score: u8,
    comment: Option<String>,
) -> Result<(), AppError> {
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(AppError::validation(format!(
            "Rating must be between {MIN_SCORE} and {MAX_SCORE}"
        )));
    }

    let mut conn = state.redis_connection.clone();

    let order = database::get_order(&mut conn, &order_id)
        .await?
        .ok_or(AppError::NotFound("Order"))?;

    if !order.contains_food(&food_id) {
        return Err(AppError::validation("Food item not found in this order"));
    }

    if !database::food_exists(&mut conn, &food_id).await? {
        return Err(AppError::NotFound("Food item"));
    }

    // An update without a comment keeps whatever was there before.
    let comment = match comment {
        Some(comment) => comment,
        None => database::get_rating(&mut conn, &order_id, &food_id)
            .await?
            .map(|rating| rating.comment)
            .unwrap_or_default(),
    };

    let rating = Rating {
        food_id: food_id.clone(),
        rating: score,
        comment,
    };

    let previous = database::upsert_rating(&mut conn, &order_id, &rating).await?;
    let (count_delta, sum_delta) =
        rating_delta(previous.map(|r| r.rating), Some(score));

    database::apply_rating_delta(&mut conn, &food_id, count_delta, sum_delta).await?;
    database::index_food_review(&mut conn, &food_id, &order_id).await?;

    Ok(())
}

pub async fn create_review(
    state: SharedState,
    request: CreateReviewRequest,
) -> Result<(), AppError> {
    let order_id = require_field(request.order_id, "Order ID is required")?;
    let food_id = require_field(request.food_id, "Food ID is required")?;
    let score = request
        .rating
        .ok_or_else(|| AppError::validation("Rating is required"))?;

    write_review(state, order_id, food_id, score, request.review_text).await
}

pub async fn update_review(
    state: SharedState,
    request: UpdateReviewRequest,
) -> Result<(), AppError> {
    let order_id = require_field(request.order_id, "Order ID is required")?;
    let food_id = require_field(request.food_id, "Food ID is required")?;
    let score = request
        .new_rating
        .ok_or_else(|| AppError::validation("Rating is required"))?;

    write_review(state, order_id, food_id, score, request.new_comment).await
}

pub async fn delete_review(
    state: SharedState,
    request: DeleteReviewRequest,
) -> Result<(), AppError> {
    let order_id = require_field(request.order_id, "Order ID is required")?;
    let food_id = require_field(request.food_id, "Food ID is required")?;

    let mut conn = state.redis_connection.clone();

    database::get_order(&mut conn, &order_id)
        .await?
        .ok_or(AppError::NotFound("Order"))?;

    let removed = database::remove_rating(&mut conn, &order_id, &food_id)
        .await?
        .ok_or(AppError::NotFound("Review"))?;

    let (count_delta, sum_delta) = rating_delta(Some(removed.rating), None);
    database::apply_rating_delta(&mut conn, &food_id, count_delta, sum_delta).await?;
    database::unindex_food_review(&mut conn, &food_id, &order_id).await?;

    Ok(())
}

/// Every review of one food across all orders, joined with the reviewer's
/// display data.
pub async fn reviews_for_food(
    state: SharedState,
    food_id: &str,
) -> Result<Vec<Review>, AppError> {
    let mut conn = state.redis_connection.clone();
    let order_ids = database::food_review_orders(&mut conn, food_id).await?;

    let mut reviews = Vec::with_capacity(order_ids.len());

    for order_id in order_ids {
        // Tolerate stale index entries rather than failing the whole read.
        let Some(order) = database::get_order(&mut conn, &order_id).await? else {
            continue;
        };
        let Some(rating) = database::get_rating(&mut conn, &order_id, food_id).await? else {
            continue;
        };

        let customer = database::get_user(&mut conn, &order.customer).await?;

        reviews.push(Review {
            rating: rating.rating,
            comment: rating.comment,
            name: customer
                .as_ref()
                .map(|user| user.display_name())
                .unwrap_or_else(|| "Unknown customer".to_string()),
            profile_pic_url: customer.as_ref().and_then(|user| user.profile_url.clone()),
            customer_id: order.customer,
            order_id,
            food_id: food_id.to_string(),
        });
    }

    if reviews.is_empty() {
        return Err(AppError::NotFound("Reviews"));
    }

    Ok(reviews)
}

#[cfg(test)]
mod tests {
    use super::rating_delta;

    #[test]
    fn test_insert_delta() {
        assert_eq!(rating_delta(None, Some(4)), (1, 4));
    }

    #[test]
    fn test_replace_delta_keeps_count() {
        assert_eq!(rating_delta(Some(2), Some(5)), (0, 3));
        assert_eq!(rating_delta(Some(5), Some(2)), (0, -3));
        assert_eq!(rating_delta(Some(3), Some(3)), (0, 0));
    }

    #[test]
    fn test_delete_delta() {
        assert_eq!(rating_delta(Some(4), None), (-1, -4));
    }

    // The aggregate maintained by deltas must always equal a recount of the
    // live ratings, whatever sequence of writes produced it.
    #[test]
    fn test_delta_aggregate_matches_recount() {
        // (order, old score -> new score), None meaning absent
        let writes: &[(&str, Option<u8>, Option<u8>)] = &[
            ("o1", None, Some(5)),
            ("o2", None, Some(3)),
            ("o1", Some(5), Some(4)),
            ("o3", None, Some(1)),
            ("o2", Some(3), None),
            ("o2", None, Some(2)),
        ];

        let mut count = 0i64;
        let mut sum = 0i64;
        let mut live: std::collections::HashMap<&str, u8> = Default::default();

        for &(order, old, new) in writes {
            let (dc, ds) = rating_delta(old, new);
            count += dc;
            sum += ds;

            match new {
                Some(score) => {
                    live.insert(order, score);
                }
                None => {
                    live.remove(order);
                }
            }
        }

        assert_eq!(count as usize, live.len());
        assert_eq!(sum, live.values().map(|&s| i64::from(s)).sum::<i64>());

        let mean = sum as f64 / count as f64;
        assert!((mean - (4 + 1 + 2) as f64 / 3.0).abs() < f64::EPSILON);
    }
}
