//! # Redis document store
//!
//! All persistent state lives in Redis:
//! - orders, carts and users as JSON documents under `order:{id}`,
//!   `cart:{userId}` and `user:{id}`
//! - the order listing as sorted sets (`orders`, `orders:user:{userId}`)
//!   scored by creation time, so ascending reads are a plain `ZRANGE`
//! - ratings as a per-order hash (`ratings:{orderId}`) keyed by food id,
//!   which gives the one-rating-per-(order, food) uniqueness and atomic
//!   upsert for free
//! - food rating aggregates as `rating_count`/`rating_sum` hash fields on
//!   `food:{id}`, maintained by `HINCRBY` deltas instead of rescans
//! - processed webhook event ids as `event:{id}` claims written with
//!   `SET NX EX`, the explicit idempotency record for redeliveries
//!
//! Carts are consumed with `GETDEL`, so finalization acquires and deletes
//! the cart in one step and two racing webhook deliveries cannot both see
//! it.

use std::time::Duration;

use redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    AsyncCommands, Client, Script,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    error::AppError,
    models::{Cart, Order, Rating, User},
};

pub const ORDERS_INDEX: &str = "orders";

pub const RATING_COUNT_FIELD: &str = "rating_count";
pub const RATING_SUM_FIELD: &str = "rating_sum";

/// Processed-event claims outlive any plausible gateway redelivery window.
const EVENT_CLAIM_TTL_SECS: u64 = 60 * 60 * 24 * 3;

const UPSERT_RATING_LUA: &str = r"
local old = redis.call('HGET', KEYS[1], ARGV[1])
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return old";

const REMOVE_RATING_LUA: &str = r"
local old = redis.call('HGET', KEYS[1], ARGV[1])
if old then redis.call('HDEL', KEYS[1], ARGV[1]) end
return old";

pub async fn init_redis(redis_url: &str) -> ConnectionManager {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url).unwrap();

    client
        .get_connection_manager_with_config(config)
        .await
        .unwrap()
}

fn order_key(order_id: &str) -> String {
    format!("order:{order_id}")
}

fn user_orders_key(user_id: &str) -> String {
    format!("orders:user:{user_id}")
}

fn ratings_key(order_id: &str) -> String {
    format!("ratings:{order_id}")
}

fn food_key(food_id: &str) -> String {
    format!("food:{food_id}")
}

fn food_reviews_key(food_id: &str) -> String {
    format!("reviews:food:{food_id}")
}

fn cart_key(user_id: &str) -> String {
    format!("cart:{user_id}")
}

fn user_key(user_id: &str) -> String {
    format!("user:{user_id}")
}

fn event_key(event_id: &str) -> String {
    format!("event:{event_id}")
}

async fn get_document<T: DeserializeOwned>(
    conn: &mut ConnectionManager,
    key: &str,
) -> Result<Option<T>, AppError> {
    let raw: Option<String> = conn.get(key).await?;

    match raw {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

async fn put_document<T: Serialize>(
    conn: &mut ConnectionManager,
    key: &str,
    document: &T,
) -> Result<(), AppError> {
    let json = serde_json::to_string(document)?;
    let _: () = conn.set(key, json).await?;

    Ok(())
}

/// Persist a new order and index it in both listings, atomically.
pub async fn put_order(conn: &mut ConnectionManager, order: &Order) -> Result<(), AppError> {
    let json = serde_json::to_string(order)?;
    let score = order.created_at.timestamp_millis();

    let _: () = redis::pipe()
        .atomic()
        .set(order_key(&order.id), json)
        .ignore()
        .zadd(ORDERS_INDEX, &order.id, score)
        .ignore()
        .zadd(user_orders_key(&order.customer), &order.id, score)
        .ignore()
        .query_async(conn)
        .await?;

    Ok(())
}

/// Rewrite an existing order document in place. Indexes keep their original
/// creation-time score.
pub async fn save_order(conn: &mut ConnectionManager, order: &Order) -> Result<(), AppError> {
    put_document(conn, &order_key(&order.id), order).await
}

pub async fn get_order(
    conn: &mut ConnectionManager,
    order_id: &str,
) -> Result<Option<Order>, AppError> {
    get_document(conn, &order_key(order_id)).await
}

/// All order ids, ascending by creation time.
pub async fn all_order_ids(conn: &mut ConnectionManager) -> Result<Vec<String>, AppError> {
    Ok(conn.zrange(ORDERS_INDEX, 0, -1).await?)
}

pub async fn user_order_ids(
    conn: &mut ConnectionManager,
    user_id: &str,
) -> Result<Vec<String>, AppError> {
    Ok(conn.zrange(user_orders_key(user_id), 0, -1).await?)
}

pub async fn order_count(conn: &mut ConnectionManager) -> Result<u64, AppError> {
    Ok(conn.zcard(ORDERS_INDEX).await?)
}

pub async fn get_user(
    conn: &mut ConnectionManager,
    user_id: &str,
) -> Result<Option<User>, AppError> {
    get_document(conn, &user_key(user_id)).await
}

pub async fn get_cart(
    conn: &mut ConnectionManager,
    user_id: &str,
) -> Result<Option<Cart>, AppError> {
    get_document(conn, &cart_key(user_id)).await
}

pub async fn put_cart(conn: &mut ConnectionManager, cart: &Cart) -> Result<(), AppError> {
    put_document(conn, &cart_key(&cart.user), cart).await
}

/// Atomically fetch and delete the user's cart. Order finalization goes
/// through here so the cart can be claimed by exactly one caller.
pub async fn take_cart(
    conn: &mut ConnectionManager,
    user_id: &str,
) -> Result<Option<Cart>, AppError> {
    let raw: Option<String> = conn.get_del(cart_key(user_id)).await?;

    match raw {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub async fn delete_cart(conn: &mut ConnectionManager, user_id: &str) -> Result<bool, AppError> {
    let removed: u64 = conn.del(cart_key(user_id)).await?;

    Ok(removed > 0)
}

/// Claim a gateway event id. Returns false when the event was already
/// processed, which callers treat as a duplicate delivery.
pub async fn claim_event(
    conn: &mut ConnectionManager,
    event_id: &str,
) -> Result<bool, AppError> {
    let reply: Option<String> = redis::cmd("SET")
        .arg(event_key(event_id))
        .arg(1)
        .arg("NX")
        .arg("EX")
        .arg(EVENT_CLAIM_TTL_SECS)
        .query_async(conn)
        .await?;

    Ok(reply.is_some())
}

/// Drop a previously claimed event id so the gateway's redelivery can be
/// processed again. Used to unwind a finalization that failed after the
/// claim.
pub async fn release_event(
    conn: &mut ConnectionManager,
    event_id: &str,
) -> Result<(), AppError> {
    let _: () = conn.del(event_key(event_id)).await?;

    Ok(())
}

/// Write the rating for its (order, food) pair and return the one it
/// replaced, if any. Runs as a script so concurrent writers serialize on a
/// single find-and-replace instead of racing a read-modify-write.
pub async fn upsert_rating(
    conn: &mut ConnectionManager,
    order_id: &str,
    rating: &Rating,
) -> Result<Option<Rating>, AppError> {
    let json = serde_json::to_string(rating)?;

    let old: Option<String> = Script::new(UPSERT_RATING_LUA)
        .key(ratings_key(order_id))
        .arg(&rating.food_id)
        .arg(json)
        .invoke_async(conn)
        .await?;

    match old {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Remove the rating for the (order, food) pair, returning it if it existed.
pub async fn remove_rating(
    conn: &mut ConnectionManager,
    order_id: &str,
    food_id: &str,
) -> Result<Option<Rating>, AppError> {
    let old: Option<String> = Script::new(REMOVE_RATING_LUA)
        .key(ratings_key(order_id))
        .arg(food_id)
        .invoke_async(conn)
        .await?;

    match old {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub async fn get_rating(
    conn: &mut ConnectionManager,
    order_id: &str,
    food_id: &str,
) -> Result<Option<Rating>, AppError> {
    let raw: Option<String> = conn.hget(ratings_key(order_id), food_id).await?;

    match raw {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub async fn order_ratings(
    conn: &mut ConnectionManager,
    order_id: &str,
) -> Result<Vec<Rating>, AppError> {
    let raw: Vec<String> = conn.hvals(ratings_key(order_id)).await?;

    raw.iter()
        .map(|json| serde_json::from_str(json).map_err(AppError::from))
        .collect()
}

pub async fn food_exists(
    conn: &mut ConnectionManager,
    food_id: &str,
) -> Result<bool, AppError> {
    Ok(conn.exists(food_key(food_id)).await?)
}

/// Shift the food's rating aggregate by the given deltas, atomically. Mean
/// is derived on read as sum/count, so a delta here is the whole write.
pub async fn apply_rating_delta(
    conn: &mut ConnectionManager,
    food_id: &str,
    count_delta: i64,
    sum_delta: i64,
) -> Result<(), AppError> {
    if count_delta == 0 && sum_delta == 0 {
        return Ok(());
    }

    let key = food_key(food_id);
    let _: () = redis::pipe()
        .atomic()
        .hincr(&key, RATING_COUNT_FIELD, count_delta)
        .ignore()
        .hincr(&key, RATING_SUM_FIELD, sum_delta)
        .ignore()
        .query_async(conn)
        .await?;

    Ok(())
}

pub async fn index_food_review(
    conn: &mut ConnectionManager,
    food_id: &str,
    order_id: &str,
) -> Result<(), AppError> {
    let _: () = conn.sadd(food_reviews_key(food_id), order_id).await?;

    Ok(())
}

pub async fn unindex_food_review(
    conn: &mut ConnectionManager,
    food_id: &str,
    order_id: &str,
) -> Result<(), AppError> {
    let _: () = conn.srem(food_reviews_key(food_id), order_id).await?;

    Ok(())
}

/// Ids of every order holding a rating for this food.
pub async fn food_review_orders(
    conn: &mut ConnectionManager,
    food_id: &str,
) -> Result<Vec<String>, AppError> {
    Ok(conn.smembers(food_reviews_key(food_id)).await?)
}
