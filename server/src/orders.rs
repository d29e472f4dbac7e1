//! # Order workflow
//!
//! Coordinates the order lifecycle: cart-to-order conversion, checkout
//! session creation, webhook-driven finalization and status transitions.
//! Persistence is the primary effect everywhere; email and push dispatch
//! are spawned out-of-band and only logged on failure.

use chrono::Utc;
use redis::aio::ConnectionManager;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use payments::{webhook, ProductDescriptor};

use crate::{
    database, emails,
    error::AppError,
    models::{Cart, ImageRef, LineItem, Order, OrderStatus, PaymentStatus, User},
    state::SharedState,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: Option<String>,
    pub food_items: Option<Vec<OrderSelection>>,
    pub total_price: Option<f64>,
    pub payment_method: Option<String>,
}

#[derive(Deserialize)]
pub struct OrderSelection {
    pub food: FoodSnapshot,
    pub quantity: u32,
    pub price: f64,
}

/// Catalog data as the client saw it when the item went into the cart.
/// `price` defaults to zero because order creation prices from the
/// selection, not the snapshot; the checkout path re-validates it.
#[derive(Deserialize)]
pub struct FoodSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub price: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    pub order: Vec<OrderDraft>,
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
pub struct OrderDraft {
    pub id: String,
    pub items: Vec<OrderSelection>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderRequest {
    pub order_id: Option<String>,
    pub status: Option<String>,
}

/// Total of the given (unit price, quantity) pairs in minor units. The unit
/// price is rounded before multiplication, matching what the gateway will
/// charge.
pub fn items_total_minor_units<I>(items: I) -> i64
where
    I: IntoIterator<Item = (f64, u32)>,
{
    items
        .into_iter()
        .map(|(price, quantity)| payments::to_minor_units(price) * i64::from(quantity))
        .sum()
}

/// Whether the declared total equals the line-item sum, compared in minor
/// units so float representation noise cannot fail an honest request.
pub fn total_matches<I>(items: I, declared_total: f64) -> bool
where
    I: IntoIterator<Item = (f64, u32)>,
{
    items_total_minor_units(items) == payments::to_minor_units(declared_total)
}

fn require<T>(value: Option<T>, message: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::validation(message))
}

fn require_id(value: Option<String>, message: &str) -> Result<String, AppError> {
    match value {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(AppError::validation(message)),
    }
}

/// Convert a submitted cart into a persisted order. The declared total must
/// equal the line-item sum; the user's stored cart is deleted afterwards and
/// the confirmation email goes out fire-and-forget.
pub async fn create_order(
    state: SharedState,
    request: CreateOrderRequest,
) -> Result<Order, AppError> {
    let user_id = require_id(request.user_id, "User ID is required")?;
    let selections = require(request.food_items, "Food items are required")?;
    let total = require(request.total_price, "Total price is required")?;

    if selections.is_empty() {
        return Err(AppError::validation("Food items are required"));
    }

    let items: Vec<LineItem> = selections
        .into_iter()
        .map(|selection| LineItem {
            food_id: selection.food.id,
            name: selection.food.name,
            description: selection.food.description,
            price: selection.price,
            quantity: selection.quantity,
        })
        .collect();

    if !total_matches(items.iter().map(|i| (i.price, i.quantity)), total) {
        return Err(AppError::validation(
            "Total price does not match the order items",
        ));
    }

    let order = Order {
        id: Uuid::new_v4().to_string(),
        customer: user_id,
        items,
        total_amount: total,
        payment_method: request.payment_method.unwrap_or_else(|| "Cash".to_string()),
        payment_status: PaymentStatus::Unpaid,
        status: OrderStatus::Pending,
        created_at: Utc::now(),
    };

    let mut conn = state.redis_connection.clone();
    database::put_order(&mut conn, &order).await?;
    database::delete_cart(&mut conn, &order.customer).await?;

    send_order_email(state, &order).await;

    Ok(order)
}

/// Map an order draft to gateway product descriptors. Every line must carry
/// a positive unit price; a client payload that lost the snapshot price
/// would otherwise open a zero-amount session.
fn descriptors_from_draft(draft: &OrderDraft) -> Result<Vec<ProductDescriptor>, AppError> {
    if draft.items.is_empty() {
        return Err(AppError::validation("Order items are required"));
    }

    draft
        .items
        .iter()
        .map(|item| {
            if item.food.price <= 0.0 {
                return Err(AppError::validation(format!(
                    "Missing or invalid unit price for {}",
                    item.food.name
                )));
            }

            Ok(ProductDescriptor {
                name: item.food.name.clone(),
                description: item.food.description.clone(),
                image_urls: item.food.images.iter().map(|image| image.url.clone()).collect(),
                unit_price: item.food.price,
                quantity: item.quantity,
            })
        })
        .collect()
}

/// Request a hosted checkout session for an in-progress order. Returns the
/// opaque session id the client redirects to.
pub async fn create_checkout_session(
    state: SharedState,
    request: CheckoutSessionRequest,
) -> Result<String, AppError> {
    let user_id = require_id(request.user_id, "User ID is required")?;
    let draft = request
        .order
        .first()
        .ok_or_else(|| AppError::validation("Order is required"))?;

    let descriptors = descriptors_from_draft(draft)?;

    let session = state
        .gateway
        .create_checkout_session(&descriptors, &draft.id, &user_id)
        .await?;

    Ok(session.id)
}

/// Store operations the finalization sequence needs, in the order it runs
/// them. Production goes straight to Redis; tests substitute an in-memory
/// store.
pub(crate) trait FinalizationStore {
    async fn claim_event(&mut self, event_id: &str) -> Result<bool, AppError>;
    async fn release_event(&mut self, event_id: &str) -> Result<(), AppError>;
    async fn take_cart(&mut self, user_id: &str) -> Result<Option<Cart>, AppError>;
    async fn restore_cart(&mut self, cart: &Cart) -> Result<(), AppError>;
    async fn put_order(&mut self, order: &Order) -> Result<(), AppError>;
}

impl FinalizationStore for ConnectionManager {
    async fn claim_event(&mut self, event_id: &str) -> Result<bool, AppError> {
        database::claim_event(self, event_id).await
    }

    async fn release_event(&mut self, event_id: &str) -> Result<(), AppError> {
        database::release_event(self, event_id).await
    }

    async fn take_cart(&mut self, user_id: &str) -> Result<Option<Cart>, AppError> {
        database::take_cart(self, user_id).await
    }

    async fn restore_cart(&mut self, cart: &Cart) -> Result<(), AppError> {
        database::put_cart(self, cart).await
    }

    async fn put_order(&mut self, order: &Order) -> Result<(), AppError> {
        database::put_order(self, order).await
    }
}

#[derive(Debug)]
pub(crate) enum Finalization {
    Completed(Order),
    Duplicate,
}

/// Run the claim, cart take and order write for a completed checkout.
///
/// The event-id claim makes redelivery of the same event a no-op; the
/// atomic cart take backstops distinct events settling the same cart. Any
/// failure after the claim restores the cart and releases the claim, so
/// the gateway's retry finds the store exactly as it was and the paid
/// customer is never left with neither cart nor order.
pub(crate) async fn finalize_checkout<S: FinalizationStore>(
    store: &mut S,
    event_id: &str,
    user_id: &str,
) -> Result<Finalization, AppError> {
    if !store.claim_event(event_id).await? {
        return Ok(Finalization::Duplicate);
    }

    let cart = match store.take_cart(user_id).await? {
        Some(cart) if !cart.items.is_empty() => cart,
        Some(empty) => {
            unwind(store, event_id, Some(&empty)).await;
            return Err(AppError::NotFound("Cart"));
        }
        None => {
            unwind(store, event_id, None).await;
            return Err(AppError::NotFound("Cart"));
        }
    };

    let order = order_from_cart(&cart);

    if let Err(e) = store.put_order(&order).await {
        unwind(store, event_id, Some(&cart)).await;
        return Err(e);
    }

    Ok(Finalization::Completed(order))
}

async fn unwind<S: FinalizationStore>(store: &mut S, event_id: &str, cart: Option<&Cart>) {
    if let Some(cart) = cart {
        if let Err(e) = store.restore_cart(cart).await {
            warn!(
                "Failed to restore cart for user {} while unwinding event {event_id}: {e}",
                cart.user
            );
        }
    }

    if let Err(e) = store.release_event(event_id).await {
        warn!("Failed to release claim on event {event_id}: {e}");
    }
}

/// Handle a signed gateway event. Only `checkout.session.completed`
/// finalizes anything; every other type is acknowledged and dropped.
pub async fn handle_webhook(
    state: SharedState,
    payload: &[u8],
    signature_header: &str,
) -> Result<(), AppError> {
    let event = webhook::verify_and_parse(
        payload,
        signature_header,
        &state.config.webhook_secret,
        Utc::now().timestamp(),
        webhook::DEFAULT_TOLERANCE_SECS,
    )?;

    if event.kind != webhook::CHECKOUT_COMPLETED {
        info!("Ignoring gateway event {} of type {}", event.id, event.kind);
        return Ok(());
    }

    let user_id = require_id(
        event.data.object.metadata.user_id,
        "Event metadata is missing the user id",
    )?;

    let mut conn = state.redis_connection.clone();

    match finalize_checkout(&mut conn, &event.id, &user_id).await? {
        Finalization::Duplicate => {
            info!("Duplicate delivery of gateway event {}, skipping", event.id);
        }
        Finalization::Completed(order) => {
            info!(
                "Finalized order {} for user {} from gateway event {}",
                order.id, order.customer, event.id
            );
            send_order_email(state, &order).await;
        }
    }

    Ok(())
}

fn order_from_cart(cart: &Cart) -> Order {
    let items = cart
        .items
        .iter()
        .map(|item| LineItem {
            food_id: item.food_id.clone(),
            name: item.name.clone(),
            description: item.description.clone(),
            price: item.price,
            quantity: item.quantity,
        })
        .collect();

    Order {
        id: Uuid::new_v4().to_string(),
        customer: cart.user.clone(),
        items,
        total_amount: cart.total_price,
        payment_method: "Credit Card".to_string(),
        payment_status: PaymentStatus::Paid,
        status: OrderStatus::Processing,
        created_at: Utc::now(),
    }
}

/// Move an order to a new workflow status and notify the customer. The
/// status write is the primary effect; notification failures are logged.
pub async fn update_status(
    state: SharedState,
    request: UpdateOrderRequest,
) -> Result<(), AppError> {
    let order_id = require_id(request.order_id, "Order ID is required")?;
    let raw_status = require(request.status, "Status is required")?;

    let status: OrderStatus = raw_status
        .parse()
        .map_err(|_| AppError::validation("Invalid status value"))?;

    let mut conn = state.redis_connection.clone();
    let mut order = database::get_order(&mut conn, &order_id)
        .await?
        .ok_or(AppError::NotFound("Order"))?;

    if !order.status.can_transition_to(status) {
        return Err(AppError::validation(format!(
            "Order is {} and cannot move to {status}",
            order.status
        )));
    }

    order.status = status;
    database::save_order(&mut conn, &order).await?;

    let user = database::get_user(&mut conn, &order.customer)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    let html = emails::status_update(&order.id, status, &order.items, order.total_amount);
    spawn_email(state.clone(), user.email.clone(), "Order Update", html);
    spawn_push(state, user, order.id, status);

    Ok(())
}

/// Look the customer up and send the order confirmation. Both the lookup
/// and the send are best-effort; the order already stands.
async fn send_order_email(state: SharedState, order: &Order) {
    let mut conn = state.redis_connection.clone();

    let user = match database::get_user(&mut conn, &order.customer).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(
                "No user {} for order {}, skipping confirmation email",
                order.customer, order.id
            );
            return;
        }
        Err(e) => {
            warn!("Failed to load user for order {}: {e}", order.id);
            return;
        }
    };

    let html = emails::order_summary(
        &order.payment_method,
        order.status,
        &order.items,
        order.total_amount,
    );
    spawn_email(state, user.email, "Transaction Details", html);
}

fn spawn_email(state: SharedState, to: String, subject: &'static str, html: String) {
    tokio::spawn(async move {
        if let Err(e) = state.dispatcher.send_email(&to, subject, &html).await {
            warn!("Failed to send \"{subject}\" email to {to}: {e}");
        }
    });
}

fn spawn_push(state: SharedState, user: User, order_id: String, status: OrderStatus) {
    let Some(token) = user.token else {
        info!("No push token available for user {}", user.id);
        return;
    };

    tokio::spawn(async move {
        let title = format!("Order {order_id}");
        let body = format!("Your order is now {status}.");

        if let Err(e) = state.dispatcher.send_push(&token, &title, &body).await {
            warn!("Failed to send push notification to user {}: {e}", user.id);
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use super::*;
    use crate::models::CartItem;

    #[test]
    fn test_total_matches_exact_sum() {
        // cart {A: qty 2 @ 50, B: qty 1 @ 100}, declared 200
        let items = [(50.0, 2), (100.0, 1)];
        assert!(total_matches(items, 200.0));
    }

    #[test]
    fn test_total_mismatch_rejected() {
        let items = [(50.0, 2)];
        assert!(!total_matches(items, 50.0));
    }

    #[test]
    fn test_total_tolerates_float_noise() {
        // 0.1 + 0.2 style representation error must not reject the request.
        let items = [(0.1, 1), (0.2, 1)];
        assert!(total_matches(items, 0.30000000000000004));
        assert!(total_matches(items, 0.3));
    }

    #[test]
    fn test_unit_price_rounds_before_multiplying() {
        // 3 x 33.335: per-unit rounding gives 3334 * 3 = 10002 centavos,
        // not round(100.005 * 100) = 10000.
        assert_eq!(items_total_minor_units([(33.335, 3)]), 10002);
        assert!(total_matches([(33.335, 3)], 100.02));
    }

    fn cart_for(user: &str) -> Cart {
        Cart {
            user: user.into(),
            items: vec![CartItem {
                food_id: "f1".into(),
                name: "Popcorn".into(),
                description: "Large".into(),
                images: vec![],
                price: 50.0,
                quantity: 2,
            }],
            total_price: 100.0,
        }
    }

    #[test]
    fn test_order_from_cart_marks_paid_and_processing() {
        let cart = cart_for("u1");
        let order = order_from_cart(&cart);

        assert_eq!(order.customer, "u1");
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.payment_method, "Credit Card");
        assert_eq!(order.total_amount, 100.0);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].price, 50.0);
    }

    #[test]
    fn test_require_id_rejects_missing_and_empty() {
        assert!(require_id(None, "required").is_err());
        assert!(require_id(Some(String::new()), "required").is_err());
        assert_eq!(require_id(Some("u1".into()), "required").unwrap(), "u1");
    }

    fn draft(price: f64) -> OrderDraft {
        OrderDraft {
            id: "ord_1".into(),
            items: vec![OrderSelection {
                food: FoodSnapshot {
                    id: "f1".into(),
                    name: "Popcorn".into(),
                    description: "Large".into(),
                    images: vec![],
                    price,
                },
                quantity: 2,
                price,
            }],
        }
    }

    #[test]
    fn test_checkout_descriptors_require_positive_price() {
        assert!(descriptors_from_draft(&draft(0.0)).is_err());
        assert!(descriptors_from_draft(&draft(-1.0)).is_err());

        let empty = OrderDraft {
            id: "ord_1".into(),
            items: vec![],
        };
        assert!(descriptors_from_draft(&empty).is_err());

        let descriptors = descriptors_from_draft(&draft(50.0)).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].unit_price, 50.0);
        assert_eq!(descriptors[0].quantity, 2);
    }

    /// In-memory stand-in for the Redis side of finalization.
    #[derive(Default)]
    struct MemoryStore {
        claimed: HashSet<String>,
        carts: HashMap<String, Cart>,
        orders: Vec<Order>,
        fail_next_order_write: bool,
    }

    impl FinalizationStore for MemoryStore {
        async fn claim_event(&mut self, event_id: &str) -> Result<bool, AppError> {
            Ok(self.claimed.insert(event_id.to_string()))
        }

        async fn release_event(&mut self, event_id: &str) -> Result<(), AppError> {
            self.claimed.remove(event_id);
            Ok(())
        }

        async fn take_cart(&mut self, user_id: &str) -> Result<Option<Cart>, AppError> {
            Ok(self.carts.remove(user_id))
        }

        async fn restore_cart(&mut self, cart: &Cart) -> Result<(), AppError> {
            self.carts.insert(cart.user.clone(), cart.clone());
            Ok(())
        }

        async fn put_order(&mut self, order: &Order) -> Result<(), AppError> {
            if self.fail_next_order_write {
                self.fail_next_order_write = false;
                return Err(AppError::validation("order store offline"));
            }

            self.orders.push(order.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_replayed_event_creates_exactly_one_order() {
        let mut store = MemoryStore::default();
        store.carts.insert("u1".into(), cart_for("u1"));

        let first = finalize_checkout(&mut store, "evt_1", "u1").await.unwrap();
        assert!(matches!(first, Finalization::Completed(_)));

        let second = finalize_checkout(&mut store, "evt_1", "u1").await.unwrap();
        assert!(matches!(second, Finalization::Duplicate));

        assert_eq!(store.orders.len(), 1);
        assert!(store.carts.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_events_cannot_double_settle_one_cart() {
        let mut store = MemoryStore::default();
        store.carts.insert("u1".into(), cart_for("u1"));

        assert!(matches!(
            finalize_checkout(&mut store, "evt_1", "u1").await.unwrap(),
            Finalization::Completed(_)
        ));

        // A second event for the same user finds no cart and creates nothing.
        let err = finalize_checkout(&mut store, "evt_2", "u1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Cart")));
        assert_eq!(store.orders.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_order_write_restores_cart_and_claim() {
        let mut store = MemoryStore {
            fail_next_order_write: true,
            ..Default::default()
        };
        store.carts.insert("u1".into(), cart_for("u1"));

        let err = finalize_checkout(&mut store, "evt_1", "u1").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Cart and claim are back, so the redelivery can succeed.
        assert!(store.carts.contains_key("u1"));
        assert!(store.claimed.is_empty());
        assert!(store.orders.is_empty());

        let retried = finalize_checkout(&mut store, "evt_1", "u1").await.unwrap();
        assert!(matches!(retried, Finalization::Completed(_)));
        assert_eq!(store.orders.len(), 1);
        assert!(store.carts.is_empty());
    }

    #[tokio::test]
    async fn test_missing_cart_releases_claim() {
        let mut store = MemoryStore::default();

        let err = finalize_checkout(&mut store, "evt_1", "u1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Cart")));
        assert!(store.claimed.is_empty());

        // Not a duplicate on retry: the claim did not stick.
        let err = finalize_checkout(&mut store, "evt_1", "u1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Cart")));
    }

    #[tokio::test]
    async fn test_empty_cart_is_restored_and_rejected() {
        let mut store = MemoryStore::default();
        store.carts.insert(
            "u1".into(),
            Cart {
                user: "u1".into(),
                items: vec![],
                total_price: 0.0,
            },
        );

        let err = finalize_checkout(&mut store, "evt_1", "u1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Cart")));
        assert!(store.carts.contains_key("u1"));
        assert!(store.claimed.is_empty());
        assert!(store.orders.is_empty());
    }
}
