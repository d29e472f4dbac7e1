//! # CineMax ordering backend
//!
//! REST backend for the cinema food-ordering service: orders, carts and
//! users live as JSON documents in Redis, payment runs through a hosted
//! checkout gateway, and customers hear about lifecycle changes by email
//! and push notification.
//!
//!
//!
//! # Order lifecycle
//!
//! Two paths create an order:
//! - `POST /orders` converts the submitted cart directly (cash / pay at
//!   counter). The declared total must equal the line-item sum in minor
//!   units or the request is rejected before anything is written.
//! - `POST /orders/checkout-session` opens a hosted payment session; when
//!   the gateway later delivers a signed `checkout.session.completed`
//!   webhook, the user's cart is taken atomically and materialized as a
//!   paid order already in `Processing`.
//!
//! Staff then move the order through `Pending` → `Processing` →
//! `Ready to Pick up` → `Completed` via `PUT /orders`, with `Cancelled`
//! reachable from any non-terminal state. Every transition emails the
//! customer and, when a push token is registered, notifies their device.
//! Notification delivery is best-effort: failures are logged and never
//! roll back the transition.
//!
//!
//!
//! # Webhook idempotency
//!
//! Redelivered gateway events must not create duplicate orders. Processed
//! event ids are claimed in Redis with `SET NX` before any state changes,
//! and the cart itself is consumed with `GETDEL`, so even two distinct
//! events settling the same cart cannot both finalize it.
//!
//!
//!
//! # Reviews
//!
//! Customers rate foods they actually ordered. Ratings live in a per-order
//! hash keyed by food id (one rating per order and food, upserts are
//! single-field writes) and each food carries a running count/sum
//! aggregate maintained by delta on every write.
//!
//!
//!
//! # Configuration
//!
//! Environment variables with logged defaults (`RUST_PORT`, `REDIS_URL`,
//! `GATEWAY_URL`, mail/push endpoints) and Docker secrets under
//! `/run/secrets/` for the gateway keys and provider tokens. See
//! [`config::Config`].
use std::time::Duration;

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};

use signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub mod config;
pub mod database;
pub mod emails;
pub mod error;
pub mod models;
pub mod orders;
pub mod reviews;
pub mod routes;
pub mod state;

use state::{SharedState, State};

pub fn app(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route(
            "/orders",
            get(routes::all_orders)
                .post(routes::create_order)
                .put(routes::update_order),
        )
        .route("/orders/user/{user_id}", get(routes::orders_for_user))
        .route("/orders/checkout-session", post(routes::checkout_session))
        .route("/orders/webhook", post(routes::webhook))
        .route("/orders/count", get(routes::order_count))
        .route(
            "/orders/review",
            post(routes::create_review)
                .put(routes::update_review)
                .delete(routes::delete_review),
        )
        .route("/orders/reviews/{food_id}", get(routes::food_reviews))
        .route("/orders/{order_id}", get(routes::single_order))
        .route("/carts", post(routes::upsert_cart))
        .route(
            "/carts/{user_id}",
            get(routes::get_cart).delete(routes::delete_cart),
        )
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await;

    info!("Starting server...");
    let router = app(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
