//! # Payment gateway adapter
//!
//! Thin client for the hosted checkout provider. The server hands us
//! gateway-agnostic product descriptors and gets back an opaque session
//! handle to redirect the client to; payment outcome arrives later through
//! the signed webhook handled by [`webhook`].
//!
//! All amounts cross this boundary in **minor units** (centavos). The unit
//! price is rounded to the nearest minor unit before any multiplication by
//! quantity, so per-line totals cannot drift from the displayed price.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod webhook;

pub const CURRENCY: &str = "php";

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("gateway rejected the session: {0}")]
    Rejected(String),
}

/// Convert a decimal currency amount to the gateway's minor-unit integer
/// representation, rounding to the nearest unit.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// One line of an order, described in gateway-neutral terms.
pub struct ProductDescriptor {
    pub name: String,
    pub description: String,
    pub image_urls: Vec<String>,
    pub unit_price: f64,
    pub quantity: u32,
}

#[derive(Serialize)]
struct ProductData<'a> {
    name: &'a str,
    description: &'a str,
    images: &'a [String],
}

#[derive(Serialize)]
struct PriceData<'a> {
    currency: &'static str,
    product_data: ProductData<'a>,
    unit_amount: i64,
}

#[derive(Serialize)]
struct SessionLineItem<'a> {
    price_data: PriceData<'a>,
    quantity: u32,
}

#[derive(Serialize)]
struct SessionMetadata<'a> {
    order_id: &'a str,
    user_id: &'a str,
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    payment_method_types: &'static [&'static str],
    line_items: Vec<SessionLineItem<'a>>,
    mode: &'static str,
    success_url: &'a str,
    cancel_url: &'a str,
    metadata: SessionMetadata<'a>,
}

/// Hosted checkout session as returned by the gateway. The `id` is the only
/// field callers may rely on; everything else is provider detail.
#[derive(Deserialize)]
pub struct CheckoutSession {
    pub id: String,
}

pub struct Gateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    success_url: String,
    cancel_url: String,
}

impl Gateway {
    pub fn new(
        base_url: String,
        secret_key: String,
        success_url: String,
        cancel_url: String,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build gateway HTTP client");

        Self {
            client,
            base_url,
            secret_key,
            success_url,
            cancel_url,
        }
    }

    /// Request a hosted checkout session for the given order lines. The
    /// order and user ids travel as session metadata so the webhook can
    /// correlate the completed payment back to them.
    pub async fn create_checkout_session(
        &self,
        items: &[ProductDescriptor],
        order_id: &str,
        user_id: &str,
    ) -> Result<CheckoutSession, GatewayError> {
        let line_items = items
            .iter()
            .map(|item| SessionLineItem {
                price_data: PriceData {
                    currency: CURRENCY,
                    product_data: ProductData {
                        name: &item.name,
                        description: &item.description,
                        images: &item.image_urls,
                    },
                    unit_amount: to_minor_units(item.unit_price),
                },
                quantity: item.quantity,
            })
            .collect();

        let request = SessionRequest {
            payment_method_types: &["card"],
            line_items,
            mode: "payment",
            success_url: &self.success_url,
            cancel_url: &self.cancel_url,
            metadata: SessionMetadata { order_id, user_id },
        };

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{status}: {body}")));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::to_minor_units;

    #[test]
    fn test_whole_amounts() {
        assert_eq!(to_minor_units(50.0), 5000);
        assert_eq!(to_minor_units(0.0), 0);
    }

    #[test]
    fn test_rounds_to_nearest() {
        assert_eq!(to_minor_units(19.995), 2000);
        assert_eq!(to_minor_units(19.994), 1999);
        assert_eq!(to_minor_units(0.005), 1);
    }

    #[test]
    fn test_round_before_multiply() {
        // 3 items at 33.335 each: rounding the unit price first gives
        // 3334 * 3, not round(100.005 * 100).
        let unit = to_minor_units(33.335);
        assert_eq!(unit * 3, 10002);
    }
}
