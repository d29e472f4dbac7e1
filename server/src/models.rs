//! Domain documents and enumerations.
//!
//! Everything here serializes to the JSON documents held in Redis and to the
//! wire. Line items snapshot the food's name, description and price at order
//! time, so catalog edits never rewrite history.

use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Workflow state of an order. Intended progression is Pending → Processing
/// → Ready to Pick up → Completed; Cancelled is reachable from any
/// non-terminal state. Completed and Cancelled are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum OrderStatus {
    Pending,
    Processing,
    #[serde(rename = "Ready to Pick up")]
    ReadyToPickUp,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether the stored status may be replaced by `target`. Staff may move
    /// an order between any non-terminal states in either direction, and
    /// re-setting the current status is an accepted no-op, but a terminal
    /// order stays where it is.
    pub fn can_transition_to(self, target: Self) -> bool {
        !self.is_terminal() || target == self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::ReadyToPickUp => "Ready to Pick up",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Processing" => Ok(Self::Processing),
            "Ready to Pick up" => Ok(Self::ReadyToPickUp),
            "Completed" => Ok(Self::Completed),
            "Cancelled" => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Crew,
    Admin,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ImageRef {
    pub url: String,
}

/// One food entry inside a cart, with the price captured at add time.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub food_id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    pub price: f64,
    pub quantity: u32,
}

/// Per-user cart. At most one exists per user; the document key enforces it.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub user: String,
    pub items: Vec<CartItem>,
    pub total_price: f64,
}

/// One food entry inside an order. Price and naming are copied from the
/// catalog at order time, never re-derived.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub food_id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub quantity: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub customer: String,
    pub items: Vec<LineItem>,
    pub total_amount: f64,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn contains_food(&self, food_id: &str) -> bool {
        self.items.iter().any(|item| item.food_id == food_id)
    }
}

/// A customer's score and comment for one food item of one order. Stored in
/// a per-order hash keyed by food id, so at most one exists per
/// (order, food) pair and upserts are single-field writes.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub food_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub fname: String,
    pub lname: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.fname, self.lname)
    }
}

/// An order joined with its customer document for the admin listing.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrderWithCustomer {
    #[serde(flatten)]
    pub order: Order,
    pub customer_detail: Option<User>,
}

/// One review row of the food-page fan-out read: the rating joined with the
/// reviewer's display data.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub rating: u8,
    pub comment: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_pic_url: Option<String>,
    pub customer_id: String,
    pub order_id: String,
    pub food_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(OrderStatus::ReadyToPickUp).unwrap(),
            "Ready to Pick up"
        );
        assert_eq!(serde_json::to_value(OrderStatus::Pending).unwrap(), "Pending");

        let parsed: OrderStatus = serde_json::from_value("Cancelled".into()).unwrap();
        assert_eq!(parsed, OrderStatus::Cancelled);
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::ReadyToPickUp,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }

        assert!("InvalidState".parse::<OrderStatus>().is_err());
        assert!("pending".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_terminal_states_stay_put() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::ReadyToPickUp.can_transition_to(OrderStatus::Processing));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Completed.can_transition_to(OrderStatus::Completed));
    }

    #[test]
    fn test_payment_status_wire_names() {
        assert_eq!(serde_json::to_value(PaymentStatus::Paid).unwrap(), "paid");
        assert_eq!(serde_json::to_value(PaymentStatus::Unpaid).unwrap(), "unpaid");
    }

    #[test]
    fn test_contains_food() {
        let order = Order {
            id: "o1".into(),
            customer: "u1".into(),
            items: vec![LineItem {
                food_id: "f1".into(),
                name: "Popcorn".into(),
                description: "Large".into(),
                price: 50.0,
                quantity: 2,
            }],
            total_amount: 100.0,
            payment_method: "Cash".into(),
            payment_status: PaymentStatus::Unpaid,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };

        assert!(order.contains_food("f1"));
        assert!(!order.contains_food("f2"));
    }
}
