//! Transactional email bodies. Plain HTML strings; transport is the
//! dispatcher's concern.

use crate::models::{LineItem, OrderStatus};

fn currency(amount: f64) -> String {
    format!("PHP {amount:.2}")
}

fn item_rows(items: &[LineItem]) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "<tr><td>{} (x{})</td><td>{}</td></tr>",
                item.name,
                item.quantity,
                currency(item.price * f64::from(item.quantity))
            )
        })
        .collect()
}

/// Order confirmation sent right after an order is persisted.
pub fn order_summary(
    payment_method: &str,
    status: OrderStatus,
    items: &[LineItem],
    total: f64,
) -> String {
    format!(
        "<html lang=\"en\"><body>\
         <h2>Transaction Details</h2>\
         <p>Thank you for your purchase! Below are the details of your transaction:</p>\
         <p><strong>Payment Method:</strong> {payment_method}</p>\
         <p><strong>Order Status:</strong> {status}</p>\
         <table><thead><tr><th>Foods</th><th>Subtotal</th></tr></thead>\
         <tbody>{rows}<tr><td>Grand Total</td><td>{total}</td></tr></tbody></table>\
         <p>If you have any questions about your transaction, contact us at \
         <a href=\"mailto:support@cinemax.example\">support@cinemax.example</a>.</p>\
         </body></html>",
        rows = item_rows(items),
        total = currency(total),
    )
}

/// Sent on every status transition.
pub fn status_update(
    order_id: &str,
    status: OrderStatus,
    items: &[LineItem],
    total: f64,
) -> String {
    format!(
        "<html lang=\"en\"><body>\
         <h2>Order Update</h2>\
         <p>Your order status has been updated. Here are the details:</p>\
         <p><strong>Order ID:</strong> {order_id}</p>\
         <p><strong>Updated Status:</strong> {status}</p>\
         <table><thead><tr><th>Foods</th><th>Subtotal</th></tr></thead>\
         <tbody>{rows}<tr><td>Grand Total</td><td>{total}</td></tr></tbody></table>\
         <p>If you have any questions, contact us at \
         <a href=\"mailto:support@cinemax.example\">support@cinemax.example</a>.</p>\
         </body></html>",
        rows = item_rows(items),
        total = currency(total),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<LineItem> {
        vec![
            LineItem {
                food_id: "f1".into(),
                name: "Popcorn".into(),
                description: "Large tub".into(),
                price: 50.0,
                quantity: 2,
            },
            LineItem {
                food_id: "f2".into(),
                name: "Nachos".into(),
                description: "With cheese".into(),
                price: 100.0,
                quantity: 1,
            },
        ]
    }

    #[test]
    fn test_order_summary_lists_every_line() {
        let html = order_summary("Credit Card", OrderStatus::Processing, &items(), 200.0);

        assert!(html.contains("Popcorn (x2)"));
        assert!(html.contains("PHP 100.00"));
        assert!(html.contains("Nachos (x1)"));
        assert!(html.contains("Credit Card"));
        assert!(html.contains("PHP 200.00"));
    }

    #[test]
    fn test_status_update_names_order_and_status() {
        let html = status_update("ord_9", OrderStatus::ReadyToPickUp, &items(), 200.0);

        assert!(html.contains("ord_9"));
        assert!(html.contains("Ready to Pick up"));
        assert!(html.contains("Grand Total"));
    }
}
