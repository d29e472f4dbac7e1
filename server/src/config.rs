use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub gateway_url: String,
    pub gateway_key: String,
    pub webhook_secret: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub mail_url: String,
    pub mail_token: String,
    pub mail_sender: String,
    pub push_url: String,
    pub push_key: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "1111"),
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379"),
            gateway_url: try_load("GATEWAY_URL", "https://api.gateway.test"),
            gateway_key: read_secret("GATEWAY_SECRET_KEY"),
            webhook_secret: read_secret("GATEWAY_WEBHOOK_SECRET"),
            checkout_success_url: try_load(
                "CHECKOUT_SUCCESS_URL",
                "http://localhost:3000/my-orders",
            ),
            checkout_cancel_url: try_load(
                "CHECKOUT_CANCEL_URL",
                "http://localhost:3000/cancel-payment",
            ),
            mail_url: try_load("MAIL_URL", "https://send.api.mailtrap.io/api/send"),
            mail_token: read_secret("MAIL_TOKEN"),
            mail_sender: try_load("MAIL_SENDER", "orders@cinemax.example"),
            push_url: try_load("PUSH_URL", "https://fcm.googleapis.com/v1/messages:send"),
            push_key: read_secret("PUSH_KEY"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

// Docker secrets first, plain environment variable as the local-dev fallback.
fn read_secret(secret_name: &str) -> String {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .or_else(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
            env::var(secret_name)
        })
        .expect("Secrets misconfigured!")
}
