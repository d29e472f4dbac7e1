use std::{sync::Arc, time::Duration};

use notify::Dispatcher;
use payments::Gateway;
use redis::aio::ConnectionManager;

use super::{config::Config, database::init_redis};

/// Outbound HTTP calls (gateway, email, push) all carry this timeout so a
/// slow provider cannot hold a request open indefinitely.
const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);

pub struct State {
    pub config: Config,
    pub redis_connection: ConnectionManager,
    pub gateway: Gateway,
    pub dispatcher: Dispatcher,
}

pub type SharedState = Arc<State>;

impl State {
    pub async fn new() -> SharedState {
        let config = Config::load();

        let redis_connection = init_redis(&config.redis_url).await;

        let gateway = Gateway::new(
            config.gateway_url.clone(),
            config.gateway_key.clone(),
            config.checkout_success_url.clone(),
            config.checkout_cancel_url.clone(),
            OUTBOUND_TIMEOUT,
        );

        let dispatcher = Dispatcher::new(
            config.mail_url.clone(),
            config.mail_token.clone(),
            config.mail_sender.clone(),
            config.push_url.clone(),
            config.push_key.clone(),
            OUTBOUND_TIMEOUT,
        );

        Arc::new(Self {
            config,
            redis_connection,
            gateway,
            dispatcher,
        })
    }
}
