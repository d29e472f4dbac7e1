//! # Notification dispatcher
//!
//! Transactional email and push delivery over the providers' HTTP APIs.
//! Both channels are best-effort from the order workflow's point of view:
//! callers spawn these sends out-of-band and log failures instead of
//! surfacing them, so a provider outage never fails an order transition.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider rejected the notification: {0}")]
    Rejected(String),
}

#[derive(Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct Sender<'a> {
    email: &'a str,
    name: &'static str,
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    from: Sender<'a>,
    to: [Address<'a>; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Serialize)]
struct PushNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    token: &'a str,
    notification: PushNotification<'a>,
}

pub struct Dispatcher {
    client: reqwest::Client,
    mail_url: String,
    mail_token: String,
    mail_sender: String,
    push_url: String,
    push_key: String,
}

impl Dispatcher {
    pub fn new(
        mail_url: String,
        mail_token: String,
        mail_sender: String,
        push_url: String,
        push_key: String,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build notification HTTP client");

        Self {
            client,
            mail_url,
            mail_token,
            mail_sender,
            push_url,
            push_key,
        }
    }

    pub async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<(), NotifyError> {
        let request = EmailRequest {
            from: Sender {
                email: &self.mail_sender,
                name: "CineMax",
            },
            to: [Address { email: to }],
            subject,
            html,
        };

        let response = self
            .client
            .post(&self.mail_url)
            .bearer_auth(&self.mail_token)
            .json(&request)
            .send()
            .await?;

        reject_on_error(response).await
    }

    pub async fn send_push(
        &self,
        token: &str,
        title: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let request = PushRequest {
            token,
            notification: PushNotification { title, body },
        };

        let response = self
            .client
            .post(&self.push_url)
            .bearer_auth(&self.push_key)
            .json(&request)
            .send()
            .await?;

        reject_on_error(response).await
    }
}

async fn reject_on_error(response: reqwest::Response) -> Result<(), NotifyError> {
    if response.status().is_success() {
        return Ok(());
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Rejected(format!("{status}: {body}")))
}
