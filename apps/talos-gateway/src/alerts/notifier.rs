//! Notifier dispatch: severity-routed delivery of alert events to the
//! configured notifiers, with exponential-backoff retry per notifier.

use async_trait::async_trait;
use std::time::Duration;
use talos_infra_pubsub::AlertEvent;
use talos_shared_config::notifier_config::{NotifierMode, NotifierSpec, RetryPolicy};
use talos_shared_config::NotifierConfig;
use tracing::{info, warn};

#[async_trait]
trait Notifier: Send + Sync {
    async fn send(&self, event: &AlertEvent) -> Result<(), String>;
}

struct WebhookNotifier {
    url: String,
    http: reqwest::Client,
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, event: &AlertEvent) -> Result<(), String> {
        let body = serde_json::json!({
            "device_id": event.device_id,
            "alert_code": event.alert_code,
            "severity": event.severity,
            "notification_type": format!("{:?}", event.notification_type),
            "message": event.message,
            "value": event.value,
        });
        self.http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// No SMS/email gateway is part of this gateway's dependency stack;
/// delivery is simulated via structured logging until one is wired in.
struct SimulatedNotifier {
    channel: &'static str,
    target: String,
}

#[async_trait]
impl Notifier for SimulatedNotifier {
    async fn send(&self, event: &AlertEvent) -> Result<(), String> {
        info!(channel = self.channel, target = %self.target, alert_code = %event.alert_code, "simulated notification");
        Ok(())
    }
}

struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, event: &AlertEvent) -> Result<(), String> {
        info!(
            device_id = %event.device_id,
            alert_code = %event.alert_code,
            severity = ?event.severity,
            message = %event.message,
            value = event.value,
            "alert notification"
        );
        Ok(())
    }
}

fn build_notifier(spec: &NotifierSpec, http: reqwest::Client) -> Box<dyn Notifier> {
    match spec {
        NotifierSpec::Webhook { url } => Box::new(WebhookNotifier { url: url.clone(), http }),
        NotifierSpec::Sms { to } => Box::new(SimulatedNotifier { channel: "sms", target: to.clone() }),
        NotifierSpec::Email { to } => Box::new(SimulatedNotifier { channel: "email", target: to.clone() }),
        NotifierSpec::Log => Box::new(LogNotifier),
    }
}

pub struct NotifierRouter {
    config: NotifierConfig,
    http: reqwest::Client,
}

impl NotifierRouter {
    pub fn new(config: NotifierConfig) -> Self {
        Self { config, http: reqwest::Client::new() }
    }

    pub async fn dispatch(&self, event: &AlertEvent) {
        let Some(rule) = self.config.routing_for(event.severity) else {
            warn!(severity = ?event.severity, "no routing rule for severity; alert undelivered");
            return;
        };

        let mut successes = 0u32;
        match rule.mode {
            NotifierMode::Broadcast => {
                let sends = rule.notifiers.iter().map(|name| self.send_with_retry(name, event));
                successes = futures_util::future::join_all(sends).await.into_iter().filter(|ok| *ok).count() as u32;
            }
            NotifierMode::Fallback => {
                for name in &rule.notifiers {
                    if self.send_with_retry(name, event).await {
                        successes += 1;
                        if successes >= rule.min_success {
                            break;
                        }
                    }
                }
            }
            NotifierMode::Single => {
                if let Some(name) = rule.notifiers.first() {
                    if self.send_with_retry(name, event).await {
                        successes += 1;
                    }
                }
            }
        }

        if successes < rule.min_success {
            warn!(
                alert_code = %event.alert_code,
                successes,
                required = rule.min_success,
                "notifier routing did not reach min_success"
            );
        }
    }

    async fn send_with_retry(&self, notifier_name: &str, event: &AlertEvent) -> bool {
        let Some(spec) = self.config.notifiers.get(notifier_name) else {
            warn!(notifier_name, "routing rule references unknown notifier");
            return false;
        };
        let notifier = build_notifier(spec, self.http.clone());
        let retry: &RetryPolicy = &self.config.retry;

        for attempt in 0..retry.max_attempts.max(1) {
            match notifier.send(event).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(notifier_name, attempt, error = %e, "notifier send failed");
                    if attempt + 1 < retry.max_attempts {
                        let backoff = retry.base_sec * retry.multiplier.powi(attempt as i32);
                        tokio::time::sleep(Duration::from_secs_f64(backoff.max(0.0))).await;
                    }
                }
            }
        }
        false
    }
}
