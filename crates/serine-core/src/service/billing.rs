//! Lemon Squeezy subscription webhooks: signature check and plan sync.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::config::BillingConfig;
use crate::error::BillingError;
use crate::service::accounts::{AccountStore, BillingPeriod, Plan};

type HmacSha256 = Hmac<Sha256>;

/// Webhook event types we act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventType {
    SubscriptionCreated,
    SubscriptionPaymentSuccess,
    Unknown(String),
}

impl From<&str> for WebhookEventType {
    fn from(s: &str) -> Self {
        match s {
            "subscription_created" => Self::SubscriptionCreated,
            "subscription_payment_success" => Self::SubscriptionPaymentSuccess,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// What a webhook delivery did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WebhookOutcome {
    Applied {
        #[serde(rename = "userId")]
        tenant_id: String,
        plan: Plan,
        billing: BillingPeriod,
    },
    Ignored { ignored: bool },
}

/// Check a hex HMAC-SHA256 of the raw body in constant time.
pub fn verify_webhook_signature(payload: &[u8], signature: &str, secret: &str) -> Result<(), BillingError> {
    if secret.is_empty() {
        warn!("Webhook secret not configured, rejecting delivery");
        return Err(BillingError::SignatureMismatch);
    }
    let signature = signature.trim();
    if signature.is_empty() {
        return Err(BillingError::MissingSignature);
    }
    let expected = hex::decode(signature).map_err(|_| BillingError::SignatureMismatch)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| BillingError::SignatureMismatch)?;
    mac.update(payload);
    mac.verify_slice(&expected).map_err(|_| BillingError::SignatureMismatch)
}

/// Hex HMAC-SHA256 of `payload`, the form the processor sends.
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

fn variant_id(event: &serde_json::Value) -> Option<String> {
    match event.pointer("/data/attributes/variant_id")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Verify, parse, and apply one webhook delivery.
pub async fn process_webhook(
    config: &BillingConfig,
    accounts: &dyn AccountStore,
    signature: Option<&str>,
    body: &[u8],
) -> Result<WebhookOutcome, BillingError> {
    verify_webhook_signature(body, signature.unwrap_or(""), &config.webhook_secret)?;

    let event: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| BillingError::MalformedPayload(e.to_string()))?;
    let event_name = event
        .pointer("/meta/event_name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");

    match WebhookEventType::from(event_name) {
        WebhookEventType::SubscriptionCreated | WebhookEventType::SubscriptionPaymentSuccess => {}
        WebhookEventType::Unknown(name) => {
            info!("Ignoring webhook event {}", name);
            return Ok(WebhookOutcome::Ignored { ignored: true });
        }
    }

    let tenant_id = event
        .pointer("/meta/custom_data/user_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BillingError::MalformedPayload("missing meta.custom_data.user_id".to_string()))?;
    let variant = variant_id(&event)
        .ok_or_else(|| BillingError::MalformedPayload("missing data.attributes.variant_id".to_string()))?;
    let mapped = config
        .variants
        .get(&variant)
        .ok_or_else(|| BillingError::UnknownVariant(variant.clone()))?;

    accounts.set_plan(tenant_id, mapped.plan, mapped.billing).await?;
    let agent = accounts.ensure_default_agent(tenant_id).await?;
    info!(
        "Plan for {} set to {} ({}), agent {}",
        tenant_id,
        mapped.plan,
        mapped.billing.as_str(),
        agent.id
    );

    Ok(WebhookOutcome::Applied {
        tenant_id: tenant_id.to_string(),
        plan: mapped.plan,
        billing: mapped.billing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VariantPlan;
    use crate::service::accounts::InMemoryAccountStore;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn billing_config() -> BillingConfig {
        let mut config = BillingConfig {
            webhook_secret: SECRET.to_string(),
            ..Default::default()
        };
        config.variants.insert(
            "111".to_string(),
            VariantPlan {
                plan: Plan::Professional,
                billing: BillingPeriod::Yearly,
            },
        );
        config
    }

    fn event(name: &str, variant: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "meta": { "event_name": name, "custom_data": { "user_id": "t1" } },
            "data": { "attributes": { "variant_id": variant } }
        }))
        .unwrap()
    }

    #[test]
    fn test_signature_roundtrip() {
        let body = b"{\"a\":1}";
        let sig = sign_payload(body, SECRET);
        assert!(verify_webhook_signature(body, &sig, SECRET).is_ok());
        assert!(matches!(
            verify_webhook_signature(b"{\"a\":2}", &sig, SECRET),
            Err(BillingError::SignatureMismatch)
        ));
        assert!(matches!(
            verify_webhook_signature(body, "", SECRET),
            Err(BillingError::MissingSignature)
        ));
        assert!(matches!(
            verify_webhook_signature(body, "not-hex", SECRET),
            Err(BillingError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_unconfigured_secret_rejects_even_unsigned_delivery() {
        let body = b"{}";
        assert!(matches!(
            verify_webhook_signature(body, "", ""),
            Err(BillingError::SignatureMismatch)
        ));
        let sig = sign_payload(body, "");
        assert!(matches!(
            verify_webhook_signature(body, &sig, ""),
            Err(BillingError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn test_subscription_created_sets_plan_and_default_agent() {
        let accounts = InMemoryAccountStore::new();
        let body = event("subscription_created", json!(111));
        let sig = sign_payload(&body, SECRET);

        let outcome = process_webhook(&billing_config(), &accounts, Some(&sig), &body).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Applied {
                tenant_id: "t1".into(),
                plan: Plan::Professional,
                billing: BillingPeriod::Yearly
            }
        );
        assert_eq!(accounts.get("t1").await.unwrap().unwrap().plan, Plan::Professional);
        assert_eq!(accounts.list_agents("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_other_events_are_ignored() {
        let accounts = InMemoryAccountStore::new();
        let body = event("order_refunded", json!("111"));
        let sig = sign_payload(&body, SECRET);

        let outcome = process_webhook(&billing_config(), &accounts, Some(&sig), &body).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored { ignored: true });
        assert!(accounts.get("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_variant() {
        let accounts = InMemoryAccountStore::new();
        let body = event("subscription_payment_success", json!("999"));
        let sig = sign_payload(&body, SECRET);

        let err = process_webhook(&billing_config(), &accounts, Some(&sig), &body).await.unwrap_err();
        assert!(matches!(err, BillingError::UnknownVariant(ref v) if v == "999"));
    }
}
