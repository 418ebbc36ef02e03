use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::Sha512;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{AppResult, PaymentError};
use crate::providers::traits::{
    AccountValidation, Bank, PaymentProvider, TransferRequest, TransferResponse, TransferStatus,
    TransferVerification,
};

type HmacSha512 = Hmac<Sha512>;

pub struct PaystackProvider {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl PaystackProvider {
    pub fn new(base_url: String, secret_key: String, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            secret_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(&self, path: &str) -> AppResult<Value> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        let body: Value = response.json().await?;
        Ok(body)
    }

    async fn post_json(&self, path: &str, payload: &Value) -> AppResult<Value> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.secret_key)
            .json(payload)
            .send()
            .await?;
        let body: Value = response.json().await?;
        Ok(body)
    }

    fn body_status(body: &Value) -> bool {
        body.get("status").and_then(Value::as_bool).unwrap_or(false)
    }

    fn body_message(body: &Value) -> Option<String> {
        body.get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Paystack expresses amounts in kobo (minor units)
    fn to_minor_units(amount: Decimal) -> i64 {
        use rust_decimal::prelude::ToPrimitive;
        (amount * Decimal::ONE_HUNDRED).round().to_i64().unwrap_or(0)
    }

    fn amount_from_minor_units(value: &Value) -> Option<Decimal> {
        value
            .as_i64()
            .map(Decimal::from)
            .or_else(|| value.as_str().and_then(|s| Decimal::from_str(s).ok()))
            .map(|d| d / Decimal::ONE_HUNDRED)
    }
}

#[async_trait]
impl PaymentProvider for PaystackProvider {
    fn name(&self) -> &'static str {
        "paystack"
    }

    async fn initiate_transfer(&self, request: TransferRequest) -> AppResult<TransferResponse> {
        info!(
            "initiating paystack transfer {} to {} ({})",
            request.reference, request.recipient_account, request.recipient_bank
        );

        let payload = json!({
            "source": "balance",
            "amount": Self::to_minor_units(request.amount),
            "reference": request.reference,
            "reason": request.narration.clone().unwrap_or_else(|| "Scheduled payment".to_string()),
            "recipient": {
                "type": "nuban",
                "name": request.recipient_name,
                "account_number": request.recipient_account,
                "bank_code": request.recipient_bank,
            },
        });

        let body = self.post_json("/transfer", &payload).await?;
        let data = body.get("data").cloned().unwrap_or(Value::Null);

        let status = data
            .get("status")
            .and_then(Value::as_str)
            .map(TransferStatus::from_provider_str)
            .unwrap_or(TransferStatus::Pending);
        let provider_reference = data
            .get("transfer_code")
            .or_else(|| data.get("reference"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let success = Self::body_status(&body) && status != TransferStatus::Failed;
        if !success {
            warn!(
                "paystack transfer {} rejected: {:?}",
                request.reference,
                Self::body_message(&body)
            );
        }

        Ok(TransferResponse {
            success,
            provider_reference,
            status: if success { status } else { TransferStatus::Failed },
            message: Self::body_message(&body),
            raw: Some(body),
        })
    }

    async fn verify_transfer(&self, reference: &str) -> AppResult<TransferVerification> {
        let body = self
            .get_json(&format!("/transfer/verify/{}", reference))
            .await?;
        let data = body.get("data").cloned().unwrap_or(Value::Null);

        let status = data
            .get("status")
            .and_then(Value::as_str)
            .map(TransferStatus::from_provider_str)
            .unwrap_or(TransferStatus::Pending);
        let amount = data
            .get("amount")
            .and_then(Self::amount_from_minor_units);

        Ok(TransferVerification {
            success: Self::body_status(&body),
            status,
            amount,
            message: Self::body_message(&body),
        })
    }

    async fn validate_bank_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> AppResult<AccountValidation> {
        let body = self
            .get_json(&format!(
                "/bank/resolve?account_number={}&bank_code={}",
                account_number, bank_code
            ))
            .await?;

        let account_name = body
            .get("data")
            .and_then(|d| d.get("account_name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(AccountValidation {
            valid: Self::body_status(&body) && account_name.is_some(),
            account_name,
        })
    }

    async fn get_banks(&self) -> AppResult<Vec<Bank>> {
        let body = self.get_json("/bank?country=nigeria").await?;
        if !Self::body_status(&body) {
            return Err(PaymentError::ProviderError {
                provider: self.name().to_string(),
                message: Self::body_message(&body).unwrap_or_else(|| "bank list failed".to_string()),
            }
            .into());
        }

        let banks = body
            .get("data")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|b| {
                        Some(Bank {
                            name: b.get("name")?.as_str()?.to_string(),
                            code: b.get("code")?.as_str()?.to_string(),
                            active: b.get("active").and_then(Value::as_bool).unwrap_or(true),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(banks)
    }

    /// Paystack signs webhooks with HMAC-SHA512 of the raw body, hex-encoded
    /// in the `x-paystack-signature` header. `verify_slice` compares in
    /// constant time.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha512::new_from_slice(self.secret_key.as_bytes()) else {
            return false;
        };
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }

    async fn health_check(&self) -> AppResult<bool> {
        // Bank list is the cheapest authenticated read Paystack offers
        let body = self.get_json("/bank?country=nigeria&perPage=1").await?;
        Ok(Self::body_status(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn provider(secret: &str) -> PaystackProvider {
        PaystackProvider::new(
            "https://api.paystack.co".to_string(),
            secret.to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn webhook_signature_roundtrip() {
        let provider = provider("sk_test_secret");
        let payload = br#"{"event":"transfer.success","data":{"reference":"ref-1"}}"#;

        let signature = sign("sk_test_secret", payload);
        assert!(provider.verify_webhook_signature(payload, &signature));
    }

    #[test]
    fn webhook_signature_rejects_tampered_payload() {
        let provider = provider("sk_test_secret");
        let signature = sign("sk_test_secret", b"original");
        assert!(!provider.verify_webhook_signature(b"tampered", &signature));
    }

    #[test]
    fn webhook_signature_rejects_wrong_secret_and_garbage() {
        let provider = provider("sk_test_secret");
        let signature = sign("sk_other_secret", b"payload");
        assert!(!provider.verify_webhook_signature(b"payload", &signature));
        assert!(!provider.verify_webhook_signature(b"payload", "not-hex!"));
    }

    #[test]
    fn minor_unit_conversion() {
        assert_eq!(PaystackProvider::to_minor_units(dec!(150.25)), 15025);
        assert_eq!(
            PaystackProvider::amount_from_minor_units(&serde_json::json!(15025)),
            Some(dec!(150.25))
        );
    }

    #[test]
    fn provider_status_strings_map_to_transfer_status() {
        assert_eq!(
            TransferStatus::from_provider_str("success"),
            TransferStatus::Success
        );
        assert_eq!(
            TransferStatus::from_provider_str("otp"),
            TransferStatus::Processing
        );
        assert_eq!(
            TransferStatus::from_provider_str("abandoned"),
            TransferStatus::Failed
        );
        assert_eq!(
            TransferStatus::from_provider_str("queued"),
            TransferStatus::Pending
        );
    }
}
