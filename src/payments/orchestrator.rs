use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AppResult, PaymentError};
use crate::payments::models::{HealthStatus, ProviderHealth};
use crate::providers::registry::ProviderRegistry;
use crate::providers::traits::{PaymentProvider, TransferRequest, TransferResponse, TransferStatus};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Rolling sample window for the exponentially-weighted failure rate
    pub failure_rate_window: u32,
    /// At or above this rate the provider is taken out of rotation
    pub down_threshold: f64,
    pub degraded_threshold: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            failure_rate_window: 100,
            down_threshold: 0.2,
            degraded_threshold: 0.1,
        }
    }
}

/// Outcome of a routed initiation: which provider handled it and what it said
#[derive(Debug, Clone)]
pub struct InitiationResult {
    pub provider: String,
    pub response: TransferResponse,
}

/// Routes transfers to a healthy provider and tracks per-provider failure
/// rates. The health map is process-local and eventually consistent across
/// workers; it is an optimization, not a correctness mechanism, and resets
/// to all-healthy on restart.
pub struct PaymentOrchestrator {
    registry: Arc<ProviderRegistry>,
    health: RwLock<HashMap<String, ProviderHealth>>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, config: OrchestratorConfig) -> Self {
        let health = registry
            .names()
            .into_iter()
            .map(|name| (name, ProviderHealth::healthy()))
            .collect();
        Self {
            registry,
            health: RwLock::new(health),
            config,
        }
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn PaymentProvider>> {
        self.registry.get(name)
    }

    pub fn provider_health(&self, name: &str) -> Option<ProviderHealth> {
        self.health.read().get(name).cloned()
    }

    pub fn all_provider_health(&self) -> Vec<(String, ProviderHealth)> {
        let mut entries: Vec<(String, ProviderHealth)> = self
            .health
            .read()
            .iter()
            .map(|(name, health)| (name.clone(), health.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Pick a provider: the preferred one if eligible, otherwise the
    /// lowest-failure-rate provider that is not down and not excluded.
    pub fn select_provider(
        &self,
        preferred: Option<&str>,
        exclude: Option<&str>,
    ) -> Option<Arc<dyn PaymentProvider>> {
        let health = self.health.read();
        let status_of = |name: &str| {
            health
                .get(name)
                .map(|h| (h.status, h.failure_rate))
                .unwrap_or((HealthStatus::Healthy, 0.0))
        };

        if let Some(name) = preferred {
            if exclude != Some(name) && status_of(name).0 != HealthStatus::Down {
                if let Some(provider) = self.registry.get(name) {
                    return Some(provider);
                }
            }
        }

        self.registry
            .all()
            .into_iter()
            .filter(|p| exclude != Some(p.name()))
            .filter(|p| status_of(p.name()).0 != HealthStatus::Down)
            .min_by(|a, b| {
                status_of(a.name())
                    .1
                    .partial_cmp(&status_of(b.name()).1)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Fold one call result into the provider's rolling failure rate and
    /// reclassify it.
    pub fn record_provider_result(&self, name: &str, success: bool) {
        let mut health = self.health.write();
        let entry = health
            .entry(name.to_string())
            .or_insert_with(ProviderHealth::healthy);

        let window = self.config.failure_rate_window as f64;
        let sample = if success { 0.0 } else { 1.0 };
        entry.failure_rate = (entry.failure_rate * (window - 1.0) + sample) / window;
        entry.last_checked = Utc::now();

        let previous = entry.status;
        entry.status = if previous == HealthStatus::Down {
            // A down provider only recovers through a successful health
            // probe, not by its rate decaying back under the thresholds
            HealthStatus::Down
        } else if entry.failure_rate >= self.config.down_threshold {
            HealthStatus::Down
        } else if entry.failure_rate >= self.config.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        if entry.status != previous {
            warn!(
                "provider {} health changed {} -> {} (failure rate {:.3})",
                name, previous, entry.status, entry.failure_rate
            );
        }
    }

    /// Probe each provider's cheap read endpoint. A successful probe is the
    /// only path that brings a down provider back into rotation.
    pub async fn perform_health_check(&self) {
        for provider in self.registry.all() {
            let name = provider.name();
            let alive = matches!(provider.health_check().await, Ok(true));

            let mut health = self.health.write();
            let entry = health
                .entry(name.to_string())
                .or_insert_with(ProviderHealth::healthy);
            entry.last_checked = Utc::now();

            if alive && entry.status == HealthStatus::Down {
                info!("provider {} passed health check, restoring to healthy", name);
                entry.status = HealthStatus::Healthy;
                entry.failure_rate = 0.0;
            } else if !alive {
                warn!("provider {} failed health check", name);
            }
        }
    }

    /// Route a transfer: try the selected provider, and on an error or an
    /// unsuccessful result make exactly one fallback attempt with a
    /// different eligible provider. A failed fallback result is returned as
    /// a structured failure; an error from the fallback call propagates.
    pub async fn initiate_payment(
        &self,
        request: TransferRequest,
        preferred: Option<&str>,
    ) -> AppResult<InitiationResult> {
        let first = self
            .select_provider(preferred, None)
            .ok_or(PaymentError::ProviderUnavailable)?;
        let first_name = first.name().to_string();

        let failed_response = match first.initiate_transfer(request.clone()).await {
            Ok(response) if response.success => {
                self.record_provider_result(&first_name, true);
                return Ok(InitiationResult {
                    provider: first_name,
                    response,
                });
            }
            Ok(response) => {
                warn!(
                    "provider {} declined transfer {}: {:?}",
                    first_name, request.reference, response.message
                );
                self.record_provider_result(&first_name, false);
                response
            }
            Err(e) => {
                warn!(
                    "provider {} errored on transfer {}: {}",
                    first_name, request.reference, e
                );
                self.record_provider_result(&first_name, false);
                TransferResponse {
                    success: false,
                    provider_reference: None,
                    status: TransferStatus::Failed,
                    message: Some(e.to_string()),
                    raw: None,
                }
            }
        };

        let Some(fallback) = self.select_provider(None, Some(&first_name)) else {
            // No second provider to try: surface the first attempt's
            // failure as a structured result
            return Ok(InitiationResult {
                provider: first_name,
                response: failed_response,
            });
        };

        let fallback_name = fallback.name().to_string();
        info!(
            "falling back from {} to {} for transfer {}",
            first_name, fallback_name, request.reference
        );

        let response = fallback.initiate_transfer(request).await?;
        self.record_provider_result(&fallback_name, response.success);
        Ok(InitiationResult {
            provider: fallback_name,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::traits::{AccountValidation, Bank, TransferVerification};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeProvider {
        name: &'static str,
        fail_transfers: AtomicBool,
        probe_ok: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                fail_transfers: AtomicBool::new(false),
                probe_ok: AtomicBool::new(true),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PaymentProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn initiate_transfer(&self, request: TransferRequest) -> AppResult<TransferResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_transfers.load(Ordering::SeqCst) {
                Ok(TransferResponse {
                    success: false,
                    provider_reference: None,
                    status: TransferStatus::Failed,
                    message: Some("simulated decline".to_string()),
                    raw: None,
                })
            } else {
                Ok(TransferResponse {
                    success: true,
                    provider_reference: Some(format!("{}-{}", self.name, request.reference)),
                    status: TransferStatus::Success,
                    message: None,
                    raw: None,
                })
            }
        }

        async fn verify_transfer(&self, _reference: &str) -> AppResult<TransferVerification> {
            Ok(TransferVerification {
                success: true,
                status: TransferStatus::Success,
                amount: None,
                message: None,
            })
        }

        async fn validate_bank_account(
            &self,
            _account_number: &str,
            _bank_code: &str,
        ) -> AppResult<AccountValidation> {
            Ok(AccountValidation {
                valid: true,
                account_name: Some("Test Account".to_string()),
            })
        }

        async fn get_banks(&self) -> AppResult<Vec<Bank>> {
            Ok(vec![])
        }

        fn verify_webhook_signature(&self, _payload: &[u8], _signature: &str) -> bool {
            true
        }

        async fn health_check(&self) -> AppResult<bool> {
            Ok(self.probe_ok.load(Ordering::SeqCst))
        }
    }

    fn orchestrator_with(
        providers: Vec<Arc<FakeProvider>>,
    ) -> (PaymentOrchestrator, Vec<Arc<FakeProvider>>) {
        let mut registry = ProviderRegistry::new();
        for p in &providers {
            registry.register(p.clone());
        }
        (
            PaymentOrchestrator::new(Arc::new(registry), OrchestratorConfig::default()),
            providers,
        )
    }

    fn request() -> TransferRequest {
        TransferRequest {
            amount: dec!(100),
            recipient_account: "0123456789".to_string(),
            recipient_bank: "058".to_string(),
            recipient_name: "Test".to_string(),
            reference: "ref-1".to_string(),
            narration: None,
        }
    }

    fn drive_down(orchestrator: &PaymentOrchestrator, name: &str) {
        // rate_n = 1 - 0.99^n crosses 0.2 within 23 failures at W=100
        while orchestrator.provider_health(name).unwrap().status != HealthStatus::Down {
            orchestrator.record_provider_result(name, false);
        }
    }

    #[test]
    fn failure_streak_degrades_then_downs_provider() {
        let (orchestrator, _) =
            orchestrator_with(vec![Arc::new(FakeProvider::new("alpha"))]);

        for _ in 0..11 {
            orchestrator.record_provider_result("alpha", false);
        }
        assert_eq!(
            orchestrator.provider_health("alpha").unwrap().status,
            HealthStatus::Degraded
        );

        drive_down(&orchestrator, "alpha");
        let health = orchestrator.provider_health("alpha").unwrap();
        assert!(health.failure_rate >= 0.2);
    }

    #[test]
    fn selection_skips_down_provider_and_prefers_lowest_rate() {
        let (orchestrator, _) = orchestrator_with(vec![
            Arc::new(FakeProvider::new("alpha")),
            Arc::new(FakeProvider::new("beta")),
        ]);

        drive_down(&orchestrator, "alpha");
        let selected = orchestrator.select_provider(Some("alpha"), None).unwrap();
        assert_eq!(selected.name(), "beta");

        // All down: nothing to select
        drive_down(&orchestrator, "beta");
        assert!(orchestrator.select_provider(None, None).is_none());
    }

    #[tokio::test]
    async fn health_check_is_the_only_path_back_from_down() {
        let alpha = Arc::new(FakeProvider::new("alpha"));
        let (orchestrator, _) = orchestrator_with(vec![alpha.clone()]);

        drive_down(&orchestrator, "alpha");

        // Successes alone never clear the down flag
        for _ in 0..50 {
            orchestrator.record_provider_result("alpha", true);
        }
        assert_eq!(
            orchestrator.provider_health("alpha").unwrap().status,
            HealthStatus::Down
        );

        orchestrator.perform_health_check().await;
        let health = orchestrator.provider_health("alpha").unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.failure_rate, 0.0);
    }

    #[tokio::test]
    async fn failed_probe_leaves_down_provider_down() {
        let alpha = Arc::new(FakeProvider::new("alpha"));
        alpha.probe_ok.store(false, Ordering::SeqCst);
        let (orchestrator, _) = orchestrator_with(vec![alpha.clone()]);

        drive_down(&orchestrator, "alpha");
        orchestrator.perform_health_check().await;
        assert_eq!(
            orchestrator.provider_health("alpha").unwrap().status,
            HealthStatus::Down
        );
    }

    #[tokio::test]
    async fn declined_transfer_falls_back_once() {
        let alpha = Arc::new(FakeProvider::new("alpha"));
        let beta = Arc::new(FakeProvider::new("beta"));
        alpha.fail_transfers.store(true, Ordering::SeqCst);
        let (orchestrator, _) = orchestrator_with(vec![alpha.clone(), beta.clone()]);

        let result = orchestrator
            .initiate_payment(request(), Some("alpha"))
            .await
            .unwrap();
        assert_eq!(result.provider, "beta");
        assert!(result.response.success);
        assert_eq!(alpha.calls.load(Ordering::SeqCst), 1);
        assert_eq!(beta.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_provider_failure_is_returned_structured() {
        let alpha = Arc::new(FakeProvider::new("alpha"));
        alpha.fail_transfers.store(true, Ordering::SeqCst);
        let (orchestrator, _) = orchestrator_with(vec![alpha.clone()]);

        let result = orchestrator.initiate_payment(request(), None).await.unwrap();
        assert_eq!(result.provider, "alpha");
        assert!(!result.response.success);
        assert_eq!(result.response.status, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn all_providers_down_is_provider_unavailable() {
        let (orchestrator, _) =
            orchestrator_with(vec![Arc::new(FakeProvider::new("alpha"))]);
        drive_down(&orchestrator, "alpha");

        let err = orchestrator.initiate_payment(request(), None).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::AppError::Payment(PaymentError::ProviderUnavailable)
        ));
    }
}
