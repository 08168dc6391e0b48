use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::config;

/// Charge presented to the gateway for authorization.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub transaction_id: Uuid,
    pub merchant_id: Uuid,
    pub amount: i64,
    pub currency: String,
}

/// Refund presented to the gateway for settlement.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub refund_id: Uuid,
    pub reference: String,
    pub amount: i64,
    pub currency: String,
}

/// Typed gateway verdict; never raw provider JSON.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayDecision {
    pub approved: bool,
    pub message: String,
    pub code: Option<String>,
}

/// key: gateway-adapter -> settlement simulation boundary
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    async fn authorize_charge(&self, request: &ChargeRequest) -> Result<GatewayDecision>;
    async fn settle_refund(&self, request: &RefundRequest) -> Result<GatewayDecision>;
}

/// Policy-driven stand-in for a real payment network. Amounts on the decline
/// list, or above the configured ceiling, are refused; everything else clears.
pub struct SimulatedGateway {
    decline_amounts: HashSet<i64>,
    decline_over: Option<i64>,
}

impl SimulatedGateway {
    pub fn new(decline_amounts: HashSet<i64>, decline_over: Option<i64>) -> Self {
        Self {
            decline_amounts,
            decline_over,
        }
    }

    pub fn from_env() -> Self {
        Self::new(config::GATEWAY_DECLINE_AMOUNTS.clone(), *config::GATEWAY_DECLINE_OVER)
    }

    fn decide(&self, amount: i64) -> GatewayDecision {
        if self.decline_amounts.contains(&amount) {
            return GatewayDecision {
                approved: false,
                message: "declined by simulation policy".to_string(),
                code: Some("do_not_honor".to_string()),
            };
        }
        if let Some(ceiling) = self.decline_over {
            if amount > ceiling {
                return GatewayDecision {
                    approved: false,
                    message: format!("amount above simulated limit of {ceiling}"),
                    code: Some("amount_too_large".to_string()),
                };
            }
        }
        GatewayDecision {
            approved: true,
            message: "approved".to_string(),
            code: None,
        }
    }
}

#[async_trait]
impl SettlementGateway for SimulatedGateway {
    async fn authorize_charge(&self, request: &ChargeRequest) -> Result<GatewayDecision> {
        Ok(self.decide(request.amount))
    }

    async fn settle_refund(&self, request: &RefundRequest) -> Result<GatewayDecision> {
        Ok(self.decide(request.amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decline_list_and_ceiling_are_honored() {
        let gateway = SimulatedGateway::new(HashSet::from([4002]), Some(100_000));
        let mut request = ChargeRequest {
            transaction_id: Uuid::new_v4(),
            merchant_id: Uuid::new_v4(),
            amount: 4002,
            currency: "USD".to_string(),
        };

        let declined = gateway.authorize_charge(&request).await.unwrap();
        assert!(!declined.approved);

        request.amount = 250_000;
        let too_large = gateway.authorize_charge(&request).await.unwrap();
        assert!(!too_large.approved);
        assert_eq!(too_large.code.as_deref(), Some("amount_too_large"));

        request.amount = 9900;
        let approved = gateway.authorize_charge(&request).await.unwrap();
        assert!(approved.approved);
    }
}
