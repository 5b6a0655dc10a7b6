use actix_web::HttpRequest;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::CreditEngineError;

/// Origin of a credit lot: issued from a project's own reduction, or
/// acquired on the marketplace.
pub const SOURCE_ISSUED: &str = "ISSUED";
pub const SOURCE_PURCHASED: &str = "PURCHASED";

pub const CREDIT_STATUS_AVAILABLE: &str = "AVAILABLE";

pub const LISTING_ACTIVE: &str = "active";
pub const LISTING_SOLD: &str = "sold";
pub const LISTING_CANCELLED: &str = "cancelled";

pub const TX_TYPE_LISTING: &str = "LISTING";
pub const TX_TYPE_PURCHASE: &str = "PURCHASE";
pub const TX_STATUS_COMPLETED: &str = "COMPLETED";

/// Payment reference recorded when the caller does not supply one.
pub const PAYMENT_REFERENCE_SIMULATED: &str = "SIMULATED";

/// Identity of the actor performing a ledger operation. Passed explicitly
/// into every service call; never read from ambient state.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
}

impl AuthContext {
    pub fn new(user_id: Uuid) -> Self {
        AuthContext { user_id }
    }

    /// Extract the actor identity supplied by the authentication layer
    /// (out of scope here) via the `X-User-Id` header.
    pub fn from_request(req: &HttpRequest) -> Result<Self, CreditEngineError> {
        let header = req
            .headers()
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .ok_or(CreditEngineError::Unauthorized)?;

        let user_id = Uuid::parse_str(header).map_err(|_| CreditEngineError::Unauthorized)?;
        Ok(AuthContext { user_id })
    }
}

/// One batch of carbon credits on the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditLot {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub credits_earned: Decimal,
    pub credits_used: Decimal,
    pub listed_quantity: Decimal,
    pub credit_value: Decimal,
    pub source: String,
    pub status: String,
    pub issued_at: DateTime<Utc>,
}

/// An active offer to sell quantity from one credit lot.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Listing {
    pub id: Uuid,
    pub credit_id: Uuid,
    pub seller_id: Uuid,
    pub quantity_available: Decimal,
    pub price_per_credit: Decimal,
    pub status: String,
    pub listed_at: DateTime<Utc>,
}

/// Append-only audit entry, one per ledger mutation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub transaction_type: String,
    pub from_user_id: Uuid,
    pub to_user_id: Option<Uuid>,
    pub quantity: Decimal,
    pub from_project_id: Option<Uuid>,
    pub to_project_id: Option<Uuid>,
    pub listing_id: Option<Uuid>,
    pub price_per_credit: Option<Decimal>,
    pub total_price: Option<Decimal>,
    pub payment_reference: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Read-only project context consumed by ownership checks.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub project_type: String,
    pub location: String,
}

/// Marketplace browse row: listing joined with project and seller context.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ListingView {
    pub id: Uuid,
    pub quantity_available: Decimal,
    pub price_per_credit: Decimal,
    pub listed_at: DateTime<Utc>,
    pub project_name: String,
    pub project_type: String,
    pub project_location: String,
    pub seller_name: String,
    pub credits_earned: Decimal,
    pub credits_used: Decimal,
}

/// A seller's own listings across all statuses, with project and lot
/// context. Status is included so open listings can be cancelled.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MyListingView {
    pub id: Uuid,
    pub quantity_available: Decimal,
    pub price_per_credit: Decimal,
    pub listed_at: DateTime<Utc>,
    pub status: String,
    pub project_name: String,
    pub project_type: String,
    pub credits_earned: Decimal,
    pub credits_used: Decimal,
}

/// Per-user balance summary across lots.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditBalance {
    pub user_id: Uuid,
    pub credits_earned: Decimal,
    pub credits_used: Decimal,
    pub listed_quantity: Decimal,
    pub available_credits: Decimal,
}

/// Issue credits against an owned project
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct IssueCreditsRequest {
    pub project_id: Uuid,
    pub quantity: Decimal,
    pub value: Decimal,
}

/// List credits for sale
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct CreateListingRequest {
    pub credit_id: Uuid,
    pub quantity: Decimal,
    pub price_per_credit: Decimal,
}

/// Purchase credits from an active listing
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct PurchaseRequest {
    pub quantity: Decimal,
    pub destination_project_id: Uuid,
    pub payment_reference: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListingResponse {
    pub listing_id: Uuid,
    pub credit_id: Uuid,
    pub quantity_available: Decimal,
    pub price_per_credit: Decimal,
    pub status: String,
    pub listed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub credit_id: Uuid,
    pub listing_id: Uuid,
    pub quantity: Decimal,
    pub total_price: Decimal,
    pub payment_reference: String,
    pub transaction_id: Uuid,
}

/// Ledger event published to NATS after each committed mutation.
#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_type: LedgerEventType,
    pub credit_id: Uuid,
    pub user_id: Uuid,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum LedgerEventType {
    CreditsIssued,
    CreditsListed,
    ListingCancelled,
    CreditsPurchased,
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use rust_decimal_macros::dec;

    #[test]
    fn test_auth_context_from_header() {
        let user_id = Uuid::new_v4();
        let req = TestRequest::default()
            .insert_header(("X-User-Id", user_id.to_string()))
            .to_http_request();

        let ctx = AuthContext::from_request(&req).unwrap();
        assert_eq!(ctx.user_id, user_id);
    }

    #[test]
    fn test_missing_identity_header_is_unauthorized() {
        let req = TestRequest::default().to_http_request();
        let err = AuthContext::from_request(&req).unwrap_err();
        assert!(matches!(err, CreditEngineError::Unauthorized));
    }

    #[test]
    fn test_malformed_identity_header_is_unauthorized() {
        let req = TestRequest::default()
            .insert_header(("X-User-Id", "not-a-uuid"))
            .to_http_request();
        let err = AuthContext::from_request(&req).unwrap_err();
        assert!(matches!(err, CreditEngineError::Unauthorized));
    }

    #[test]
    fn test_my_listing_view_carries_status() {
        // Sellers cancel from this view, so the status must serialize
        let view = MyListingView {
            id: Uuid::new_v4(),
            quantity_available: dec!(25),
            price_per_credit: dec!(4.50),
            listed_at: Utc::now(),
            status: LISTING_ACTIVE.to_string(),
            project_name: "Ring Road Upgrade".to_string(),
            project_type: "Road".to_string(),
            credits_earned: dec!(100),
            credits_used: dec!(10),
        };

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["project_name"], "Ring Road Upgrade");
    }
}
