use crate::database::Database;
use crate::emissions::{self, EmissionInput, EmissionsResult};
use crate::errors::{CreditEngineError, Result};
use crate::metrics;
use crate::models::{
    AuthContext, CreateListingRequest, CreditBalance, CreditLot, CreditTransaction,
    IssueCreditsRequest, LedgerEvent, LedgerEventType, Listing, ListingResponse, ListingView,
    MyListingView, PurchaseRequest, PurchaseResponse, PAYMENT_REFERENCE_SIMULATED, SOURCE_ISSUED,
};
use crate::nats::NatsProducer;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct CreditService {
    db: Arc<Database>,
    nats: Arc<NatsProducer>,
    redis: ConnectionManager,
    balance_cache_ttl_secs: u64,
}

impl CreditService {
    pub fn new(
        db: Arc<Database>,
        nats: Arc<NatsProducer>,
        redis: ConnectionManager,
        balance_cache_ttl_secs: u64,
    ) -> Self {
        CreditService {
            db,
            nats,
            redis,
            balance_cache_ttl_secs,
        }
    }

    /// Issue a new credit lot against a project the actor owns.
    pub async fn issue_credits(
        &self,
        ctx: AuthContext,
        request: IssueCreditsRequest,
    ) -> Result<CreditLot> {
        validator::Validate::validate(&request)
            .map_err(|e| CreditEngineError::Validation(e.to_string()))?;

        if request.quantity <= Decimal::ZERO {
            return Err(CreditEngineError::Validation(
                "Credit quantity must be positive".to_string(),
            ));
        }
        if request.value < Decimal::ZERO {
            return Err(CreditEngineError::Validation(
                "Credit value cannot be negative".to_string(),
            ));
        }

        self.db
            .get_project_owned(request.project_id, ctx.user_id)
            .await?
            .ok_or(CreditEngineError::ProjectNotFound(request.project_id))?;

        let lot = self
            .db
            .insert_credit_lot(
                ctx.user_id,
                request.project_id,
                request.quantity,
                request.value,
                SOURCE_ISSUED,
            )
            .await?;

        metrics::CREDITS_ISSUED.inc();
        self.publish_event(LedgerEvent {
            event_type: LedgerEventType::CreditsIssued,
            credit_id: lot.id,
            user_id: ctx.user_id,
            quantity: lot.credits_earned,
            timestamp: Utc::now(),
            metadata: None,
        })
        .await;
        self.invalidate_balance_cache(ctx.user_id).await?;

        info!(
            "Issued {} credits to user {} from project {} (lot: {})",
            lot.credits_earned, ctx.user_id, request.project_id, lot.id
        );

        Ok(lot)
    }

    /// Publish a listing for part of an owned credit lot.
    pub async fn create_listing(
        &self,
        ctx: AuthContext,
        request: CreateListingRequest,
    ) -> Result<ListingResponse> {
        validator::Validate::validate(&request)
            .map_err(|e| CreditEngineError::Validation(e.to_string()))?;

        if request.quantity <= Decimal::ZERO {
            return Err(CreditEngineError::Validation(
                "Listing quantity must be positive".to_string(),
            ));
        }
        if request.price_per_credit <= Decimal::ZERO {
            return Err(CreditEngineError::Validation(
                "Price per credit must be positive".to_string(),
            ));
        }

        let listing = self
            .db
            .create_listing(
                request.credit_id,
                ctx.user_id,
                request.quantity,
                request.price_per_credit,
            )
            .await?;

        metrics::LISTINGS_CREATED.inc();
        self.publish_event(LedgerEvent {
            event_type: LedgerEventType::CreditsListed,
            credit_id: request.credit_id,
            user_id: ctx.user_id,
            quantity: request.quantity,
            timestamp: Utc::now(),
            metadata: Some(serde_json::json!({
                "listing_id": listing.id,
                "price_per_credit": request.price_per_credit,
            })),
        })
        .await;
        self.invalidate_balance_cache(ctx.user_id).await?;

        info!(
            "Listed {} credits from lot {} at {} each (listing: {})",
            request.quantity, request.credit_id, request.price_per_credit, listing.id
        );

        Ok(ListingResponse {
            listing_id: listing.id,
            credit_id: listing.credit_id,
            quantity_available: listing.quantity_available,
            price_per_credit: listing.price_per_credit,
            status: listing.status,
            listed_at: listing.listed_at,
        })
    }

    /// Withdraw an active listing, releasing its reservation.
    pub async fn cancel_listing(&self, ctx: AuthContext, listing_id: Uuid) -> Result<Listing> {
        let outcome = self.db.cancel_listing(listing_id, ctx.user_id).await?;

        if outcome.floor_engaged {
            warn!(
                "Listed-quantity floor engaged while cancelling listing {}; lot {} was already inconsistent with its listings",
                listing_id, outcome.listing.credit_id
            );
        }

        metrics::LISTINGS_CANCELLED.inc();
        self.publish_event(LedgerEvent {
            event_type: LedgerEventType::ListingCancelled,
            credit_id: outcome.listing.credit_id,
            user_id: ctx.user_id,
            quantity: outcome.listing.quantity_available,
            timestamp: Utc::now(),
            metadata: Some(serde_json::json!({ "listing_id": listing_id })),
        })
        .await;
        self.invalidate_balance_cache(ctx.user_id).await?;

        info!("Cancelled listing {} for user {}", listing_id, ctx.user_id);

        Ok(outcome.listing)
    }

    /// Purchase credits from an active listing. The single trade path:
    /// every external entry point funnels through here.
    pub async fn purchase_credits(
        &self,
        ctx: AuthContext,
        listing_id: Uuid,
        request: PurchaseRequest,
    ) -> Result<PurchaseResponse> {
        validator::Validate::validate(&request)
            .map_err(|e| CreditEngineError::Validation(e.to_string()))?;

        let payment_reference = request
            .payment_reference
            .clone()
            .unwrap_or_else(|| PAYMENT_REFERENCE_SIMULATED.to_string());

        let outcome = self
            .db
            .purchase_credits(
                listing_id,
                ctx.user_id,
                request.destination_project_id,
                request.quantity,
                &payment_reference,
            )
            .await
            .map_err(|e| {
                if let CreditEngineError::ConservationViolation { credit_id, detail } = &e {
                    error!(
                        "Conservation violation on lot {} during purchase of listing {}: {}",
                        credit_id, listing_id, detail
                    );
                }
                e
            })?;

        if outcome.floor_engaged {
            warn!(
                "Listed-quantity floor engaged while settling lot {}; upstream data was inconsistent",
                outcome.source_credit.id
            );
        }

        metrics::PURCHASES_COMPLETED.inc();
        metrics::TRADE_VALUE.observe(outcome.total_price.to_f64().unwrap_or(0.0));
        self.publish_event(LedgerEvent {
            event_type: LedgerEventType::CreditsPurchased,
            credit_id: outcome.minted_credit.id,
            user_id: ctx.user_id,
            quantity: request.quantity,
            timestamp: Utc::now(),
            metadata: Some(serde_json::json!({
                "listing_id": listing_id,
                "seller_id": outcome.listing.seller_id,
                "total_price": outcome.total_price,
                "payment_reference": payment_reference,
            })),
        })
        .await;
        self.invalidate_balance_cache(ctx.user_id).await?;
        self.invalidate_balance_cache(outcome.listing.seller_id)
            .await?;

        info!(
            "User {} purchased {} credits from listing {} for {} (lot: {})",
            ctx.user_id, request.quantity, listing_id, outcome.total_price, outcome.minted_credit.id
        );

        Ok(PurchaseResponse {
            credit_id: outcome.minted_credit.id,
            listing_id,
            quantity: request.quantity,
            total_price: outcome.total_price,
            payment_reference,
            transaction_id: outcome.transaction.id,
        })
    }

    /// Active marketplace listings, excluding the viewer's own.
    pub async fn browse_listings(&self, ctx: AuthContext) -> Result<Vec<ListingView>> {
        self.db.browse_listings(ctx.user_id).await
    }

    /// The actor's own listings, all statuses.
    pub async fn my_listings(&self, ctx: AuthContext) -> Result<Vec<MyListingView>> {
        self.db.get_my_listings(ctx.user_id).await
    }

    /// Balance summary for a user, served from cache when fresh.
    pub async fn get_balance(&self, user_id: Uuid) -> Result<CreditBalance> {
        let cache_key = format!("balance:{}", user_id);
        if let Ok(cached) = self
            .redis
            .clone()
            .get::<String, String>(cache_key.clone())
            .await
        {
            if let Ok(balance) = serde_json::from_str::<CreditBalance>(&cached) {
                metrics::CACHE_HITS.inc();
                return Ok(balance);
            }
        }
        metrics::CACHE_MISSES.inc();

        let balance = self
            .db
            .get_balance(user_id)
            .await?
            .unwrap_or(CreditBalance {
                user_id,
                credits_earned: Decimal::ZERO,
                credits_used: Decimal::ZERO,
                listed_quantity: Decimal::ZERO,
                available_credits: Decimal::ZERO,
            });

        let cached = serde_json::to_string(&balance)?;
        let _: () = self
            .redis
            .clone()
            .set_ex(cache_key, cached, self.balance_cache_ttl_secs)
            .await
            .map_err(CreditEngineError::Redis)?;

        Ok(balance)
    }

    /// A user's credit lots.
    pub async fn get_credit_lots(&self, user_id: Uuid) -> Result<Vec<CreditLot>> {
        self.db.get_credit_lots(user_id).await
    }

    /// A user's ledger history.
    pub async fn get_transactions(&self, user_id: Uuid) -> Result<Vec<CreditTransaction>> {
        self.db.get_transactions(user_id).await
    }

    /// Run the deterministic emissions calculation against the stored
    /// factor table.
    pub async fn calculate_emissions(&self, input: EmissionInput) -> Result<EmissionsResult> {
        let factors = self.db.get_emission_factors().await?;
        Ok(emissions::calculate(&input, &factors))
    }

    async fn publish_event(&self, event: LedgerEvent) {
        if let Err(e) = self.nats.publish_ledger_event(&event).await {
            error!("Failed to publish ledger event: {}", e);
        }
    }

    async fn invalidate_balance_cache(&self, user_id: Uuid) -> Result<()> {
        let cache_key = format!("balance:{}", user_id);
        let _: () = self
            .redis
            .clone()
            .del(cache_key)
            .await
            .map_err(CreditEngineError::Redis)?;
        Ok(())
    }
}
