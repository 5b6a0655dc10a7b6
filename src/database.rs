use crate::emissions::FactorTable;
use crate::errors::{CreditEngineError, Result};
use crate::ledger::{self, LotBalances};
use crate::models::{
    CreditBalance, CreditLot, CreditTransaction, Listing, ListingView, MyListingView, Project,
    CREDIT_STATUS_AVAILABLE, LISTING_ACTIVE, LISTING_CANCELLED, TX_STATUS_COMPLETED,
    TX_TYPE_LISTING, TX_TYPE_PURCHASE,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Pool, Postgres};
use std::time::Duration;
use uuid::Uuid;

/// Result of a committed purchase: every row the trade touched.
#[derive(Debug)]
pub struct PurchaseOutcome {
    pub listing: Listing,
    pub source_credit: CreditLot,
    pub minted_credit: CreditLot,
    pub transaction: CreditTransaction,
    pub total_price: Decimal,
    pub floor_engaged: bool,
}

/// Result of a committed cancellation.
#[derive(Debug)]
pub struct CancelOutcome {
    pub listing: Listing,
    pub floor_engaged: bool,
}

pub struct Database {
    pool: Pool<Postgres>,
}

impl Database {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Look up a project only if the given user owns it.
    pub async fn get_project_owned(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT id, user_id, name, type AS project_type, location
            FROM projects
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(project)
    }

    /// Issue a new credit lot. Used and listed quantities start at zero.
    pub async fn insert_credit_lot(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        quantity: Decimal,
        value: Decimal,
        source: &str,
    ) -> Result<CreditLot> {
        let lot = sqlx::query_as::<_, CreditLot>(
            r#"
            INSERT INTO carbon_credits
                (id, user_id, project_id, credits_earned, credits_used, listed_quantity,
                 credit_value, source, status, issued_at)
            VALUES ($1, $2, $3, $4, 0, 0, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(project_id)
        .bind(quantity)
        .bind(value)
        .bind(source)
        .bind(CREDIT_STATUS_AVAILABLE)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(lot)
    }

    /// Get a credit lot by ID.
    pub async fn get_credit_lot(&self, credit_id: Uuid) -> Result<Option<CreditLot>> {
        let lot = sqlx::query_as::<_, CreditLot>(
            r#"
            SELECT * FROM carbon_credits WHERE id = $1
            "#,
        )
        .bind(credit_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(lot)
    }

    /// Get a listing by ID.
    pub async fn get_listing(&self, listing_id: Uuid) -> Result<Option<Listing>> {
        let listing = sqlx::query_as::<_, Listing>(
            r#"
            SELECT * FROM marketplace_listings WHERE id = $1
            "#,
        )
        .bind(listing_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(listing)
    }

    /// Active listings with project and seller context, excluding the
    /// viewer's own offers.
    pub async fn browse_listings(&self, exclude_user: Uuid) -> Result<Vec<ListingView>> {
        let listings = sqlx::query_as::<_, ListingView>(
            r#"
            SELECT ml.id, ml.quantity_available, ml.price_per_credit, ml.listed_at,
                   p.name AS project_name, p.type AS project_type, p.location AS project_location,
                   u.username AS seller_name,
                   cc.credits_earned, cc.credits_used
            FROM marketplace_listings ml
            JOIN carbon_credits cc ON ml.credit_id = cc.id
            JOIN projects p ON cc.project_id = p.id
            JOIN users u ON ml.seller_id = u.id
            WHERE ml.status = $1 AND ml.quantity_available > 0 AND ml.seller_id != $2
            ORDER BY ml.listed_at DESC
            "#,
        )
        .bind(LISTING_ACTIVE)
        .bind(exclude_user)
        .fetch_all(&self.pool)
        .await?;

        Ok(listings)
    }

    /// A seller's own listings across all statuses, newest first.
    pub async fn get_my_listings(&self, seller_id: Uuid) -> Result<Vec<MyListingView>> {
        let listings = sqlx::query_as::<_, MyListingView>(
            r#"
            SELECT ml.id, ml.quantity_available, ml.price_per_credit, ml.listed_at, ml.status,
                   p.name AS project_name, p.type AS project_type,
                   cc.credits_earned, cc.credits_used
            FROM marketplace_listings ml
            JOIN carbon_credits cc ON ml.credit_id = cc.id
            JOIN projects p ON cc.project_id = p.id
            WHERE ml.seller_id = $1
            ORDER BY ml.listed_at DESC
            "#,
        )
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(listings)
    }

    /// Aggregate earned/used/listed balances across a user's lots.
    pub async fn get_balance(&self, user_id: Uuid) -> Result<Option<CreditBalance>> {
        let balance = sqlx::query_as::<_, CreditBalance>(
            r#"
            SELECT
                user_id,
                SUM(credits_earned) AS credits_earned,
                SUM(credits_used) AS credits_used,
                SUM(listed_quantity) AS listed_quantity,
                SUM(credits_earned - credits_used - listed_quantity) AS available_credits
            FROM carbon_credits
            WHERE user_id = $1
            GROUP BY user_id
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance)
    }

    /// A user's lots, newest first.
    pub async fn get_credit_lots(&self, user_id: Uuid) -> Result<Vec<CreditLot>> {
        let lots = sqlx::query_as::<_, CreditLot>(
            r#"
            SELECT * FROM carbon_credits WHERE user_id = $1 ORDER BY issued_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lots)
    }

    /// A user's ledger history (either side of the trade), newest first.
    pub async fn get_transactions(&self, user_id: Uuid) -> Result<Vec<CreditTransaction>> {
        let transactions = sqlx::query_as::<_, CreditTransaction>(
            r#"
            SELECT * FROM carbon_credit_transactions
            WHERE from_user_id = $1 OR to_user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    /// Load the emission factor table (kg CO2e per unit).
    pub async fn get_emission_factors(&self) -> Result<FactorTable> {
        let rows = sqlx::query_as::<_, (String, Decimal)>(
            r#"
            SELECT name, co2e_per_unit FROM emission_factors
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Reserve quantity on a lot and publish a listing, atomically.
    ///
    /// Locks the lot row, applies the reservation through the ledger math
    /// (which rejects oversubscription), then inserts the listing and its
    /// audit row in the same transaction.
    pub async fn create_listing(
        &self,
        credit_id: Uuid,
        seller_id: Uuid,
        quantity: Decimal,
        price_per_credit: Decimal,
    ) -> Result<Listing> {
        let mut tx = self.pool.begin().await?;

        let lot = sqlx::query_as::<_, CreditLot>(
            r#"
            SELECT cc.*
            FROM carbon_credits cc
            JOIN projects p ON cc.project_id = p.id
            WHERE cc.id = $1 AND p.user_id = $2
            FOR UPDATE OF cc
            "#,
        )
        .bind(credit_id)
        .bind(seller_id)
        .fetch_optional(&mut *tx)
        .await?;

        let lot = match lot {
            Some(lot) => lot,
            None => {
                // Distinguish a missing lot from someone else's lot
                let exists = sqlx::query_scalar::<_, Uuid>(
                    "SELECT id FROM carbon_credits WHERE id = $1",
                )
                .bind(credit_id)
                .fetch_optional(&mut *tx)
                .await?;

                return Err(match exists {
                    Some(_) => CreditEngineError::Unauthorized,
                    None => CreditEngineError::CreditNotFound(credit_id),
                });
            }
        };

        let reserved = LotBalances::from_lot(&lot).reserve(quantity)?;

        sqlx::query(
            r#"
            UPDATE carbon_credits SET listed_quantity = $1 WHERE id = $2
            "#,
        )
        .bind(reserved.listed)
        .bind(credit_id)
        .execute(&mut *tx)
        .await?;

        let listing = sqlx::query_as::<_, Listing>(
            r#"
            INSERT INTO marketplace_listings
                (id, credit_id, seller_id, quantity_available, price_per_credit, status, listed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(credit_id)
        .bind(seller_id)
        .bind(quantity)
        .bind(price_per_credit)
        .bind(LISTING_ACTIVE)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO carbon_credit_transactions
                (id, transaction_type, from_user_id, quantity, from_project_id, listing_id,
                 price_per_credit, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(TX_TYPE_LISTING)
        .bind(seller_id)
        .bind(quantity)
        .bind(lot.project_id)
        .bind(listing.id)
        .bind(price_per_credit)
        .bind(TX_STATUS_COMPLETED)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(listing)
    }

    /// Cancel an active listing and release its reservation, atomically.
    pub async fn cancel_listing(
        &self,
        listing_id: Uuid,
        requester_id: Uuid,
    ) -> Result<CancelOutcome> {
        let mut tx = self.pool.begin().await?;

        let listing = sqlx::query_as::<_, Listing>(
            r#"
            SELECT * FROM marketplace_listings WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(listing_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CreditEngineError::ListingNotFound(listing_id))?;

        if listing.seller_id != requester_id {
            return Err(CreditEngineError::Unauthorized);
        }
        if listing.status != LISTING_ACTIVE {
            return Err(CreditEngineError::ListingClosed(listing_id));
        }

        let lot = sqlx::query_as::<_, CreditLot>(
            r#"
            SELECT * FROM carbon_credits WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(listing.credit_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CreditEngineError::CreditNotFound(listing.credit_id))?;

        let (released, floor_engaged) =
            LotBalances::from_lot(&lot).release(listing.quantity_available);

        sqlx::query(
            r#"
            UPDATE carbon_credits SET listed_quantity = $1 WHERE id = $2
            "#,
        )
        .bind(released.listed)
        .bind(lot.id)
        .execute(&mut *tx)
        .await?;

        let listing = sqlx::query_as::<_, Listing>(
            r#"
            UPDATE marketplace_listings SET status = $1 WHERE id = $2 RETURNING *
            "#,
        )
        .bind(LISTING_CANCELLED)
        .bind(listing_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CancelOutcome {
            listing,
            floor_engaged,
        })
    }

    /// Execute a purchase as a single transaction: decrement the listing,
    /// settle the seller's lot, mint the buyer's lot, and append the audit
    /// row. Any failure rolls the whole sequence back.
    ///
    /// The listing and lot rows are locked for the duration, so two racing
    /// purchases serialize; the loser re-reads the decremented quantity and
    /// fails its precondition check instead of overselling.
    pub async fn purchase_credits(
        &self,
        listing_id: Uuid,
        buyer_id: Uuid,
        destination_project_id: Uuid,
        quantity: Decimal,
        payment_reference: &str,
    ) -> Result<PurchaseOutcome> {
        let mut tx = self.pool.begin().await?;

        let listing = sqlx::query_as::<_, Listing>(
            r#"
            SELECT * FROM marketplace_listings WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(listing_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CreditEngineError::ListingNotFound(listing_id))?;

        let destination_owned = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM projects WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(destination_project_id)
        .bind(buyer_id)
        .fetch_optional(&mut *tx)
        .await?
        .is_some();

        ledger::check_purchase_preconditions(&listing, buyer_id, destination_owned, quantity)?;

        let total_price = ledger::total_price(quantity, listing.price_per_credit);
        let (remaining, new_status) = ledger::sale_transition(listing.quantity_available, quantity);

        let listing = sqlx::query_as::<_, Listing>(
            r#"
            UPDATE marketplace_listings
            SET quantity_available = $1, status = $2
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(remaining)
        .bind(new_status)
        .bind(listing_id)
        .fetch_one(&mut *tx)
        .await?;

        let source_lot = sqlx::query_as::<_, CreditLot>(
            r#"
            SELECT * FROM carbon_credits WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(listing.credit_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CreditEngineError::CreditNotFound(listing.credit_id))?;

        // Conservation guard: a failure here rolls back everything above
        let (settled, floor_engaged) = LotBalances::from_lot(&source_lot).settle_sale(quantity)?;

        let source_credit = sqlx::query_as::<_, CreditLot>(
            r#"
            UPDATE carbon_credits
            SET credits_used = $1, listed_quantity = $2
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(settled.used)
        .bind(settled.listed)
        .bind(source_lot.id)
        .fetch_one(&mut *tx)
        .await?;

        let minted_credit = sqlx::query_as::<_, CreditLot>(
            r#"
            INSERT INTO carbon_credits
                (id, user_id, project_id, credits_earned, credits_used, listed_quantity,
                 credit_value, source, status, issued_at)
            VALUES ($1, $2, $3, $4, 0, 0, $5, 'PURCHASED', $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(buyer_id)
        .bind(destination_project_id)
        .bind(quantity)
        .bind(total_price)
        .bind(CREDIT_STATUS_AVAILABLE)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        let transaction = sqlx::query_as::<_, CreditTransaction>(
            r#"
            INSERT INTO carbon_credit_transactions
                (id, transaction_type, from_user_id, to_user_id, quantity,
                 from_project_id, to_project_id, listing_id,
                 price_per_credit, total_price, payment_reference, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(TX_TYPE_PURCHASE)
        .bind(listing.seller_id)
        .bind(buyer_id)
        .bind(quantity)
        .bind(source_credit.project_id)
        .bind(destination_project_id)
        .bind(listing.id)
        .bind(listing.price_per_credit)
        .bind(total_price)
        .bind(payment_reference)
        .bind(TX_STATUS_COMPLETED)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PurchaseOutcome {
            listing,
            source_credit,
            minted_credit,
            transaction,
            total_price,
            floor_engaged,
        })
    }
}
