//! Pure ledger arithmetic for credit lots and listings.
//!
//! All balance math lives here so the conservation invariant
//! (`0 <= used + listed <= earned`) is checked in one place. The database
//! layer reads rows under row locks, applies these transitions, and writes
//! the resulting values back inside the same transaction.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::{CreditEngineError, Result};
use crate::models::{CreditLot, Listing, LISTING_ACTIVE, LISTING_SOLD};

/// Snapshot of one lot's three ledger quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotBalances {
    pub credit_id: Uuid,
    pub earned: Decimal,
    pub used: Decimal,
    pub listed: Decimal,
}

impl LotBalances {
    pub fn from_lot(lot: &CreditLot) -> Self {
        LotBalances {
            credit_id: lot.id,
            earned: lot.credits_earned,
            used: lot.credits_used,
            listed: lot.listed_quantity,
        }
    }

    /// Quantity that can still be listed or sold from this lot.
    pub fn available(&self) -> Decimal {
        self.earned - self.used - self.listed
    }

    /// Conservation invariant: `0 <= used + listed <= earned`.
    pub fn is_consistent(&self) -> bool {
        self.used >= Decimal::ZERO
            && self.listed >= Decimal::ZERO
            && self.used + self.listed <= self.earned
    }

    /// Reserve `quantity` against this lot for a new listing.
    pub fn reserve(&self, quantity: Decimal) -> Result<LotBalances> {
        if quantity <= Decimal::ZERO {
            return Err(CreditEngineError::Validation(
                "Listing quantity must be positive".to_string(),
            ));
        }
        if quantity > self.available() {
            return Err(CreditEngineError::InsufficientBalance {
                requested: quantity.to_string(),
                available: self.available().to_string(),
            });
        }

        Ok(LotBalances {
            listed: self.listed + quantity,
            ..*self
        })
    }

    /// Release a reservation (listing cancelled). The listed quantity is
    /// floored at zero; a `true` flag means the floor actually engaged,
    /// which indicates the lot was already inconsistent with its listings
    /// and must be logged upstream.
    pub fn release(&self, quantity: Decimal) -> (LotBalances, bool) {
        let remaining = self.listed - quantity;
        let floor_engaged = remaining < Decimal::ZERO;
        let next = LotBalances {
            listed: remaining.max(Decimal::ZERO),
            ..*self
        };
        (next, floor_engaged)
    }

    /// Settle a sale of `quantity` from this lot: the quantity moves from
    /// `listed` to `used`. Fails if the result would violate conservation;
    /// the caller must roll back the enclosing transaction.
    pub fn settle_sale(&self, quantity: Decimal) -> Result<(LotBalances, bool)> {
        let remaining_listed = self.listed - quantity;
        let floor_engaged = remaining_listed < Decimal::ZERO;
        let next = LotBalances {
            used: self.used + quantity,
            listed: remaining_listed.max(Decimal::ZERO),
            ..*self
        };

        if !next.is_consistent() {
            return Err(CreditEngineError::ConservationViolation {
                credit_id: self.credit_id,
                detail: format!(
                    "settling {} would leave earned={} used={} listed={}",
                    quantity, next.earned, next.used, next.listed
                ),
            });
        }

        Ok((next, floor_engaged))
    }
}

/// Purchase preconditions, checked in a fixed order so the first failure
/// wins deterministically under concurrent load.
pub fn check_purchase_preconditions(
    listing: &Listing,
    buyer_id: Uuid,
    destination_owned: bool,
    quantity: Decimal,
) -> Result<()> {
    if listing.status != LISTING_ACTIVE || listing.quantity_available <= Decimal::ZERO {
        return Err(CreditEngineError::ListingClosed(listing.id));
    }
    if quantity <= Decimal::ZERO {
        return Err(CreditEngineError::Validation(
            "Purchase quantity must be positive".to_string(),
        ));
    }
    if quantity > listing.quantity_available {
        return Err(CreditEngineError::InsufficientBalance {
            requested: quantity.to_string(),
            available: listing.quantity_available.to_string(),
        });
    }
    if !destination_owned {
        return Err(CreditEngineError::Unauthorized);
    }
    if listing.seller_id == buyer_id {
        return Err(CreditEngineError::SelfTradeForbidden);
    }
    Ok(())
}

/// Listing state after selling `quantity` from it. Quantity exhaustion
/// transitions the listing to `sold`.
pub fn sale_transition(quantity_available: Decimal, quantity: Decimal) -> (Decimal, &'static str) {
    let remaining = quantity_available - quantity;
    if remaining <= Decimal::ZERO {
        (Decimal::ZERO, LISTING_SOLD)
    } else {
        (remaining, LISTING_ACTIVE)
    }
}

/// Exact decimal price of a trade.
pub fn total_price(quantity: Decimal, price_per_credit: Decimal) -> Decimal {
    quantity * price_per_credit
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn balances(earned: Decimal, used: Decimal, listed: Decimal) -> LotBalances {
        LotBalances {
            credit_id: Uuid::new_v4(),
            earned,
            used,
            listed,
        }
    }

    fn active_listing(seller: Uuid, quantity: Decimal, price: Decimal) -> Listing {
        Listing {
            id: Uuid::new_v4(),
            credit_id: Uuid::new_v4(),
            seller_id: seller,
            quantity_available: quantity,
            price_per_credit: price,
            status: LISTING_ACTIVE.to_string(),
            listed_at: Utc::now(),
        }
    }

    #[test]
    fn test_available_balance() {
        let lot = balances(dec!(100), dec!(30), dec!(20));
        assert_eq!(lot.available(), dec!(50));
        assert!(lot.is_consistent());
    }

    #[test]
    fn test_reserve_within_available() {
        let lot = balances(dec!(100), dec!(0), dec!(0));
        let reserved = lot.reserve(dec!(100)).unwrap();
        assert_eq!(reserved.listed, dec!(100));
        assert_eq!(reserved.available(), dec!(0));
        assert!(reserved.is_consistent());
    }

    #[test]
    fn test_reserve_beyond_available_fails() {
        let lot = balances(dec!(100), dec!(40), dec!(30));
        let err = lot.reserve(dec!(31)).unwrap_err();
        assert!(matches!(
            err,
            CreditEngineError::InsufficientBalance { .. }
        ));
    }

    #[test]
    fn test_reserve_rejects_non_positive_quantity() {
        let lot = balances(dec!(100), dec!(0), dec!(0));
        assert!(matches!(
            lot.reserve(dec!(0)),
            Err(CreditEngineError::Validation(_))
        ));
        assert!(matches!(
            lot.reserve(dec!(-5)),
            Err(CreditEngineError::Validation(_))
        ));
    }

    #[test]
    fn test_release_returns_reservation() {
        let lot = balances(dec!(100), dec!(0), dec!(60));
        let (released, floor) = lot.release(dec!(60));
        assert_eq!(released.listed, dec!(0));
        assert_eq!(released.available(), dec!(100));
        assert!(!floor);
    }

    #[test]
    fn test_release_floor_engages_on_corrupt_lot() {
        let lot = balances(dec!(100), dec!(0), dec!(10));
        let (released, floor) = lot.release(dec!(25));
        assert_eq!(released.listed, dec!(0));
        assert!(floor);
    }

    #[test]
    fn test_settle_full_sale() {
        // Lot A: earned=100, listed=100; selling all of it
        let lot = balances(dec!(100), dec!(0), dec!(100));
        let (settled, floor) = lot.settle_sale(dec!(100)).unwrap();
        assert_eq!(settled.used, dec!(100));
        assert_eq!(settled.listed, dec!(0));
        assert_eq!(settled.available(), dec!(0));
        assert!(settled.is_consistent());
        assert!(!floor);
    }

    #[test]
    fn test_settle_partial_sale() {
        // Lot A: earned=50, listed=50; buyer takes 20
        let lot = balances(dec!(50), dec!(0), dec!(50));
        let (settled, _) = lot.settle_sale(dec!(20)).unwrap();
        assert_eq!(settled.used, dec!(20));
        assert_eq!(settled.listed, dec!(30));
        assert!(settled.is_consistent());
    }

    #[test]
    fn test_settle_violating_conservation_fails() {
        let lot = balances(dec!(100), dec!(90), dec!(0));
        let err = lot.settle_sale(dec!(20)).unwrap_err();
        assert!(matches!(
            err,
            CreditEngineError::ConservationViolation { .. }
        ));
    }

    #[test]
    fn test_sale_transition_partial_keeps_active() {
        let (remaining, status) = sale_transition(dec!(50), dec!(20));
        assert_eq!(remaining, dec!(30));
        assert_eq!(status, LISTING_ACTIVE);
    }

    #[test]
    fn test_sale_transition_exhaustion_goes_sold() {
        let (remaining, status) = sale_transition(dec!(100), dec!(100));
        assert_eq!(remaining, dec!(0));
        assert_eq!(status, LISTING_SOLD);
    }

    #[test]
    fn test_total_price_is_exact() {
        assert_eq!(total_price(dec!(100), dec!(10)), dec!(1000));
        assert_eq!(total_price(dec!(0.1), dec!(0.2)), dec!(0.02));
        assert_eq!(total_price(dec!(33), dec!(3.33)), dec!(109.89));
    }

    #[test]
    fn test_preconditions_closed_listing_wins_over_bad_quantity() {
        let buyer = Uuid::new_v4();
        let mut listing = active_listing(Uuid::new_v4(), dec!(10), dec!(5));
        listing.status = LISTING_SOLD.to_string();

        // Even with an invalid quantity, the closed-listing check fires first
        let err = check_purchase_preconditions(&listing, buyer, true, dec!(-1)).unwrap_err();
        assert!(matches!(err, CreditEngineError::ListingClosed(_)));
    }

    #[test]
    fn test_preconditions_quantity_checked_before_ownership() {
        let buyer = Uuid::new_v4();
        let listing = active_listing(Uuid::new_v4(), dec!(10), dec!(5));

        let err = check_purchase_preconditions(&listing, buyer, false, dec!(20)).unwrap_err();
        assert!(matches!(
            err,
            CreditEngineError::InsufficientBalance { .. }
        ));
    }

    #[test]
    fn test_preconditions_unowned_destination() {
        let buyer = Uuid::new_v4();
        let listing = active_listing(Uuid::new_v4(), dec!(10), dec!(5));

        let err = check_purchase_preconditions(&listing, buyer, false, dec!(5)).unwrap_err();
        assert!(matches!(err, CreditEngineError::Unauthorized));
    }

    #[test]
    fn test_preconditions_self_trade_forbidden() {
        let seller = Uuid::new_v4();
        let listing = active_listing(seller, dec!(10), dec!(5));

        // Seller buying any quantity of their own listing is rejected
        let err = check_purchase_preconditions(&listing, seller, true, dec!(1)).unwrap_err();
        assert!(matches!(err, CreditEngineError::SelfTradeForbidden));
    }

    #[test]
    fn test_oversell_leaves_balances_untouched() {
        let lot = balances(dec!(100), dec!(0), dec!(40));
        let before = lot;
        let _ = lot.reserve(dec!(61));
        assert_eq!(lot, before);
    }

    #[test]
    fn test_concurrent_oversell_second_purchase_fails() {
        // Listing with 100 available; two buyers race for 60 each. The
        // serialized outcome: first wins, second sees only 40 left.
        let seller = Uuid::new_v4();
        let buyer_a = Uuid::new_v4();
        let buyer_b = Uuid::new_v4();
        let mut listing = active_listing(seller, dec!(100), dec!(10));

        check_purchase_preconditions(&listing, buyer_a, true, dec!(60)).unwrap();
        let (remaining, status) = sale_transition(listing.quantity_available, dec!(60));
        listing.quantity_available = remaining;
        listing.status = status.to_string();

        let err = check_purchase_preconditions(&listing, buyer_b, true, dec!(60)).unwrap_err();
        assert!(matches!(
            err,
            CreditEngineError::InsufficientBalance { .. }
        ));
        assert_eq!(listing.quantity_available, dec!(40));
    }
}
