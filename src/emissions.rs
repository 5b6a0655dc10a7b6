//! Deterministic CO2e arithmetic over a project's material and energy
//! usage. Factors come from the `emission_factors` table; everything here
//! is pure decimal math so the web layer can expose it without touching
//! ledger state.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Factor names as stored in `emission_factors`.
pub const FACTOR_ASPHALT: &str = "Asphalt";
pub const FACTOR_AGGREGATE: &str = "Aggregate";
pub const FACTOR_CEMENT: &str = "Cement";
pub const FACTOR_STEEL: &str = "Steel";
pub const FACTOR_DIESEL: &str = "Diesel";
pub const FACTOR_ELECTRICITY: &str = "Electricity";
pub const FACTOR_TRANSPORT: &str = "Transport";

const KG_PER_TONNE: Decimal = dec!(1000);
const RECYCLED_REDUCTION_WEIGHT: Decimal = dec!(0.3);
const RENEWABLE_REDUCTION_WEIGHT: Decimal = dec!(0.4);
const PERCENT: Decimal = dec!(100);

pub type FactorTable = HashMap<String, Decimal>;

/// Material and energy quantities entered for a project.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EmissionInput {
    #[serde(default)]
    pub asphalt_t: Decimal,
    #[serde(default)]
    pub aggregate_t: Decimal,
    #[serde(default)]
    pub cement_t: Decimal,
    #[serde(default)]
    pub steel_t: Decimal,
    #[serde(default)]
    pub diesel_l: Decimal,
    #[serde(default)]
    pub electricity_kwh: Decimal,
    #[serde(default)]
    pub transport_tkm: Decimal,
    #[serde(default)]
    pub recycled_pct: Decimal,
    #[serde(default)]
    pub renewable_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissionBreakdown {
    pub materials: Decimal,
    pub equipment_fuel: Decimal,
    pub electricity: Decimal,
    pub transport: Decimal,
}

/// Calculation result, reported in tonnes CO2e.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissionsResult {
    pub total_co2e: Decimal,
    pub breakdown: EmissionBreakdown,
    pub credits: Decimal,
    pub reduction_pct: Decimal,
}

fn factor(factors: &FactorTable, name: &str) -> Decimal {
    factors.get(name).copied().unwrap_or(Decimal::ZERO)
}

/// Multiply-and-sum over the factor table. Factors are kg CO2e per unit;
/// results are converted to tonnes for reporting. Credits are derived from
/// the recycled/renewable reduction and never go negative.
pub fn calculate(input: &EmissionInput, factors: &FactorTable) -> EmissionsResult {
    let materials_kg = input.asphalt_t * factor(factors, FACTOR_ASPHALT)
        + input.aggregate_t * factor(factors, FACTOR_AGGREGATE)
        + input.cement_t * factor(factors, FACTOR_CEMENT)
        + input.steel_t * factor(factors, FACTOR_STEEL);
    let fuel_kg = input.diesel_l * factor(factors, FACTOR_DIESEL);
    let electricity_kg = input.electricity_kwh * factor(factors, FACTOR_ELECTRICITY);
    let transport_kg = input.transport_tkm * factor(factors, FACTOR_TRANSPORT);

    let total_kg = materials_kg + fuel_kg + electricity_kg + transport_kg;

    let recycled = (input.recycled_pct / PERCENT).max(Decimal::ZERO);
    let renewable = (input.renewable_pct / PERCENT).max(Decimal::ZERO);
    let reduction_kg =
        total_kg * (recycled * RECYCLED_REDUCTION_WEIGHT + renewable * RENEWABLE_REDUCTION_WEIGHT);
    let reduction_pct = if total_kg > Decimal::ZERO {
        (reduction_kg / total_kg) * PERCENT
    } else {
        Decimal::ZERO
    };

    EmissionsResult {
        total_co2e: (total_kg / KG_PER_TONNE).round_dp(2),
        breakdown: EmissionBreakdown {
            materials: (materials_kg / KG_PER_TONNE).round_dp(2),
            equipment_fuel: (fuel_kg / KG_PER_TONNE).round_dp(2),
            electricity: (electricity_kg / KG_PER_TONNE).round_dp(2),
            transport: (transport_kg / KG_PER_TONNE).round_dp(2),
        },
        credits: (reduction_kg / KG_PER_TONNE).round_dp(2),
        reduction_pct: reduction_pct.round_dp(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_factors() -> FactorTable {
        let mut factors = FactorTable::new();
        factors.insert(FACTOR_ASPHALT.to_string(), dec!(60));
        factors.insert(FACTOR_AGGREGATE.to_string(), dec!(5));
        factors.insert(FACTOR_CEMENT.to_string(), dec!(900));
        factors.insert(FACTOR_STEEL.to_string(), dec!(1850));
        factors.insert(FACTOR_DIESEL.to_string(), dec!(2.68));
        factors.insert(FACTOR_ELECTRICITY.to_string(), dec!(0.82));
        factors.insert(FACTOR_TRANSPORT.to_string(), dec!(0.1));
        factors
    }

    #[test]
    fn test_zero_input_yields_zero_result() {
        let result = calculate(&EmissionInput::default(), &test_factors());
        assert_eq!(result.total_co2e, dec!(0.00));
        assert_eq!(result.credits, dec!(0.00));
        assert_eq!(result.reduction_pct, dec!(0.00));
    }

    #[test]
    fn test_material_emissions_sum() {
        let input = EmissionInput {
            cement_t: dec!(10),
            steel_t: dec!(2),
            ..Default::default()
        };
        // 10 * 900 + 2 * 1850 = 12700 kg = 12.70 t
        let result = calculate(&input, &test_factors());
        assert_eq!(result.total_co2e, dec!(12.70));
        assert_eq!(result.breakdown.materials, dec!(12.70));
        assert_eq!(result.breakdown.transport, dec!(0.00));
    }

    #[test]
    fn test_reduction_and_credits() {
        let input = EmissionInput {
            cement_t: dec!(100),
            recycled_pct: dec!(50),
            renewable_pct: dec!(25),
            ..Default::default()
        };
        // total = 90000 kg; reduction = 90000 * (0.5*0.3 + 0.25*0.4) = 22500 kg
        let result = calculate(&input, &test_factors());
        assert_eq!(result.total_co2e, dec!(90.00));
        assert_eq!(result.credits, dec!(22.50));
        assert_eq!(result.reduction_pct, dec!(25.00));
    }

    #[test]
    fn test_missing_factor_contributes_nothing() {
        let mut factors = test_factors();
        factors.remove(FACTOR_DIESEL);
        let input = EmissionInput {
            diesel_l: dec!(5000),
            ..Default::default()
        };
        let result = calculate(&input, &factors);
        assert_eq!(result.total_co2e, dec!(0.00));
    }
}
