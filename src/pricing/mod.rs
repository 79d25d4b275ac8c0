pub mod compare;
pub mod landed;
pub mod refund;
pub mod shipping;
pub mod solver;

pub use compare::{MarketplaceComparison, MarketplaceProfile, MarketplaceQuote, compare_marketplaces};
pub use landed::{DestinationMode, LandedCost, LandedCostConfig, landed_cost};
pub use shipping::{ChargeableWeight, Dimensions, chargeable_weight};
pub use solver::{
    CostBreakdown, FeeSchedule, PriceRounding, PricingInput, PricingResult, ProfitTarget,
    RoundingDirection, ShippingTerms, SolverConfig, StoreTier, price_at, solve,
};
