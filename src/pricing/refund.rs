//! Consumption-tax refund on export sales.
//!
//! Exports are zero-rated, so the tax embedded in domestic purchases and
//! domestic fees comes back to the seller. Amounts are tax-inclusive and in
//! origin currency.

pub const DEFAULT_CONSUMPTION_TAX_RATE: f64 = 0.10;

/// Tax contained in a tax-inclusive `taxable` amount.
pub fn refund_amount(taxable: f64, tax_rate: f64) -> f64 {
    if !taxable.is_finite() || taxable <= 0.0 || !tax_rate.is_finite() || tax_rate <= 0.0 {
        return 0.0;
    }
    taxable * tax_rate / (1.0 + tax_rate)
}
