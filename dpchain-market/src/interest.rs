//! Interest accrual on cover positions (§4.E "Interest accrual on covers"),
//! grounded on `market_engine_v7.cpp`'s `get_interest_owed`/`get_interest_paid`
//! pair: simple (not compounding) interest, APR capped by the configured
//! ceiling, prorated by position age in seconds.

const SECONDS_PER_YEAR: u128 = 365 * 24 * 60 * 60;

/// Interest owed on `principal` after `age_seconds` at `apr_bps` basis
/// points (1/100th of a percent), capped at `max_apr_bps`.
pub fn interest_owed(principal: u64, apr_bps: u16, age_seconds: u64, max_apr_bps: u16) -> u64 {
    let apr = apr_bps.min(max_apr_bps) as u128;
    let numerator = principal as u128 * apr * age_seconds as u128;
    (numerator / (10_000 * SECONDS_PER_YEAR)) as u64
}

/// Splits a payment of `total_paid` quote units into `(interest, principal)`
/// when a cover partially repays: interest is collected first, proportional
/// to the fraction of the position being repaid, per §4.E "Partial covers
/// pay interest proportionally".
pub fn split_payment(total_paid: u64, payoff_balance: u64, owed_interest: u64) -> (u64, u64) {
    if payoff_balance == 0 {
        return (0, 0);
    }
    let interest = ((total_paid as u128 * owed_interest as u128) / payoff_balance as u128) as u64;
    let interest = interest.min(total_paid);
    (interest, total_paid - interest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_year_charges_full_apr() {
        // 1,000,000 principal at 10% APR for a full year -> 100,000 owed.
        let owed = interest_owed(1_000_000, 1_000, SECONDS_PER_YEAR as u64, 2_500);
        assert_eq!(owed, 100_000);
    }

    #[test]
    fn apr_capped_at_ceiling() {
        let owed = interest_owed(1_000_000, 5_000, SECONDS_PER_YEAR as u64, 2_500);
        assert_eq!(owed, 250_000);
    }

    #[test]
    fn partial_payment_splits_proportionally() {
        let (interest, principal) = split_payment(500, 1_000, 50);
        assert_eq!(interest, 25);
        assert_eq!(principal, 475);
    }
}
