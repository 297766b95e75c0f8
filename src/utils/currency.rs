//! Currency formatting for satoshi values in reports and exports

/// Satoshis per Bitcoin
const SATS_PER_BTC: u64 = 100_000_000;

/// Exact BTC amount with satoshi precision, without a unit suffix
///
/// Integer arithmetic, so large values do not lose precision.
///
/// # Examples
/// ```
/// use chain_forensics::utils::currency::btc_amount;
///
/// assert_eq!(btc_amount(150_000_000), "1.50000000");
/// assert_eq!(btc_amount(5471), "0.00005471");
/// ```
pub fn btc_amount(sats: u64) -> String {
    format!("{}.{:08}", sats / SATS_PER_BTC, sats % SATS_PER_BTC)
}

/// Format a satoshi amount as dual BTC + sats display
///
/// # Examples
/// ```
/// use chain_forensics::utils::currency::format_sats_as_btc;
///
/// assert_eq!(
///     format_sats_as_btc(28125351850),
///     "281.25351850 BTC (28125351850 sats)"
/// );
/// ```
pub fn format_sats_as_btc(sats: u64) -> String {
    format!("{} BTC ({} sats)", btc_amount(sats), sats)
}

/// Format a taint fraction as a percentage with two decimals
pub fn format_taint(taint: f64) -> String {
    format!("{:.2}%", taint * 100.0)
}
