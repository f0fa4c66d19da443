//! Canonical symbol handling.
//!
//! Every upstream spells symbols differently (`btc_usdt`, `BTC-USDT`,
//! `BTCUSDT`). All maps in this crate join on the canonical form produced
//! here, so [`normalize`] must be applied wherever a symbol crosses a
//! component boundary.

use smol_str::SmolStr;

/// Canonical market symbol, e.g. `BTCUSDT`.
pub type Symbol = SmolStr;

/// Quote currency every displayed market is denominated in.
pub const REFERENCE_CURRENCY: &str = "USDT";

/// Map any symbol spelling variant to its canonical form.
///
/// Strips separators and upper-cases. Pure and total: any input yields a
/// (possibly empty) canonical symbol, never an error.
pub fn normalize(raw: &str) -> Symbol {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// True if the canonical symbol is quoted in the reference currency.
pub fn quoted_in_reference(canonical: &str) -> bool {
    canonical.ends_with(REFERENCE_CURRENCY)
}
