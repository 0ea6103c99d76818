//! Escrow key derivation and ledger amount conversion

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sha2::{Digest, Sha256};

/// Lamports per on-chain unit
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Platform fee charged on every escrow (0.01 SOL)
pub const PLATFORM_FEE_LAMPORTS: u64 = 10_000_000;

/// Maximum length of a single escrow seed
pub const MAX_ORDER_KEY_LEN: usize = 32;

const ESCROW_SEED: &[u8] = b"escrow";

/// Escrow order key: the order identifier truncated to [`MAX_ORDER_KEY_LEN`] bytes
///
/// Truncation never splits a UTF-8 character.
pub fn order_key(order_id: &str) -> &str {
    if order_id.len() <= MAX_ORDER_KEY_LEN {
        return order_id;
    }
    let mut end = MAX_ORDER_KEY_LEN;
    while !order_id.is_char_boundary(end) {
        end -= 1;
    }
    &order_id[..end]
}

/// Deterministic escrow account address for (buyer, seller, order key)
///
/// SHA-256 over the length-prefixed seeds `"escrow" | buyer | seller | order_key`.
pub fn escrow_address(buyer_id: &str, seller_id: &str, order_key: &str) -> String {
    let mut hasher = Sha256::new();
    for seed in [
        ESCROW_SEED,
        buyer_id.as_bytes(),
        seller_id.as_bytes(),
        order_key.as_bytes(),
    ] {
        hasher.update((seed.len() as u32).to_le_bytes());
        hasher.update(seed);
    }
    hex::encode(hasher.finalize())
}

/// Convert a decimal price to lamports (truncating sub-lamport fractions)
///
/// Returns `None` for negative prices or values that overflow `u64`.
pub fn to_lamports(price: Decimal) -> Option<u64> {
    if price.is_sign_negative() {
        return None;
    }
    price
        .checked_mul(Decimal::from(LAMPORTS_PER_SOL))?
        .trunc()
        .to_u64()
}
