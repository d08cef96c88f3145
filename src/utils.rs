//! Identifier generation

use bech32::Bech32m;
use uuid7::uuid7;

pub const REQUEST_HRP: &str = "req_";
pub const ITEM_HRP: &str = "item_";
pub const ALLOCATION_HRP: &str = "alloc_";
pub const GROUPED_ORDER_HRP: &str = "grp_";
pub const ORDER_LINE_HRP: &str = "poline_";

// time-ordered uuid, bech32 encoded under a human readable prefix
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}
