//! Key/value cache entities and the IP block-list check built on them.

use std::net::Ipv4Addr;

use fleet_core::{Entity, Field, FieldDef, FleetResult, Schema, Stamp, Value, ValueType};
use fleet_storage::{CacheContext, EntityCache, Lookup};

/// Free-form text value stored under a key name, such as a JSON list of
/// address blocks under `auth_bad_ip_blocks`.
pub static KEY_VALUE_CACHE: Schema = Schema::new(
    "KeyValueCache",
    1,
    &[
        FieldDef::new("text_value", ValueType::Str),
        FieldDef::new("mtime", ValueType::Timestamp).stamped(Stamp::OnWrite),
    ],
);

/// IPv4 block lists stored as JSON text in [`KEY_VALUE_CACHE`] entities.
///
/// Each list is a JSON array of `"a.b.c.d/len"` strings. Reads go through
/// the field-level cache of `text_value`.
#[derive(Debug, Clone)]
pub struct IpBlockList {
    engine: EntityCache,
    text_value: Field,
}

impl IpBlockList {
    pub fn new(ctx: &CacheContext) -> FleetResult<Self> {
        Ok(Self {
            engine: ctx.entity_cache(&KEY_VALUE_CACHE),
            text_value: KEY_VALUE_CACHE.field("text_value")?,
        })
    }

    /// Whether `ip` falls inside any block of the list stored at `key_name`.
    ///
    /// Answers false for IPv6 or malformed addresses, a missing or empty
    /// list, and any read or parse failure.
    pub async fn ip_in_list(&self, key_name: &str, ip: &str) -> bool {
        if ip.is_empty() || ip.contains(':') {
            return false;
        }
        let addr = match ip.parse::<Ipv4Addr>() {
            Ok(addr) => u32::from(addr),
            Err(e) => {
                tracing::debug!(ip, error = %e, "Not an IPv4 address");
                return false;
            }
        };

        let raw = match self.engine.get_field(key_name, &self.text_value).await {
            Ok(Lookup::Found(Value::Str(raw))) if !raw.is_empty() => raw,
            Ok(_) => return false,
            Err(e) => {
                tracing::warn!(key_name, ip, error = %e, "Failed to read IP block list");
                return false;
            }
        };
        let blocks: Vec<String> = match serde_json::from_str(&raw) {
            Ok(blocks) => blocks,
            Err(e) => {
                tracing::warn!(key_name, ip, error = %e, "Invalid IP block list");
                return false;
            }
        };

        blocks
            .iter()
            .filter_map(|block| parse_block(block))
            .any(|(network, mask)| addr & mask == network)
    }

    /// Replace the block list stored at `key_name`.
    pub async fn set_blocks(&self, key_name: &str, blocks: &[String]) -> FleetResult<Entity> {
        let raw = serde_json::to_string(blocks).map_err(|e| fleet_core::CodecError::Encode {
            kind: KEY_VALUE_CACHE.kind().to_string(),
            reason: e.to_string(),
        })?;
        self.engine.set(key_name, &self.text_value, raw).await
    }
}

/// Parse `a.b.c.d/len` (or a bare address, taken as `/32`) into a
/// `(network, mask)` pair. Host bits of the network are cleared.
fn parse_block(block: &str) -> Option<(u32, u32)> {
    let (addr, len) = match block.split_once('/') {
        Some((addr, len)) => (addr, len.trim().parse::<u32>().ok()?),
        None => (block, 32),
    };
    if len > 32 {
        tracing::debug!(block, "Ignoring IP block with invalid prefix length");
        return None;
    }
    let addr = u32::from(addr.trim().parse::<Ipv4Addr>().ok()?);
    let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
    Some((addr & mask, mask))
}
