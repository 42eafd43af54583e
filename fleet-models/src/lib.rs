//! Fleet Models - Entities and Derived Caches
//!
//! Entity schemas for the fleet backend and the derived caches layered on
//! the entity cache engine: IP block lists, report snapshots, the tag-name
//! index, the lost/stolen UUID set and package alias resolution.

pub mod computer;
pub mod key_value;
pub mod lost_stolen;
pub mod package_alias;
pub mod reports;
pub mod tags;

pub use computer::{ComputerRegistry, COMPUTER};
pub use key_value::{IpBlockList, KEY_VALUE_CACHE};
pub use lost_stolen::{LostStolenRegistry, COMPUTER_LOST_STOLEN, LOST_STOLEN_UUIDS};
pub use package_alias::{PackageAliases, PACKAGE_ALIAS};
pub use reports::{ReportSnapshot, ReportsCache, REPORTS_CACHE};
pub use tags::{TagIndex, ALL_TAGS, TAG};

use fleet_core::{Entity, FilterExpr, FleetResult};
use fleet_storage::{Cursor, EntityCache};

/// Every entity matching `filters`, read page by page straight from the
/// store. Never cached.
pub(crate) async fn scan(
    engine: &EntityCache,
    filters: &[FilterExpr],
) -> FleetResult<Vec<Entity>> {
    let page_size = engine.context().config().page_size.max(1);
    let mut entities = Vec::new();
    let mut cursor: Option<Cursor> = None;
    loop {
        let page = engine.query_page(filters, page_size, cursor.as_ref()).await?;
        entities.extend(page.entities);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(entities),
        }
    }
}
