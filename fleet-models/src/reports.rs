//! Precomputed report snapshots.
//!
//! Each snapshot is a JSON object stored in the `blob_value` of a
//! [`REPORTS_CACHE`] entity under a well-known key name.

use fleet_core::{
    CodecError, Entity, Field, FieldDef, FleetResult, Schema, Stamp, Timestamp, Value, ValueType,
};
use fleet_storage::{CacheContext, EntityCache};
use serde_json::{Map, Value as JsonValue};

pub static REPORTS_CACHE: Schema = Schema::new(
    "ReportsCache",
    1,
    &[
        FieldDef::new("text_value", ValueType::Str),
        FieldDef::new("int_value", ValueType::Int),
        FieldDef::new("blob_value", ValueType::Bytes),
        FieldDef::new("mtime", ValueType::Timestamp).stamped(Stamp::OnWrite),
    ],
);

const SUMMARY_KEY: &str = "summary";
const INSTALL_COUNTS_KEY: &str = "install_counts";
const PENDING_COUNTS_KEY: &str = "pending_counts";
const MSU_USER_SUMMARY_KEY: &str = "msu_user_summary";

/// A report body and the time it was last written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportSnapshot {
    pub data: Map<String, JsonValue>,
    pub mtime: Option<Timestamp>,
}

impl ReportSnapshot {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.mtime.is_none()
    }
}

/// Reads and writes report snapshots through the entity cache.
#[derive(Debug, Clone)]
pub struct ReportsCache {
    engine: EntityCache,
    blob_value: Field,
    mtime: Field,
}

impl ReportsCache {
    pub fn new(ctx: &CacheContext) -> FleetResult<Self> {
        Ok(Self {
            engine: ctx.entity_cache(&REPORTS_CACHE),
            blob_value: REPORTS_CACHE.field("blob_value")?,
            mtime: REPORTS_CACHE.field("mtime")?,
        })
    }

    pub async fn stats_summary(&self) -> FleetResult<ReportSnapshot> {
        Ok(self.read(SUMMARY_KEY).await?.unwrap_or_default())
    }

    pub async fn set_stats_summary(&self, data: &Map<String, JsonValue>) -> FleetResult<()> {
        self.write(SUMMARY_KEY, data).await
    }

    pub async fn install_counts(&self) -> FleetResult<ReportSnapshot> {
        Ok(self.read(INSTALL_COUNTS_KEY).await?.unwrap_or_default())
    }

    pub async fn set_install_counts(&self, data: &Map<String, JsonValue>) -> FleetResult<()> {
        self.write(INSTALL_COUNTS_KEY, data).await
    }

    pub async fn pending_counts(&self) -> FleetResult<ReportSnapshot> {
        Ok(self.read(PENDING_COUNTS_KEY).await?.unwrap_or_default())
    }

    pub async fn set_pending_counts(&self, data: &Map<String, JsonValue>) -> FleetResult<()> {
        self.write(PENDING_COUNTS_KEY, data).await
    }

    /// MSU user summary since `since`, or the in-progress copy when `tmp`.
    /// `None` when no summary has been written.
    pub async fn msu_user_summary(
        &self,
        since: Option<&str>,
        tmp: bool,
    ) -> FleetResult<Option<ReportSnapshot>> {
        self.read(&msu_key(since, tmp)).await
    }

    pub async fn set_msu_user_summary(
        &self,
        data: &Map<String, JsonValue>,
        since: Option<&str>,
        tmp: bool,
    ) -> FleetResult<()> {
        self.write(&msu_key(since, tmp), data).await
    }

    /// Remove an MSU user summary. Absent summaries are ignored.
    pub async fn delete_msu_user_summary(&self, since: Option<&str>, tmp: bool) -> FleetResult<()> {
        let key_name = msu_key(since, tmp);
        self.engine.delete(key_name.as_str()).await
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// `None` when the entity is missing or its blob is empty.
    async fn read(&self, key_name: &str) -> FleetResult<Option<ReportSnapshot>> {
        let Some(entity) = self.engine.get(key_name).await?.found() else {
            return Ok(None);
        };
        let blob = match entity.get(&self.blob_value).and_then(Value::as_bytes) {
            Some(blob) if !blob.is_empty() => blob,
            _ => return Ok(None),
        };
        let data = serde_json::from_slice(blob).map_err(|e| CodecError::Corrupt {
            reason: format!("report {key_name}: {e}"),
        })?;
        let mtime = entity.get(&self.mtime).and_then(Value::as_timestamp);
        Ok(Some(ReportSnapshot { data, mtime }))
    }

    async fn write(&self, key_name: &str, data: &Map<String, JsonValue>) -> FleetResult<()> {
        let blob = serde_json::to_vec(data).map_err(|e| CodecError::Encode {
            kind: REPORTS_CACHE.kind().to_string(),
            reason: e.to_string(),
        })?;
        let mut entity: Entity = self.engine.get_or_new(key_name).await?;
        entity.set(&self.blob_value, Value::Bytes(blob))?;
        self.engine.save(&mut entity).await
    }
}

/// Key name of an MSU user summary: `msu_user_summary[_since_{since}_][_tmp]`.
fn msu_key(since: Option<&str>, tmp: bool) -> String {
    let mut key = String::from(MSU_USER_SUMMARY_KEY);
    if let Some(since) = since {
        key.push_str("_since_");
        key.push_str(since);
        key.push('_');
    }
    if tmp {
        key.push_str("_tmp");
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_test_utils::fixtures::Harness;
    use serde_json::json;

    fn object(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            other => panic!("Expected object, got: {:?}", other),
        }
    }

    #[test]
    fn test_msu_key() {
        assert_eq!(msu_key(None, false), "msu_user_summary");
        assert_eq!(msu_key(None, true), "msu_user_summary_tmp");
        assert_eq!(msu_key(Some("7"), false), "msu_user_summary_since_7_");
        assert_eq!(msu_key(Some("7"), true), "msu_user_summary_since_7__tmp");
    }

    #[tokio::test]
    async fn test_missing_snapshots_read_empty() {
        let harness = Harness::new();
        let reports = ReportsCache::new(&harness.ctx).unwrap();

        let summary = reports.stats_summary().await.unwrap();
        assert!(summary.is_empty());
        assert!(reports.install_counts().await.unwrap().is_empty());
        assert!(reports.pending_counts().await.unwrap().is_empty());
        assert_eq!(reports.msu_user_summary(None, false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_sets_mtime() {
        let harness = Harness::new();
        let reports = ReportsCache::new(&harness.ctx).unwrap();
        let data = object(json!({"total": 12, "active": 9}));

        reports.set_stats_summary(&data).await.unwrap();
        let summary = reports.stats_summary().await.unwrap();
        assert_eq!(summary.data, data);
        assert!(summary.mtime.is_some());

        // Snapshots do not leak into each other.
        assert!(reports.install_counts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_cached_snapshot() {
        let harness = Harness::new();
        let reports = ReportsCache::new(&harness.ctx).unwrap();

        reports
            .set_pending_counts(&object(json!({"firefox": 3})))
            .await
            .unwrap();
        assert_eq!(
            reports.pending_counts().await.unwrap().data,
            object(json!({"firefox": 3}))
        );

        reports
            .set_pending_counts(&object(json!({"firefox": 1})))
            .await
            .unwrap();
        assert_eq!(
            reports.pending_counts().await.unwrap().data,
            object(json!({"firefox": 1}))
        );
        assert_eq!(harness.store.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_blob_reads_as_absent() {
        let harness = Harness::new();
        let reports = ReportsCache::new(&harness.ctx).unwrap();
        let engine = harness.engine(&REPORTS_CACHE);
        let blob_value = REPORTS_CACHE.field("blob_value").unwrap();
        engine
            .set("install_counts", &blob_value, Vec::<u8>::new())
            .await
            .unwrap();

        assert!(reports.install_counts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_msu_summary_variants_and_delete() {
        let harness = Harness::new();
        let reports = ReportsCache::new(&harness.ctx).unwrap();
        let done = object(json!({"users": 40}));
        let partial = object(json!({"users": 4}));

        reports
            .set_msu_user_summary(&done, Some("30"), false)
            .await
            .unwrap();
        reports
            .set_msu_user_summary(&partial, Some("30"), true)
            .await
            .unwrap();

        let read = reports.msu_user_summary(Some("30"), false).await.unwrap();
        assert_eq!(read.map(|s| s.data), Some(done));
        let read = reports.msu_user_summary(Some("30"), true).await.unwrap();
        assert_eq!(read.map(|s| s.data), Some(partial));
        assert_eq!(reports.msu_user_summary(None, false).await.unwrap(), None);

        reports.delete_msu_user_summary(Some("30"), true).await.unwrap();
        assert_eq!(reports.msu_user_summary(Some("30"), true).await.unwrap(), None);
        assert!(reports
            .msu_user_summary(Some("30"), false)
            .await
            .unwrap()
            .is_some());

        // Deleting again is harmless.
        reports.delete_msu_user_summary(Some("30"), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_an_error() {
        let harness = Harness::new();
        let reports = ReportsCache::new(&harness.ctx).unwrap();
        let engine = harness.engine(&REPORTS_CACHE);
        let blob_value = REPORTS_CACHE.field("blob_value").unwrap();
        engine
            .set("summary", &blob_value, b"{broken".to_vec())
            .await
            .unwrap();

        assert!(matches!(
            reports.stats_summary().await,
            Err(fleet_core::FleetError::Codec(CodecError::Corrupt { .. }))
        ));
    }
}
