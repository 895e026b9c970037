//! Content fingerprints used to detect seed units that changed since their last run.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::unit::SeedUnit;

/// Computes the sha256 fingerprint of a unit's run logic, its rollback logic
/// (only when the unit provides one) and its metadata.
///
/// Returns `None` when the unit does not expose its run source; such units are
/// always treated as needing a re-run.
pub fn content_hash(unit: &dyn SeedUnit) -> Option<String> {
    let run_source = unit.run_source()?;
    let metadata = match serde_json::to_value(unit.metadata()) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Could not serialize metadata for hashing: {e}");
            return None;
        }
    };

    let mut hasher = Sha256::new();
    update_section(&mut hasher, b"run", run_source.as_bytes());
    if let Some(rollback_source) = unit.rollback_source() {
        update_section(&mut hasher, b"rollback", rollback_source.as_bytes());
    }
    update_section(&mut hasher, b"metadata", canonical_json(&metadata).as_bytes());

    Some(format!("{:x}", hasher.finalize()))
}

// Length-prefixed so that moving bytes between sections changes the digest.
fn update_section(hasher: &mut Sha256, label: &[u8], content: &[u8]) {
    hasher.update(label);
    hasher.update((content.len() as u64).to_le_bytes());
    hasher.update(content);
}

/// Serializes JSON with object keys in sorted order, independent of how the
/// map was built.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => Value::String(s.clone()).to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SeedError;
    use crate::models::SeedMetadata;
    use crate::unit::SeedContext;
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixture {
        meta: SeedMetadata,
        run: Option<&'static str>,
        rollback: Option<&'static str>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                meta: SeedMetadata::new("RolesSeeder")
                    .description("Base roles")
                    .tags(["core", "auth"]),
                run: Some("insert admin, editor"),
                rollback: None,
            }
        }
    }

    #[async_trait]
    impl SeedUnit for Fixture {
        fn metadata(&self) -> &SeedMetadata {
            &self.meta
        }

        fn run_source(&self) -> Option<&str> {
            self.run
        }

        fn rollback_source(&self) -> Option<&str> {
            self.rollback
        }

        async fn run(&self, _ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
            Ok(())
        }
    }

    #[test]
    fn test_hash_is_stable() {
        let a = content_hash(&Fixture::new()).unwrap();
        let b = content_hash(&Fixture::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_tag_order_does_not_matter() {
        let mut reordered = Fixture::new();
        reordered.meta = SeedMetadata::new("RolesSeeder")
            .description("Base roles")
            .tags(["auth", "core"]);
        assert_eq!(content_hash(&Fixture::new()), content_hash(&reordered));
    }

    #[test]
    fn test_run_change_changes_hash() {
        let mut changed = Fixture::new();
        changed.run = Some("insert admin, editor, viewer");
        assert_ne!(content_hash(&Fixture::new()), content_hash(&changed));
    }

    #[test]
    fn test_metadata_change_changes_hash() {
        let mut changed = Fixture::new();
        changed.meta = changed.meta.clone().priority(5);
        assert_ne!(content_hash(&Fixture::new()), content_hash(&changed));
    }

    #[test]
    fn test_rollback_source_is_included() {
        let mut with_rollback = Fixture::new();
        with_rollback.rollback = Some("delete admin, editor");
        assert_ne!(content_hash(&Fixture::new()), content_hash(&with_rollback));
    }

    /// Same sources and metadata as [`Fixture`], but with validation and
    /// before-run hooks.
    struct Guarded(Fixture);

    #[async_trait]
    impl SeedUnit for Guarded {
        fn metadata(&self) -> &SeedMetadata {
            &self.0.meta
        }

        fn run_source(&self) -> Option<&str> {
            self.0.run
        }

        fn rollback_source(&self) -> Option<&str> {
            self.0.rollback
        }

        async fn validate(&self, ctx: &mut SeedContext<'_>) -> Result<bool, SeedError> {
            Ok(ctx.environment() != "production")
        }

        async fn before_run(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
            ctx.count_updates(false);
            Ok(())
        }

        async fn run(&self, _ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
            Ok(())
        }
    }

    #[test]
    fn test_hooks_do_not_change_hash() {
        let plain = content_hash(&Fixture::new()).unwrap();
        let guarded = content_hash(&Guarded(Fixture::new())).unwrap();
        assert_eq!(plain, guarded);
    }

    #[test]
    fn test_missing_run_source_is_unknown() {
        let mut unknown = Fixture::new();
        unknown.run = None;
        assert_eq!(content_hash(&unknown), None);
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": 1, "a": {"d": [true, null], "c": "x"}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":"x","d":[true,null]},"b":1}"#
        );
    }
}
