use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::ManagerError;
use crate::unit::SeedUnit;

/// Name-keyed collection of seed units. Iteration is in name order.
#[derive(Default, Clone)]
pub struct Registry {
    units: BTreeMap<String, Arc<dyn SeedUnit>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `unit`; a second unit with the same name is rejected.
    pub fn register<U: SeedUnit + 'static>(&mut self, unit: U) -> Result<(), ManagerError> {
        self.register_arc(Arc::new(unit))
    }

    pub fn register_arc(&mut self, unit: Arc<dyn SeedUnit>) -> Result<(), ManagerError> {
        let name = unit.metadata().name.clone();
        if self.units.contains_key(&name) {
            return Err(ManagerError::DuplicateUnit(name));
        }
        self.units.insert(name, unit);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn SeedUnit>> {
        self.units.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SeedUnit>> {
        self.units.get(name)
    }

    pub fn get_all(&self) -> impl Iterator<Item = &Arc<dyn SeedUnit>> {
        self.units.values()
    }

    /// Units declaring `environment` or `"all"`.
    pub fn get_by_environment<'a>(
        &'a self,
        environment: &'a str,
    ) -> impl Iterator<Item = &'a Arc<dyn SeedUnit>> + 'a {
        self.units
            .values()
            .filter(move |unit| unit.metadata().runs_in(environment))
    }

    pub fn get_by_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Arc<dyn SeedUnit>> + 'a {
        self.units
            .values()
            .filter(move |unit| unit.metadata().tags.contains(tag))
    }

    pub fn names(&self) -> Vec<String> {
        self.units.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("units", &self.units.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SeedError;
    use crate::models::SeedMetadata;
    use crate::unit::SeedContext;
    use async_trait::async_trait;

    struct Noop(SeedMetadata);

    #[async_trait]
    impl SeedUnit for Noop {
        fn metadata(&self) -> &SeedMetadata {
            &self.0
        }

        async fn run(&self, _ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
            Ok(())
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(Noop(SeedMetadata::new("Users").tags(["core"])))
            .unwrap();
        registry
            .register(Noop(
                SeedMetadata::new("Admins").environments(["production"]),
            ))
            .unwrap();
        registry
            .register(Noop(
                SeedMetadata::new("Demo")
                    .environments(["development", "testing"])
                    .tags(["demo"]),
            ))
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = registry();
        let err = registry
            .register(Noop(SeedMetadata::new("Users")))
            .unwrap_err();
        assert!(matches!(err, ManagerError::DuplicateUnit(name) if name == "Users"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_lookup_by_environment_and_tag() {
        let registry = registry();

        let dev: Vec<_> = registry
            .get_by_environment("development")
            .map(|u| u.metadata().name.clone())
            .collect();
        assert_eq!(dev, vec!["Demo", "Users"]);

        let prod: Vec<_> = registry
            .get_by_environment("production")
            .map(|u| u.metadata().name.clone())
            .collect();
        assert_eq!(prod, vec!["Admins", "Users"]);

        assert_eq!(registry.get_by_tag("demo").count(), 1);
        assert_eq!(registry.names(), vec!["Admins", "Demo", "Users"]);
    }

    #[test]
    fn test_unregister() {
        let mut registry = registry();
        assert!(registry.unregister("Demo").is_some());
        assert!(!registry.contains("Demo"));
        assert!(registry.unregister("Demo").is_none());
        assert!(registry.get("Users").is_some());
    }
}
