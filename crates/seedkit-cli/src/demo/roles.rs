//! Baseline roles, needed in every environment.

use seedkit::prelude::*;
use tracing::info;

pub const TABLE: &str = "demo_roles";

/// `(code, label, rank)`
pub const ROLES: [(&str, &str, i64); 4] = [
    ("admin", "Administrator", 100),
    ("editor", "Editor", 50),
    ("viewer", "Viewer", 10),
    ("guest", "Guest", 0),
];

pub struct RolesSeeder {
    meta: SeedMetadata,
}

impl Default for RolesSeeder {
    fn default() -> Self {
        Self {
            meta: SeedMetadata::new("RolesSeeder")
                .description("Baseline access roles")
                .priority(10)
                .can_rollback(true)
                .tags(["core"]),
        }
    }
}

#[async_trait]
impl SeedUnit for RolesSeeder {
    fn metadata(&self) -> &SeedMetadata {
        &self.meta
    }

    fn run_source(&self) -> Option<&str> {
        Some(include_str!("roles.rs"))
    }

    async fn run(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        let rows: Vec<Row> = ROLES
            .iter()
            .map(|(code, label, rank)| row! { "code" => *code, "label" => *label, "rank" => *rank })
            .collect();

        info!("Seeding {} roles...", rows.len());
        let counts = ctx.bulk_upsert(TABLE, &rows, &["code"], None).await?;
        info!(
            "Roles: {} created, {} updated, {} unchanged",
            counts.created, counts.updated, counts.unchanged
        );
        Ok(())
    }

    async fn rollback(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        for (code, _, _) in ROLES {
            ctx.delete(TABLE, &row! { "code" => code }).await?;
        }
        Ok(())
    }
}
