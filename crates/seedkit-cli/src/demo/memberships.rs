//! Role assignments for the demo users.

use seedkit::prelude::*;
use serde_json::Value;
use tracing::info;

use super::{roles, users};

pub const TABLE: &str = "demo_user_roles";

/// Roles handed out round-robin to non-admin users.
const ROTATION: [&str; 3] = ["editor", "viewer", "viewer"];

pub struct MembershipsSeeder {
    meta: SeedMetadata,
}

impl Default for MembershipsSeeder {
    fn default() -> Self {
        Self {
            meta: SeedMetadata::new("MembershipsSeeder")
                .description("Assigns roles to demo users")
                .environments(["development", "testing"])
                .depends_on(["RolesSeeder", "UsersSeeder"])
                .priority(30)
                .can_rollback(true)
                .tags(["demo"]),
        }
    }
}

#[async_trait]
impl SeedUnit for MembershipsSeeder {
    fn metadata(&self) -> &SeedMetadata {
        &self.meta
    }

    fn run_source(&self) -> Option<&str> {
        Some(include_str!("memberships.rs"))
    }

    async fn validate(&self, ctx: &mut SeedContext<'_>) -> Result<bool, SeedError> {
        let roles = ctx.select(roles::TABLE, &Row::new()).await?;
        Ok(!roles.is_empty())
    }

    async fn run(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        let mut members = ctx
            .select(users::TABLE, &row! { "is_admin" => false })
            .await?;
        members.sort_by(|a, b| email_of(a).cmp(email_of(b)));

        let rows: Vec<Row> = members
            .iter()
            .filter_map(|user| user.get("id").cloned())
            .enumerate()
            .map(|(i, user_id)| row! { "user_id" => user_id, "role_code" => ROTATION[i % ROTATION.len()] })
            .collect();

        info!("Assigning roles to {} users...", rows.len());
        ctx.bulk_upsert(TABLE, &rows, &["user_id", "role_code"], None)
            .await?;
        Ok(())
    }

    async fn rollback(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        for code in ROTATION {
            ctx.delete(TABLE, &row! { "role_code" => code }).await?;
        }
        Ok(())
    }
}

fn email_of(row: &Row) -> &str {
    row.get("email").and_then(Value::as_str).unwrap_or_default()
}
