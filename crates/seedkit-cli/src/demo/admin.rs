//! The administrator account for shared environments.

use seedkit::prelude::*;
use tracing::info;
use uuid::Uuid;

use super::{memberships, users};

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_ID: Uuid = Uuid::from_u128(0x5eed_0000_0000_4000_8000_0000_0000_0001);

pub struct AdminSeeder {
    meta: SeedMetadata,
}

impl Default for AdminSeeder {
    fn default() -> Self {
        Self {
            meta: SeedMetadata::new("AdminSeeder")
                .description("Administrator account")
                .environments(["staging", "production"])
                .depends_on(["RolesSeeder"])
                .priority(5)
                .tags(["core"]),
        }
    }
}

#[async_trait]
impl SeedUnit for AdminSeeder {
    fn metadata(&self) -> &SeedMetadata {
        &self.meta
    }

    fn run_source(&self) -> Option<&str> {
        Some(include_str!("admin.rs"))
    }

    async fn run(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        let defaults = row! {
            "id" => ADMIN_ID.to_string(),
            "name" => "Administrator",
            "is_admin" => true,
        };
        let (admin, created) = ctx
            .get_or_create(users::TABLE, &row! { "email" => ADMIN_EMAIL }, Some(&defaults))
            .await?;
        if created {
            info!("Created administrator {ADMIN_EMAIL}");
        }

        let user_id = admin
            .get("id")
            .cloned()
            .ok_or_else(|| SeedError::msg("administrator row has no id"))?;
        ctx.upsert(
            memberships::TABLE,
            &row! { "user_id" => user_id, "role_code" => "admin" },
            &Row::new(),
            false,
        )
        .await?;
        Ok(())
    }
}
