//! Fake users for local development and test databases.

use fake::faker::internet::en::FreeEmailProvider;
use fake::{Fake, faker::name::en::Name};
use rand::{Rng, SeedableRng, rngs::StdRng};
use seedkit::prelude::*;
use tracing::info;
use uuid::Uuid;

pub const TABLE: &str = "demo_users";

/// Generated user data ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl GeneratedUser {
    pub fn to_row(&self) -> Row {
        row! {
            "id" => self.id.to_string(),
            "name" => self.name.as_str(),
            "email" => self.email.as_str(),
            "is_admin" => false,
        }
    }
}

/// Generates `count` users. The same `seed` always yields the same users,
/// ids included, so re-runs upsert instead of duplicating.
pub fn generate_users(count: usize, seed: u64) -> Vec<GeneratedUser> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let id = uuid::Builder::from_random_bytes(rng.r#gen()).into_uuid();
            let name: String = Name().fake_with_rng(&mut rng);
            let provider: String = FreeEmailProvider().fake_with_rng(&mut rng);
            let email = format!("{}.{i}@{provider}", local_part(&name));
            GeneratedUser { id, name, email }
        })
        .collect()
}

fn local_part(name: &str) -> String {
    name.split_whitespace()
        .map(|part| {
            part.chars()
                .filter(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

pub struct UsersSeeder {
    meta: SeedMetadata,
    count: usize,
    seed: u64,
}

impl Default for UsersSeeder {
    fn default() -> Self {
        Self {
            meta: SeedMetadata::new("UsersSeeder")
                .description("Fake users with stable ids")
                .environments(["development", "testing"])
                .priority(20)
                .batch_size(10)
                .can_rollback(true)
                .tags(["demo"]),
            count: 25,
            seed: 12345,
        }
    }
}

impl UsersSeeder {
    pub fn users(&self) -> Vec<GeneratedUser> {
        generate_users(self.count, self.seed)
    }
}

#[async_trait]
impl SeedUnit for UsersSeeder {
    fn metadata(&self) -> &SeedMetadata {
        &self.meta
    }

    fn run_source(&self) -> Option<&str> {
        Some(include_str!("users.rs"))
    }

    async fn run(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        let rows: Vec<Row> = self.users().iter().map(GeneratedUser::to_row).collect();

        info!("Seeding {} users...", rows.len());
        let counts = ctx
            .bulk_upsert(TABLE, &rows, &["email"], Some(&["name"]))
            .await?;
        info!(
            "Users: {} created, {} updated, {} unchanged",
            counts.created, counts.updated, counts.unchanged
        );
        Ok(())
    }

    async fn rollback(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        for user in self.users() {
            ctx.delete(TABLE, &row! { "email" => user.email }).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        let first = generate_users(5, 42);
        let second = generate_users(5, 42);
        assert_eq!(first, second);
        assert_ne!(first, generate_users(5, 43));
    }

    #[test]
    fn test_emails_are_unique() {
        let users = generate_users(50, 7);
        let mut emails: Vec<_> = users.iter().map(|u| u.email.as_str()).collect();
        emails.sort_unstable();
        emails.dedup();
        assert_eq!(emails.len(), 50);
    }

    #[test]
    fn test_local_part() {
        assert_eq!(local_part("Mary-Jane O'Neil"), "maryjane.oneil");
        assert_eq!(local_part("Dr. Ann Lee"), "dr.ann.lee");
    }
}
