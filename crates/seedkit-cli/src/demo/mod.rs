//! Demo seeders for the users/roles schema in `migrations/`.

pub mod admin;
pub mod memberships;
pub mod roles;
pub mod users;

use seedkit::{ManagerError, Registry};

pub use admin::AdminSeeder;
pub use memberships::MembershipsSeeder;
pub use roles::RolesSeeder;
pub use users::UsersSeeder;

/// Registry holding every demo seeder.
pub fn registry() -> Result<Registry, ManagerError> {
    let mut registry = Registry::new();
    registry.register(RolesSeeder::default())?;
    registry.register(UsersSeeder::default())?;
    registry.register(MembershipsSeeder::default())?;
    registry.register(AdminSeeder::default())?;
    Ok(registry)
}
