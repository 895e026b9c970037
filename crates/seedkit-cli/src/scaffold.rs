//! Project scaffolding: `seedkit init` and `seedkit make`.

use std::fs;
use std::path::{Path, PathBuf};

use seedkit::SeederConfig;
use seedkit::config::CONFIG_FILE_NAMES;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ScaffoldError {
    #[error("Invalid seeder name: {0:?}")]
    InvalidName(String),

    #[error("File already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Options of `seedkit make`.
#[derive(Debug, Clone, Default)]
pub struct MakeRequest {
    pub name: String,
    pub environments: Vec<String>,
    pub dependencies: Vec<String>,
    pub priority: Option<i32>,
    pub rollback: bool,
}

/// Normalizes `users`, `user_roles` or `UserRolesSeeder` to
/// `UserRolesSeeder`.
pub fn seeder_name(raw: &str) -> Result<String, ScaffoldError> {
    let words: Vec<&str> = raw
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .collect();
    let valid = !words.is_empty()
        && words
            .iter()
            .all(|w| w.chars().all(|c| c.is_ascii_alphanumeric()))
        && raw
            .chars()
            .find(|c| c.is_ascii_alphanumeric())
            .is_some_and(|c| c.is_ascii_alphabetic());
    if !valid {
        return Err(ScaffoldError::InvalidName(raw.to_string()));
    }

    let mut name: String = words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            chars
                .next()
                .map(|first| first.to_ascii_uppercase().to_string() + chars.as_str())
                .unwrap_or_default()
        })
        .collect();
    if !name.ends_with("Seeder") {
        name.push_str("Seeder");
    }
    Ok(name)
}

/// `UserRolesSeeder` -> `user_roles_seeder`
fn file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len() + 4);
    for (i, c) in name.char_indices() {
        if c.is_ascii_uppercase() && i > 0 {
            stem.push('_');
        }
        stem.push(c.to_ascii_lowercase());
    }
    stem
}

fn quoted_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("{v:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn render(name: &str, request: &MakeRequest) -> String {
    let mut builder = format!("SeedMetadata::new({name:?})");
    if !request.environments.is_empty() {
        builder.push_str(&format!(
            "\n                .environments([{}])",
            quoted_list(&request.environments)
        ));
    }
    if !request.dependencies.is_empty() {
        builder.push_str(&format!(
            "\n                .depends_on([{}])",
            quoted_list(&request.dependencies)
        ));
    }
    if let Some(priority) = request.priority {
        builder.push_str(&format!("\n                .priority({priority})"));
    }
    if request.rollback {
        builder.push_str("\n                .can_rollback(true)");
    }

    let rollback = if request.rollback {
        "

    async fn rollback(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {
        let _ = ctx;
        Ok(())
    }"
    } else {
        ""
    };

    format!(
        r#"use seedkit::prelude::*;

pub struct {name} {{
    meta: SeedMetadata,
}}

impl Default for {name} {{
    fn default() -> Self {{
        Self {{
            meta: {builder},
        }}
    }}
}}

#[async_trait]
impl SeedUnit for {name} {{
    fn metadata(&self) -> &SeedMetadata {{
        &self.meta
    }}

    fn run_source(&self) -> Option<&str> {{
        Some(include_str!("{stem}.rs"))
    }}

    async fn run(&self, ctx: &mut SeedContext<'_>) -> Result<(), SeedError> {{
        let _ = ctx;
        Ok(())
    }}{rollback}
}}
"#,
        stem = file_stem(name),
    )
}

/// Writes the skeleton into `dir`, refusing to overwrite.
pub fn make(dir: &Path, request: &MakeRequest) -> Result<PathBuf, ScaffoldError> {
    let name = seeder_name(&request.name)?;
    let path = dir.join(format!("{}.rs", file_stem(&name)));
    if path.exists() {
        return Err(ScaffoldError::AlreadyExists(path));
    }

    let io = |source| ScaffoldError::Io {
        path: path.clone(),
        source,
    };
    fs::create_dir_all(dir).map_err(io)?;
    fs::write(&path, render(&name, request)).map_err(io)?;

    info!("Created seeder {name} at {}", path.display());
    Ok(path)
}

/// Files created by [`init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub config_file: PathBuf,
    pub seeders_dir: PathBuf,
}

/// Bootstraps a project in `dir`: writes `config` as `seeder.config.json` and
/// creates its seeders directory. An existing config file is never replaced.
pub fn init(dir: &Path, config: &SeederConfig) -> Result<InitReport, ScaffoldError> {
    let config_file = dir.join(CONFIG_FILE_NAMES[0]);
    if config_file.exists() {
        return Err(ScaffoldError::AlreadyExists(config_file));
    }
    let seeders_dir = dir.join(&config.seeders_path);

    let mut text = serde_json::to_string_pretty(config)?;
    text.push('\n');

    fs::create_dir_all(&seeders_dir).map_err(|source| ScaffoldError::Io {
        path: seeders_dir.clone(),
        source,
    })?;
    fs::write(&config_file, text).map_err(|source| ScaffoldError::Io {
        path: config_file.clone(),
        source,
    })?;

    info!("Initialized seeder project in {}", dir.display());
    Ok(InitReport {
        config_file,
        seeders_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_seeder_name_normalization() {
        assert_eq!(seeder_name("users").unwrap(), "UsersSeeder");
        assert_eq!(seeder_name("user_roles").unwrap(), "UserRolesSeeder");
        assert_eq!(seeder_name("UserRolesSeeder").unwrap(), "UserRolesSeeder");
        assert!(seeder_name("").is_err());
        assert!(seeder_name("9lives").is_err());
        assert!(seeder_name("bad.name").is_err());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("UserRolesSeeder"), "user_roles_seeder");
    }

    #[test]
    fn test_render_includes_only_requested_options() {
        let plain = render("TagsSeeder", &MakeRequest::default());
        assert!(plain.contains("SeedMetadata::new(\"TagsSeeder\")"));
        assert!(!plain.contains("depends_on"));
        assert!(!plain.contains("async fn rollback"));

        let full = render(
            "TagsSeeder",
            &MakeRequest {
                name: "tags".into(),
                environments: vec!["development".into()],
                dependencies: vec!["UsersSeeder".into()],
                priority: Some(40),
                rollback: true,
            },
        );
        assert!(full.contains(".environments([\"development\"])"));
        assert!(full.contains(".depends_on([\"UsersSeeder\"])"));
        assert!(full.contains(".priority(40)"));
        assert!(full.contains(".can_rollback(true)"));
        assert!(full.contains("async fn rollback"));
        assert!(full.contains("include_str!(\"tags_seeder.rs\")"));
    }

    #[test]
    fn test_init_writes_default_config_once() {
        let dir = TempDir::new().unwrap();
        let config = SeederConfig::default();

        let report = init(dir.path(), &config).unwrap();
        assert_eq!(report.config_file, dir.path().join("seeder.config.json"));
        assert!(report.seeders_dir.is_dir());
        assert_eq!(SeederConfig::from_file(&report.config_file).unwrap(), config);

        let err = init(dir.path(), &config).unwrap_err();
        assert!(matches!(err, ScaffoldError::AlreadyExists(p) if p == report.config_file));
    }

    #[test]
    fn test_init_uses_configured_seeders_path() {
        let dir = TempDir::new().unwrap();
        let config = SeederConfig {
            seeders_path: PathBuf::from("db/seeders"),
            ..Default::default()
        };

        let report = init(dir.path(), &config).unwrap();
        assert_eq!(report.seeders_dir, dir.path().join("db/seeders"));
        assert!(report.seeders_dir.is_dir());
        assert!(seedkit::config::discover(dir.path()).is_some());
    }

    #[test]
    fn test_make_writes_once() {
        let dir = TempDir::new().unwrap();
        let seeders = dir.path().join("seeders");
        let request = MakeRequest {
            name: "products".into(),
            ..Default::default()
        };

        let path = make(&seeders, &request).unwrap();
        assert_eq!(path, seeders.join("products_seeder.rs"));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("pub struct ProductsSeeder"));

        let err = make(&seeders, &request).unwrap_err();
        assert!(matches!(err, ScaffoldError::AlreadyExists(p) if p == path));
    }
}
