//! Directory-based migration loading

use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, RlsError};
use crate::migration::Migration;

/// Migration files stored as `NNNN_name.json` in a directory
#[derive(Debug, Clone)]
pub struct MigrationDirectory {
    path: PathBuf,
}

impl MigrationDirectory {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every migration, sorted by number.
    ///
    /// A missing directory holds no migrations.
    pub fn load(&self) -> Result<Vec<Migration>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        if !self.path.is_dir() {
            return Err(RlsError::migration(format!(
                "Invalid directory path: {}",
                self.path.display()
            )));
        }

        let mut migrations = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let file_path = entry?.path();

            if !file_path.is_file() || file_path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let stem = match file_path.file_stem() {
                Some(stem) => stem.to_string_lossy().to_string(),
                None => continue,
            };

            // Extract number and name from the filename (0001_name.json)
            let (number, _) = extract_number_name(&stem).ok_or_else(|| {
                RlsError::migration(format!(
                    "Invalid migration file name: {}",
                    file_path.display()
                ))
            })?;

            let content = fs::read_to_string(&file_path)?;
            let migration: Migration = serde_json::from_str(&content)?;
            if migration.name != stem {
                return Err(RlsError::migration(format!(
                    "Migration {} is named '{}' but stored in {}",
                    stem,
                    migration.name,
                    file_path.display()
                )));
            }

            migrations.push((number, migration));
        }

        // Sort migrations by number
        migrations.sort_by_key(|(number, _)| *number);
        for pair in migrations.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(RlsError::migration(format!(
                    "Conflicting migrations {} and {}",
                    pair[0].1.name, pair[1].1.name
                )));
            }
        }

        debug!(
            "Loaded {} migrations from {}",
            migrations.len(),
            self.path.display()
        );
        Ok(migrations.into_iter().map(|(_, m)| m).collect())
    }

    /// Number the next migration will get
    pub fn next_number(&self) -> Result<u32> {
        let max = self
            .load()?
            .iter()
            .filter_map(|m| migration_number(&m.name))
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    /// Write a migration file, creating the directory if needed
    pub fn write(&self, migration: &Migration) -> Result<PathBuf> {
        if extract_number_name(&migration.name).is_none() {
            return Err(RlsError::migration(format!(
                "Migration name '{}' does not start with a number",
                migration.name
            )));
        }
        fs::create_dir_all(&self.path)?;
        let file_path = self.path.join(format!("{}.json", migration.name));
        let content = serde_json::to_string_pretty(migration)?;
        fs::write(&file_path, content + "\n")?;
        Ok(file_path)
    }
}

/// Number prefix of a migration name, e.g. `1` for `0001_initial`
pub fn migration_number(name: &str) -> Option<u32> {
    extract_number_name(name).map(|(number, _)| number)
}

/// Extract number and name from a migration file stem
fn extract_number_name(stem: &str) -> Option<(u32, String)> {
    // Format: 0001_name
    let (number_str, name) = stem.split_once('_')?;

    if number_str.is_empty() || !number_str.chars().all(|c| c.is_ascii_digit()) || name.is_empty() {
        return None;
    }

    let number = number_str.parse::<u32>().ok()?;
    Some((number, name.to_string()))
}
