use super::SqlScript;
use crate::error::{Result, SfDriftError};
use std::path::{Path, PathBuf};

pub struct ScriptLoader;

impl ScriptLoader {
    pub fn load_file(path: impl AsRef<Path>) -> Result<SqlScript> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SfDriftError::ScriptNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(SqlScript::new(path.display().to_string(), text))
    }

    /// Every `*.sql` file below `path`, in lexical path order so numbered
    /// files (`01_roles.sql`, `02_tables.sql`) run in sequence.
    pub fn discover(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let path = path.as_ref();
        let pattern = format!("{}/**/*.sql", path.display());
        let mut files: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| SfDriftError::Pattern(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Expands directories into their `*.sql` files and keeps plain paths
    /// as given, including ones that do not exist yet.
    pub fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut expanded = Vec::with_capacity(paths.len());
        for path in paths {
            if path.is_dir() {
                expanded.extend(Self::discover(path)?);
            } else {
                expanded.push(path.clone());
            }
        }
        Ok(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_discover_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("02_tables.sql"), "CREATE TABLE t (id INT);").unwrap();
        fs::write(dir.path().join("01_roles.sql"), "CREATE ROLE r;").unwrap();
        fs::write(dir.path().join("notes.txt"), "not sql").unwrap();
        fs::create_dir(dir.path().join("procs")).unwrap();
        fs::write(dir.path().join("procs/sp_a.sql"), "CREATE PROCEDURE a() AS $$ $$;").unwrap();

        let files = ScriptLoader::discover(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| {
                p.file_name()
                    .unwrap()
                    .to_string_lossy()
                    .to_string()
            })
            .collect();

        assert_eq!(names, vec!["01_roles.sql", "02_tables.sql", "sp_a.sql"]);
        let first = ScriptLoader::load_file(&files[0]).unwrap();
        assert_eq!(first.text(), "CREATE ROLE r;");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScriptLoader::load_file(dir.path().join("missing.sql")).unwrap_err();
        assert!(matches!(err, SfDriftError::ScriptNotFound(_)));
    }

    #[test]
    fn test_expand_paths_keeps_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.sql"), "SELECT 1;").unwrap();
        let missing = dir.path().join("later.sql");

        let expanded =
            ScriptLoader::expand_paths(&[dir.path().to_path_buf(), missing.clone()]).unwrap();

        assert_eq!(expanded, vec![dir.path().join("a.sql"), missing]);
    }
}
