use crate::prelude::*;
use proctree::Config;
use std::fs;
use std::path::Path;

/// Config file names in priority order
const CONFIG_FILENAMES: &[&str] = &[
    "proctree.yaml",
    "proctree.yml",
    ".proctree.yaml",
    ".proctree.yml",
];

/// Discover and load the tree configuration file
///
/// If `config_path_override` is provided, load from that path only (error if not found).
/// Otherwise, try [`CONFIG_FILENAMES`] in `current_dir`, in order.
///
/// Returns `Ok(None)` when no config file was found.
pub fn discover_and_load(
    config_path_override: Option<&Path>,
    current_dir: &Path,
) -> Result<Option<Config>> {
    if let Some(config_path) = config_path_override {
        let config = load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
        return Ok(Some(config));
    }

    for filename in CONFIG_FILENAMES {
        let candidate_path = current_dir.join(filename);
        if candidate_path.exists() {
            debug!("Found config file at {}", candidate_path.display());
            return load_from_path(&candidate_path).map(Some);
        }
    }

    Ok(None)
}

fn load_from_path(path: &Path) -> Result<Config> {
    let config_content = fs::read(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;

    // An empty file is a valid, default configuration
    if config_content.iter().all(u8::is_ascii_whitespace) {
        return Ok(Config::default());
    }

    let config: Config = serde_yaml::from_slice(&config_content)
        .with_context(|| format!("Failed to parse tree config at {}", path.display()))?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if let Some(pid) = config.root_pids().iter().find(|&&pid| pid <= 0) {
        bail!("Invalid root pid {pid}: pids must be positive");
    }
    if config.include_root_ancestors() && !config.has_fixed_roots() {
        warn!("include-root-ancestors has no effect without root-pids");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    #[test]
    fn test_no_config_found() {
        let dir = TempDir::new().unwrap();
        assert_eq!(discover_and_load(None, dir.path()).unwrap(), None);
    }

    #[test]
    fn test_discover_config() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "proctree.yaml",
            "include-kernel-threads: true\nroot-pids: [1, 42]\n",
        );

        let config = discover_and_load(None, dir.path()).unwrap().unwrap();
        assert!(config.include_kernel_threads());
        assert_eq!(config.root_pids(), &[1, 42]);
    }

    #[test]
    fn test_discovery_priority() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".proctree.yml", "root-pids: [2]\n");
        write(&dir, "proctree.yml", "root-pids: [1]\n");

        let config = discover_and_load(None, dir.path()).unwrap().unwrap();
        assert_eq!(config.root_pids(), &[1]);
    }

    #[test]
    fn test_explicit_path_wins() {
        let dir = TempDir::new().unwrap();
        write(&dir, "proctree.yaml", "root-pids: [1]\n");
        write(&dir, "custom.yaml", "include-root-ancestors: true\nroot-pids: [7]\n");

        let config = discover_and_load(Some(&dir.path().join("custom.yaml")), dir.path())
            .unwrap()
            .unwrap();
        assert!(config.include_root_ancestors());
        assert_eq!(config.root_pids(), &[7]);
    }

    #[test]
    fn test_explicit_path_missing() {
        let dir = TempDir::new().unwrap();
        let err = discover_and_load(Some(&dir.path().join("missing.yaml")), dir.path())
            .unwrap_err();
        assert!(err.to_string().starts_with("Failed to load config from"));
    }

    #[test]
    fn test_empty_file_is_default() {
        let dir = TempDir::new().unwrap();
        write(&dir, "proctree.yaml", "\n");

        let config = discover_and_load(None, dir.path()).unwrap().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_reject_unknown_keys() {
        let dir = TempDir::new().unwrap();
        write(&dir, "proctree.yaml", "roots: [1]\n");
        assert!(discover_and_load(None, dir.path()).is_err());
    }

    #[test]
    fn test_reject_non_positive_root() {
        let dir = TempDir::new().unwrap();
        write(&dir, "proctree.yaml", "root-pids: [0]\n");

        let err = discover_and_load(None, dir.path()).unwrap_err();
        assert_eq!(err.to_string(), "Invalid root pid 0: pids must be positive");
    }
}
