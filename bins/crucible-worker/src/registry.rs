// Installed-runtime discovery and lookup
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Marker file written by the package installer once a package is usable.
const INSTALLED_SENTINEL: &str = ".crucible-installed";

/// Package metadata file inside each installed package directory.
const PKG_INFO: &str = "pkg-info.json";

/// An installed language package.
///
/// The package directory contains a `run` entry script and, for compiled
/// languages, a `compile` entry script; both are invoked via `bash`.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub language: String,
    pub version: String,
    pub aliases: Vec<String>,
    pub compiled: bool,
    pub pkgdir: PathBuf,
    /// Environment handed to every child of this runtime (the package's
    /// PATH and interpreter-specific variables).
    pub env_vars: HashMap<String, String>,
}

impl Runtime {
    pub fn matches(&self, name: &str, version: &str) -> bool {
        if self.version != version {
            return false;
        }
        self.language == name || self.aliases.iter().any(|a| a == name)
    }

    pub fn compile_script(&self) -> PathBuf {
        self.pkgdir.join("compile")
    }

    pub fn run_script(&self) -> PathBuf {
        self.pkgdir.join("run")
    }
}

#[derive(Debug, Deserialize)]
struct PackageInfo {
    language: String,
    version: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    env_vars: HashMap<String, String>,
}

/// In-memory view of the installed-package tree.
#[derive(Debug, Default)]
pub struct RuntimeRegistry {
    runtimes: Vec<Runtime>,
}

impl RuntimeRegistry {
    pub fn from_runtimes(runtimes: Vec<Runtime>) -> Self {
        Self { runtimes }
    }

    /// Scan `<packages_root>/<language>/<version>/` for installed packages.
    ///
    /// Directories without the installed sentinel are skipped silently
    /// (partial installs); directories with a sentinel but broken metadata
    /// are skipped with a warning so one bad package cannot take the
    /// registry down.
    pub fn scan(packages_root: &Path) -> Result<Self> {
        let mut runtimes = Vec::new();

        if !packages_root.exists() {
            warn!(
                path = %packages_root.display(),
                "Package root does not exist, no runtimes available"
            );
            return Ok(Self::from_runtimes(runtimes));
        }

        for language_entry in fs::read_dir(packages_root)
            .context(format!("Failed to read {}", packages_root.display()))?
        {
            let language_dir = language_entry?.path();
            if !language_dir.is_dir() {
                continue;
            }

            for version_entry in fs::read_dir(&language_dir)
                .context(format!("Failed to read {}", language_dir.display()))?
            {
                let pkgdir = version_entry?.path();
                if !pkgdir.is_dir() || !pkgdir.join(INSTALLED_SENTINEL).exists() {
                    continue;
                }

                match Self::load_package(&pkgdir) {
                    Ok(runtime) => {
                        debug!(
                            language = %runtime.language,
                            version = %runtime.version,
                            compiled = runtime.compiled,
                            "Discovered runtime"
                        );
                        runtimes.push(runtime);
                    }
                    Err(e) => {
                        warn!(
                            pkgdir = %pkgdir.display(),
                            error = %e,
                            "Skipping unreadable package"
                        );
                    }
                }
            }
        }

        Ok(Self::from_runtimes(runtimes))
    }

    fn load_package(pkgdir: &Path) -> Result<Runtime> {
        let info_path = pkgdir.join(PKG_INFO);
        let content = fs::read_to_string(&info_path)
            .context(format!("Failed to read {}", info_path.display()))?;
        let info: PackageInfo = serde_json::from_str(&content)
            .context(format!("Failed to parse {}", info_path.display()))?;

        Ok(Runtime {
            language: info.language,
            version: info.version,
            aliases: info.aliases,
            compiled: pkgdir.join("compile").exists(),
            pkgdir: pkgdir.to_path_buf(),
            env_vars: info.env_vars,
        })
    }

    /// Look a runtime up by language name or alias plus exact version.
    pub fn lookup(&self, name: &str, version: &str) -> Option<&Runtime> {
        self.runtimes.iter().find(|r| r.matches(name, version))
    }

    pub fn list(&self) -> &[Runtime] {
        &self.runtimes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn install_package(
        root: &Path,
        language: &str,
        version: &str,
        aliases: &[&str],
        compiled: bool,
    ) -> PathBuf {
        let pkgdir = root.join(language).join(version);
        fs::create_dir_all(&pkgdir).unwrap();
        fs::write(pkgdir.join(INSTALLED_SENTINEL), "").unwrap();
        fs::write(
            pkgdir.join(PKG_INFO),
            serde_json::json!({
                "language": language,
                "version": version,
                "aliases": aliases,
                "env_vars": {"PATH": "/usr/bin:/bin"},
            })
            .to_string(),
        )
        .unwrap();
        fs::write(pkgdir.join("run"), "#!/usr/bin/env bash\n").unwrap();
        if compiled {
            fs::write(pkgdir.join("compile"), "#!/usr/bin/env bash\n").unwrap();
        }
        pkgdir
    }

    #[test]
    fn test_scan_discovers_installed_packages() {
        let temp = TempDir::new().unwrap();
        install_package(temp.path(), "python", "3.12.0", &["py", "python3"], false);
        install_package(temp.path(), "java", "17.0.1", &[], true);

        let registry = RuntimeRegistry::scan(temp.path()).unwrap();
        assert_eq!(registry.list().len(), 2);

        let python = registry.lookup("python", "3.12.0").unwrap();
        assert!(!python.compiled);
        assert_eq!(python.env_vars.get("PATH").unwrap(), "/usr/bin:/bin");

        let java = registry.lookup("java", "17.0.1").unwrap();
        assert!(java.compiled);
        assert!(java.compile_script().exists());
    }

    #[test]
    fn test_lookup_by_alias_and_version() {
        let temp = TempDir::new().unwrap();
        install_package(temp.path(), "python", "3.12.0", &["py"], false);

        let registry = RuntimeRegistry::scan(temp.path()).unwrap();
        assert!(registry.lookup("py", "3.12.0").is_some());
        assert!(registry.lookup("py", "3.11.0").is_none());
        assert!(registry.lookup("ruby", "3.12.0").is_none());
    }

    #[test]
    fn test_scan_skips_packages_without_sentinel() {
        let temp = TempDir::new().unwrap();
        let pkgdir = install_package(temp.path(), "python", "3.12.0", &[], false);
        fs::remove_file(pkgdir.join(INSTALLED_SENTINEL)).unwrap();

        let registry = RuntimeRegistry::scan(temp.path()).unwrap();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_scan_skips_broken_metadata() {
        let temp = TempDir::new().unwrap();
        install_package(temp.path(), "python", "3.12.0", &[], false);
        let broken = install_package(temp.path(), "ruby", "3.3.0", &[], false);
        fs::write(broken.join(PKG_INFO), "{not json").unwrap();

        let registry = RuntimeRegistry::scan(temp.path()).unwrap();
        assert_eq!(registry.list().len(), 1);
        assert!(registry.lookup("python", "3.12.0").is_some());
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let registry = RuntimeRegistry::scan(Path::new("/nonexistent/packages")).unwrap();
        assert!(registry.list().is_empty());
    }
}
