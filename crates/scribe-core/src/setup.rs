//! Project preparation and module installation.
//!
//! Project modules live at `<project>/modules/<name>.sc`. A module registry
//! is a flat directory of `<name>.sc` files modules get installed from.

use std::fs;
use std::path::{Path, PathBuf};

use crate::codegen::imports::imported_modules;
use crate::error::{Error, Result};
use crate::script::builtins::BUILTIN_MODULES;

pub const MODULES_DIR: &str = "modules";
pub const MODULE_EXTENSION: &str = "sc";

/// Environment variable naming the module registry directory.
pub const REGISTRY_ENV: &str = "SCRIBE_MODULE_REGISTRY";

/// Whether `name` may name a project module.
pub fn is_module_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// File a project module is loaded from.
pub fn module_path(project_dir: &Path, name: &str) -> Option<PathBuf> {
    is_module_name(name).then(|| {
        project_dir
            .join(MODULES_DIR)
            .join(format!("{}.{}", name, MODULE_EXTENSION))
    })
}

/// Makes sure a runnable project directory exists.
pub trait ProjectPreparer {
    fn prepare(&self, project_dir: &Path) -> Result<()>;
}

/// Creates the project directory and its `modules/` directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryPreparer;

impl ProjectPreparer for DirectoryPreparer {
    fn prepare(&self, project_dir: &Path) -> Result<()> {
        fs::create_dir_all(project_dir.join(MODULES_DIR)).map_err(|e| {
            Error::ProjectSetup(format!("cannot create {}: {}", project_dir.display(), e))
        })
    }
}

/// Makes the modules a cell imports available in the project.
pub trait ModuleInstaller {
    fn ensure(&self, cell_text: &str, project_dir: &Path) -> Result<()>;
}

/// Resolves imports against builtin modules and the project, copying
/// missing modules from a registry directory when one is configured.
#[derive(Debug, Clone, Default)]
pub struct ProjectModuleInstaller {
    registry: Option<PathBuf>,
}

impl ProjectModuleInstaller {
    pub fn new(registry: Option<PathBuf>) -> Self {
        Self { registry }
    }

    /// Installer using the registry named by `SCRIBE_MODULE_REGISTRY`.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os(REGISTRY_ENV).map(PathBuf::from))
    }

    fn install(&self, name: &str, target: &Path) -> Result<bool> {
        let Some(registry) = &self.registry else {
            return Ok(false);
        };
        let source = registry.join(format!("{}.{}", name, MODULE_EXTENSION));
        if !source.is_file() {
            return Ok(false);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, target)?;
        tracing::info!("Installed module {} from {}", name, registry.display());
        Ok(true)
    }
}

impl ModuleInstaller for ProjectModuleInstaller {
    fn ensure(&self, cell_text: &str, project_dir: &Path) -> Result<()> {
        let mut missing = Vec::new();
        for name in imported_modules(cell_text) {
            if BUILTIN_MODULES.contains(&name.as_str()) {
                continue;
            }
            let Some(path) = module_path(project_dir, &name) else {
                missing.push(name);
                continue;
            };
            if path.is_file() {
                continue;
            }
            match self.install(&name, &path) {
                Ok(true) => {}
                Ok(false) => missing.push(name),
                Err(e) => {
                    return Err(Error::ModuleInstall(format!("{}: {}", name, e)));
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::ModuleInstall(format!(
                "cannot find module {}",
                missing
                    .iter()
                    .map(|m| format!("'{}'", m))
                    .collect::<Vec<_>>()
                    .join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_module_names() {
        assert!(is_module_name("my_lib-2"));
        assert!(!is_module_name("../etc/passwd"));
        assert!(!is_module_name(""));
    }

    #[test]
    fn test_prepare_creates_modules_dir() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        DirectoryPreparer.prepare(&project).unwrap();
        assert!(project.join(MODULES_DIR).is_dir());
    }

    #[test]
    fn test_builtin_and_project_modules_resolve() {
        let temp = TempDir::new().unwrap();
        DirectoryPreparer.prepare(temp.path()).unwrap();
        fs::write(module_path(temp.path(), "util").unwrap(), "exports.x = 1").unwrap();
        let installer = ProjectModuleInstaller::default();
        installer
            .ensure("import m from \"math\"\nimport u from \"util\"", temp.path())
            .unwrap();
    }

    #[test]
    fn test_missing_module_is_reported() {
        let temp = TempDir::new().unwrap();
        let err = ProjectModuleInstaller::default()
            .ensure("import nope from \"nope\"", temp.path())
            .unwrap_err();
        assert!(matches!(err, Error::ModuleInstall(ref m) if m.contains("'nope'")));
    }

    #[test]
    fn test_installs_from_registry() {
        let project = TempDir::new().unwrap();
        let registry = TempDir::new().unwrap();
        fs::write(registry.path().join("greet.sc"), "exports.hi = \"hi\"").unwrap();
        let installer = ProjectModuleInstaller::new(Some(registry.path().to_path_buf()));
        installer.ensure("import g from \"greet\"", project.path()).unwrap();
        assert!(module_path(project.path(), "greet").unwrap().is_file());
    }
}
