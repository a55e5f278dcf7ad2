use crate::config::default_config_toml;
use crate::error::LinuxError;
use crate::keys;
use crate::paths::WorkDir;

/// Create a fresh working directory: ssh key pair plus a commented
/// `linux.toml`. An existing directory is never touched.
pub fn run(work: &WorkDir) -> Result<(), LinuxError> {
    if work.root.exists() {
        return Err(LinuxError::AlreadyInitialized {
            path: work.root.display().to_string(),
        });
    }

    std::fs::create_dir_all(&work.root).map_err(|e| LinuxError::Io {
        context: format!("creating {}", work.root.display()),
        source: e,
    })?;

    keys::generate_keypair(work)?;

    let config_path = work.config_path();
    std::fs::write(&config_path, default_config_toml()).map_err(|e| LinuxError::Io {
        context: format!("writing {}", config_path.display()),
        source: e,
    })?;

    tracing::info!(path = %work.root.display(), "initialized working directory");
    Ok(())
}
