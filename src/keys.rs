use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};

use crate::error::LinuxError;
use crate::paths::WorkDir;

const KEY_COMMENT: &str = "root@localhost";

/// Generate an ed25519 key pair into the working directory. The private key
/// is created with mode 0600.
pub fn generate_keypair(work: &WorkDir) -> Result<(), LinuxError> {
    let mut key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(|e| {
        LinuxError::KeyGen {
            message: e.to_string(),
        }
    })?;
    key.set_comment(KEY_COMMENT);

    let private = key.to_openssh(LineEnding::LF).map_err(|e| LinuxError::KeyGen {
        message: e.to_string(),
    })?;
    let public = key.public_key().to_openssh().map_err(|e| LinuxError::KeyGen {
        message: e.to_string(),
    })?;

    let key_path = work.key_path();
    write_private(&key_path, private.as_bytes())?;

    let pub_path = work.public_key_path();
    std::fs::write(&pub_path, format!("{public}\n")).map_err(|e| LinuxError::Io {
        context: format!("writing {}", pub_path.display()),
        source: e,
    })?;

    tracing::info!(path = %key_path.display(), "generated ssh key pair");
    Ok(())
}

fn write_private(path: &Path, contents: &[u8]) -> Result<(), LinuxError> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| LinuxError::Io {
            context: format!("creating {}", path.display()),
            source: e,
        })?;
    file.write_all(contents).map_err(|e| LinuxError::Io {
        context: format!("writing {}", path.display()),
        source: e,
    })
}

/// Path of the private key, once it is known to be readable. ssh would
/// otherwise fail with a far less useful message.
pub fn ensure_private_key(work: &WorkDir) -> Result<PathBuf, LinuxError> {
    let key_path = work.key_path();
    std::fs::File::open(&key_path).map_err(|source| LinuxError::MissingKey {
        path: key_path.display().to_string(),
        source,
    })?;
    Ok(key_path)
}

/// Check the private key is readable and return the public key line that
/// gets embedded in the guest's kernel command line.
pub fn read_public_key(work: &WorkDir) -> Result<String, LinuxError> {
    ensure_private_key(work)?;

    let pub_path = work.public_key_path();
    let public = std::fs::read_to_string(&pub_path).map_err(|source| LinuxError::MissingKey {
        path: pub_path.display().to_string(),
        source,
    })?;
    Ok(public.trim().to_string())
}
