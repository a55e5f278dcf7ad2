use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinuxError>;

#[derive(Debug, Error, Diagnostic)]
pub enum LinuxError {
    #[error("no linux config folder found at {path}")]
    #[diagnostic(help("run `linux init` first"))]
    NotInitialized { path: String },

    #[error("linux config folder already exists at {path}, skipping init")]
    AlreadyInitialized { path: String },

    #[error("ssh key {path} is not readable")]
    #[diagnostic(help("re-run `linux init` in a fresh directory to create a key pair"))]
    MissingKey {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to generate key pair: {message}")]
    KeyGen { message: String },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("failed to launch {binary}")]
    #[diagnostic(help("check that the hypervisor binary exists and is executable"))]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no process with pid {pid}")]
    ProcessNotFound { pid: u32 },

    #[error("failed to signal pid {pid}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("address lookup failed: {message}")]
    Resolver { message: String },

    #[error("timed out waiting for linux to boot ({reason})")]
    #[diagnostic(help("the hypervisor process was killed; see stderr.log in the config folder"))]
    BootTimeout { reason: String },

    #[error("linux is not running")]
    #[diagnostic(help("run `linux boot` first"))]
    NotRunning,

    #[error("could not find ip for linux hostname {hostname}")]
    NoAddress { hostname: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}
