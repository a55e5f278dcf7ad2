use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

/// A `MakeWriter` that drops everything until a log file is attached.
///
/// The subscriber is installed before we know whether the command touches a
/// guest (and so whether `<workdir>/linux.log` should be written at all);
/// `SupervisorLogHandle::attach` switches it on afterwards.
#[derive(Clone)]
pub struct SupervisorLog {
    file: Arc<Mutex<Option<File>>>,
}

#[derive(Clone)]
pub struct SupervisorLogHandle {
    file: Arc<Mutex<Option<File>>>,
}

impl SupervisorLog {
    pub fn new() -> (Self, SupervisorLogHandle) {
        let file = Arc::new(Mutex::new(None));
        (
            Self { file: file.clone() },
            SupervisorLogHandle { file },
        )
    }
}

impl SupervisorLogHandle {
    /// Start appending to `path`. The parent directory must exist; the
    /// working directory is never created as a side effect of logging.
    pub fn attach(&self, path: &Path) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut slot = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;
        *slot = Some(file);
        Ok(())
    }
}

pub struct SupervisorLogWriter {
    file: Arc<Mutex<Option<File>>>,
}

impl io::Write for SupervisorLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(f) => f.write(buf),
                None => Ok(buf.len()),
            },
            Err(_) => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(f) => f.flush(),
                None => Ok(()),
            },
            Err(_) => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SupervisorLog {
    type Writer = SupervisorLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SupervisorLogWriter {
            file: self.file.clone(),
        }
    }
}
