//! MP3 playback is delegated to an external decoder process (`mpg123 -q <file>`).
//! We only start it and kill it.

use std::{
    path::Path,
    process::{Child, Command, Stdio},
};

use log::debug;

use crate::error::{PlayerError, Result};

pub trait AudioProcess: Send {
    /// Still running?
    fn is_running(&mut self) -> bool;
    fn terminate(&mut self) -> Result<()>;
}

pub trait AudioLauncher: Send + Sync {
    fn launch(&self, path: &Path) -> Result<Box<dyn AudioProcess>>;
}

#[derive(Debug, Clone)]
pub struct DecoderLauncher {
    program: String,
    args: Vec<String>,
}

impl DecoderLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

impl AudioLauncher for DecoderLauncher {
    fn launch(&self, path: &Path) -> Result<Box<dyn AudioProcess>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(PlayerError::ExternalProcess)?;
        debug!("started {} (pid {}) for {:?}", self.program, child.id(), path);
        Ok(Box::new(DecoderProcess { child }))
    }
}

struct DecoderProcess {
    child: Child,
}

impl AudioProcess for DecoderProcess {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) -> Result<()> {
        if self.is_running() {
            self.child.kill().map_err(PlayerError::ExternalProcess)?;
        }
        // reap so we don't leave a zombie behind
        self.child.wait().map_err(PlayerError::ExternalProcess)?;
        debug!("decoder pid {} stopped", self.child.id());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::sinks::mock::Log;

    pub struct MockLauncher {
        pub log: Log,
        pub fail: bool,
    }

    pub struct MockProcess {
        log: Log,
        name: String,
        running: bool,
    }

    impl AudioLauncher for MockLauncher {
        fn launch(&self, path: &Path) -> Result<Box<dyn AudioProcess>> {
            if self.fail {
                return Err(PlayerError::ExternalProcess(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no decoder",
                )));
            }
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            self.log.push(format!("decoder start {name}"));
            Ok(Box::new(MockProcess { log: self.log.clone(), name, running: true }))
        }
    }

    impl AudioProcess for MockProcess {
        fn is_running(&mut self) -> bool {
            self.running
        }

        fn terminate(&mut self) -> Result<()> {
            self.running = false;
            self.log.push(format!("decoder stop {}", self.name));
            Ok(())
        }
    }
}
