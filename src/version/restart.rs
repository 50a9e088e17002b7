use color_eyre::{eyre::eyre, Result};
use tracing::info;

/// Replaces the running process with a fresh one.
pub trait Restarter: Send + Sync {
  /// Only returns if the restart could not be performed.
  fn restart(&self, reason: &str) -> Result<()>;
}

/// Re-executes the current binary with the same arguments.
#[derive(Debug, Default)]
pub struct ProcessRestarter;

impl Restarter for ProcessRestarter {
  fn restart(&self, reason: &str) -> Result<()> {
    let exe =
      std::env::current_exe().map_err(|e| eyre!("Failed to locate current executable: {}", e))?;
    let mut command = std::process::Command::new(&exe);
    command.args(std::env::args_os().skip(1));

    info!(reason, exe = %exe.display(), "restarting process");

    #[cfg(unix)]
    {
      use std::os::unix::process::CommandExt;
      // exec only returns on failure.
      let err = command.exec();
      Err(eyre!("Failed to restart {}: {}", exe.display(), err))
    }

    #[cfg(not(unix))]
    {
      command
        .spawn()
        .map_err(|e| eyre!("Failed to restart {}: {}", exe.display(), e))?;
      std::process::exit(0)
    }
  }
}
