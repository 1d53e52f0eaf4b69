use std::path::PathBuf;

use console::style;

use crate::config::SetupConfig;
use crate::error::{Outcome, Result};
use crate::probe::probe;
use crate::prompt::TermPrompter;
use crate::runner::SystemRunner;
use crate::uninstall::{UninstallEvent, Uninstaller};

pub async fn execute(setup: &SetupConfig, dir: Option<PathBuf>) -> Result<()> {
    let runner = SystemRunner::new();
    let caps = probe(&runner, &setup.python).await?;
    let mut prompter = TermPrompter;

    super::print_banner();

    let default = match dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let uninstaller = Uninstaller::new(&runner, &caps, setup);
    let outcome = uninstaller
        .run(&mut prompter, &default, &setup.backup_root()?)
        .await?;

    match outcome {
        Outcome::Declined => {
            println!();
            println!("  {}", style("Cancelled.").dim());
        }
        Outcome::Done(report) => {
            let removed = report
                .journal
                .iter()
                .filter(|e| matches!(e, UninstallEvent::Removed(_) | UninstallEvent::SourceRemoved(_)))
                .count();
            println!("  {}        {}", style("Removed").dim(), removed);
            if let Some(backup) = &report.backup {
                println!(
                    "  {}         {}",
                    style("Backup").dim(),
                    style(backup.destination.display()).cyan()
                );
            }
            if let Some(UninstallEvent::LeftDirectory(moved_to)) = report
                .journal
                .iter()
                .find(|e| matches!(e, UninstallEvent::LeftDirectory(_)))
            {
                println!(
                    "  {}",
                    style(format!(
                        "The shell's directory is gone; run: cd {}",
                        moved_to.display()
                    ))
                    .dim()
                );
            }
        }
    }
    Ok(())
}
