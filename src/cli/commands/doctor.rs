use console::style;

use crate::config::SetupConfig;
use crate::error::Result;
use crate::probe::{probe, Capabilities, Privilege};
use crate::runner::SystemRunner;

pub async fn execute(setup: &SetupConfig) -> Result<()> {
    let runner = SystemRunner::new();
    let caps = probe(&runner, &setup.python).await?;

    super::print_banner();
    print_capabilities(&caps, setup.min_python_version());
    Ok(())
}

fn yes_no(value: bool) -> console::StyledObject<&'static str> {
    if value {
        style("yes").green()
    } else {
        style("no").dim()
    }
}

pub fn print_capabilities(caps: &Capabilities, min_python: (u32, u32)) {
    match &caps.python {
        Some(py) if py.version >= min_python => println!(
            "  {}          {} {}",
            style("Python").dim(),
            style(&py.raw).white(),
            style(format!("({})", py.program)).dim()
        ),
        Some(py) => println!(
            "  {}          {} {}",
            style("Python").dim(),
            style(&py.raw).red(),
            style(format!("(need {}.{}+)", min_python.0, min_python.1)).yellow()
        ),
        None => println!("  {}          {}", style("Python").dim(), style("not found").red()),
    }
    println!("  {}              {} ({})", style("OS").dim(), caps.os, caps.arch);
    println!(
        "  {} {}",
        style("Package manager").dim(),
        caps.package_manager
            .map(|pm| style(pm.program()).white())
            .unwrap_or_else(|| style("none").dim())
    );
    println!("  {}         {}", style("systemd").dim(), yes_no(caps.service_manager));
    println!(
        "  {}       {}",
        style("Privilege").dim(),
        match caps.privilege {
            Privilege::Root => style("root").green(),
            Privilege::Sudo => style("sudo").green(),
            Privilege::None => style("none").yellow(),
        }
    );
    println!("  {}             {}", style("git").dim(), yes_no(caps.git));
    println!("  {}     {}", style("cloudflared").dim(), yes_no(caps.tunnel_client));
    println!();
}
