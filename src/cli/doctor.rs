//! `doctor`: container runtime diagnostics.

use crate::runtime::detect::check_docker;

pub async fn run_doctor_command() -> anyhow::Result<()> {
    let detection = check_docker().await;

    println!("Docker: {}", detection.status.as_str());
    match detection.volumes_supported {
        Some(true) => println!("Named volumes: supported"),
        Some(false) => println!("Named volumes: not supported (use --storage filesystem)"),
        None => {}
    }

    if !detection.status.is_ok() {
        if let Some(hint) = detection.hint() {
            println!();
            println!("  {}", hint);
        }
        anyhow::bail!("Docker is {}", detection.status.as_str());
    }
    Ok(())
}
