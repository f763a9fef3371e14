//! `aicrew avatars`: list loaded avatar profiles.

use aicrew_config::AppConfig;
use aicrew_core::avatar::ScheduleSpec;

pub fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let assembly = super::assemble(config)?;

    println!("Avatars in {}", config.avatar.profiles_dir.display());
    println!("==================");
    if assembly.profiles.is_empty() {
        println!("  (none)");
        return Ok(());
    }

    for profile in &assembly.profiles {
        let schedule = match &profile.schedule {
            ScheduleSpec::Interval {
                every_secs,
                jitter_secs,
            } => format!("every {}m +{jitter_secs}s", every_secs / 60),
            ScheduleSpec::Cron { expression } => format!("cron '{expression}'"),
        };
        let connectors: Vec<&str> = profile.connectors.iter().map(|c| c.kind.as_str()).collect();

        println!("  {} ({})", profile.id, profile.name);
        println!("    Model:      {}/{}", profile.backend, profile.model);
        println!("    Schedule:   {schedule}");
        println!("    Tools:      {}", join_or_dash(&profile.tools));
        println!("    Connectors: {}", join_or_dash(&connectors));
        println!("    Topics:     {}", join_or_dash(&profile.topics));
        if let Some(target) = &profile.escalate_to {
            println!("    Escalates:  {target}");
        }
    }
    Ok(())
}

fn join_or_dash<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        "-".into()
    } else {
        items.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(", ")
    }
}
