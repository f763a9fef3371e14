//! `aicrew daemon`: the full runtime.
//!
//! Wires config → model gateway → tools → retrieval → pipeline → one
//! runtime per avatar → scheduler service → admin gateway, then serves
//! until Ctrl-C.

use std::sync::Arc;

use aicrew_agent::{AvatarFleet, AvatarRuntime, GenerationPipeline, PipelineSettings};
use aicrew_channels::{InboxRegistry, build_connectors};
use aicrew_config::AppConfig;
use aicrew_core::event::EventBus;
use aicrew_gateway::{AdminState, LogLevelControl};
use aicrew_workflow::{Scheduler, SchedulerService, SchedulerSettings};
use chrono::Utc;
use tracing::{info, warn};

use crate::logging::LogControl;

pub async fn run(
    mut config: AppConfig,
    log: Arc<LogControl>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port {
        config.gateway.port = port;
    }

    let super::Assembly {
        models,
        tools,
        profiles,
    } = super::assemble(&config)?;
    if profiles.is_empty() {
        warn!(dir = %config.avatar.profiles_dir.display(), "No avatar profiles loaded");
    }

    let retrieval = super::retrieval_client(&config, &models);
    let pipeline = Arc::new(GenerationPipeline::new(
        models.clone(),
        tools,
        retrieval,
        PipelineSettings::from_config(&config),
    ));

    let bus = EventBus::new(config.bus.queue_capacity);
    let mut fleet = AvatarFleet::new();
    let mut inboxes = InboxRegistry::new();
    for profile in &profiles {
        let set = build_connectors(profile);
        if let Some(inbox) = set.inbox {
            inboxes.register(profile.id.clone(), inbox);
        }
        fleet.insert(AvatarRuntime::new(
            profile.clone(),
            set.connectors,
            pipeline.clone(),
            bus.clone(),
        ));
    }
    let fleet = Arc::new(fleet);
    let event_loops = fleet.spawn_event_loops();

    let scheduler = Scheduler::from_profiles(&profiles, Utc::now());
    let (handle, scheduler_task) = SchedulerService::new(
        scheduler,
        fleet.clone(),
        SchedulerSettings::from_config(&config.scheduler),
    )
    .spawn();

    println!("aicrew daemon");
    println!("   Avatars:  {}", fleet.len());
    println!("   Backend:  {} ({})", config.llm.default_backend, config.llm.default_model);
    println!("   Gateway:  {}:{}", config.gateway.host, config.gateway.port);

    let log: Arc<dyn LogLevelControl> = log;
    let state = AdminState::new(profiles, handle, bus, inboxes)
        .with_models(models)
        .with_log_level(log);

    aicrew_gateway::serve(&config.gateway, Arc::new(state), shutdown_signal()).await?;

    scheduler_task.abort();
    for task in event_loops {
        task.abort();
    }
    info!("Daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
