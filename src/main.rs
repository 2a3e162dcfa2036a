use std::sync::Arc;

use anyhow::{Context, Result, bail};
use skeleton_stream::{
    PipelineConfig, SessionController, SessionEvent,
    delivery::RedisStreamConnector,
    frame_log::LogStore,
    pipeline::LogRenderer,
};

fn main() -> Result<()> {
    env_logger::init();

    let config = PipelineConfig::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("list") => {
            let store = LogStore::new(config.log_dir.clone());
            for name in store.list().context("failed to list recordings")? {
                println!("{name}");
            }
            Ok(())
        }
        Some("replay") => {
            let Some(name) = args.get(1) else {
                bail!("usage: skeleton-stream replay <log-name>");
            };
            run(config, Some(name.as_str()))
        }
        None => run(config, None),
        Some(other) => bail!("unknown command {other:?}, expected `list` or `replay <log-name>`"),
    }
}

fn run(config: PipelineConfig, replay: Option<&str>) -> Result<()> {
    let connector = RedisStreamConnector::new(config.broker_timeout);
    let controller = SessionController::start(config, Box::new(connector), Arc::new(LogRenderer));

    if controller.connect_delivery() {
        controller.set_delivery_enabled(true);
    } else {
        log::warn!("broker unavailable, frames will not be delivered");
    }

    if let Some(name) = replay {
        controller
            .start_replay(name)
            .with_context(|| format!("failed to replay {name}"))?;
    }

    log::info!(
        "session started for subject {}",
        controller.snapshot().subject_id
    );

    let events = controller.events();
    for event in events {
        match event {
            SessionEvent::SubjectLost => log::info!("skeleton lost"),
            SessionEvent::SubjectFound => log::info!("skeleton found"),
            SessionEvent::PublishFailed {
                subject_id,
                captured_at_millis,
                reason,
            } => log::warn!("frame {subject_id}@{captured_at_millis} not delivered: {reason}"),
        }
    }

    Ok(())
}
