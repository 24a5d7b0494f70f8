use color_eyre::{eyre::eyre, Result};
use controller_dispatcher::controller::InputSource;
use controller_dispatcher::dispatcher::ControllerDispatcher;
use controller_dispatcher::host::{demo, FrameLoop, FrameLoopHandle};
use controller_dispatcher::modules::register_default_modules;
use controller_dispatcher::persistence::{config_store, DispatcherConfig};
use controller_dispatcher::world::World;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Frames to keep running after the last scripted input change
const SCRIPT_TAIL_FRAMES: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let mut config = setup_config().await;

    let mut world = World::new();
    let scene = demo::populate_world(&mut world);
    info!(
        "Demo scene ready: ball {}, crate {}, gun {}",
        scene.ball, scene.crate_id, scene.gun
    );
    let world = world.into_shared();

    let mut dispatcher = ControllerDispatcher::new();
    let enabled = register_default_modules(&mut dispatcher, &world, &config)
        .map_err(|e| eyre!("Failed to register modules: {}", e))?;
    info!("Registered {} module(s): {}", enabled.len(), enabled.join(", "));

    let script = demo::scripted_input();
    if config.dispatcher.max_frames == 0 {
        config.dispatcher.max_frames = script.last_keyframe().unwrap_or(0) + SCRIPT_TAIL_FRAMES;
    }
    let input: Box<dyn InputSource> = Box::new(script);

    let frame_loop = FrameLoop::create(dispatcher, world.clone(), input, &config);
    let mut handle = FrameLoopHandle::spawn(frame_loop);

    if let Some(shutdown_tx) = handle.take_shutdown_sender() {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping frame loop");
                let _ = shutdown_tx.send(());
            }
        });
    }

    let stats = handle
        .wait()
        .await
        .map_err(|e| eyre!("Frame loop failed: {}", e))?;

    info!(
        "Ran {} frame(s), {} module failure(s)",
        stats.frames, stats.module_failures
    );
    for (module, frames) in &stats.run_frames {
        info!("{} ran in {} frame(s)", module, frames);
    }
    if !stats.disabled_modules.is_empty() {
        warn!("Disabled by failure policy: {}", stats.disabled_modules.join(", "));
    }

    Ok(())
}

async fn setup_config() -> DispatcherConfig {
    let path = config_store::default_config_path();
    match config_store::ensure_default_config(&path).await {
        Ok(config) => {
            info!("Using configuration {}", path.display());
            config
        }
        Err(e) => {
            warn!("Falling back to default configuration: {}", e);
            DispatcherConfig::default()
        }
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
