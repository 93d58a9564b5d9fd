mod app;
mod buffer;
mod config;
mod event;
mod export;
mod ollama;
mod planner;
mod supervisor;
#[cfg(test)]
mod test_support;
mod theme;

use app::StudyPlannerApp;
use config::Config;
use eframe::egui;
use ollama::OllamaClient;
use planner::PlanGenerator;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use supervisor::ServerSupervisor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("study_planner=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = Config::load()?;
    info!(
        model = %config.model,
        url = %config.generate_url(),
        server_binary = %config.server_binary,
        autostart = config.autostart,
        "configuration resolved"
    );

    let (tx, rx) = mpsc::channel();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("study-planner-runtime")
        .build()?;

    let client = OllamaClient::new(&config)?;
    let supervisor = Arc::new(ServerSupervisor::new(&config));
    let generator = PlanGenerator::new(
        client,
        Arc::clone(&supervisor),
        runtime.handle().clone(),
        tx,
    );
    let mut app = StudyPlannerApp::new(rx, generator, Arc::clone(&supervisor), config.model.clone());

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("AI Study Planner")
            .with_inner_size([1000.0, 800.0])
            .with_min_inner_size([640.0, 560.0]),
        ..Default::default()
    };

    let result = eframe::run_native(
        "AI Study Planner",
        native_options,
        Box::new(move |creation_context| {
            app.install(&creation_context.egui_ctx);
            Ok(Box::new(app))
        }),
    );

    // No-op when the window already shut the server down on close.
    if let Err(err) = supervisor.stop() {
        warn!(error = %err, "error shutting down inference server");
    }
    runtime.shutdown_timeout(Duration::from_secs(1));

    result?;
    Ok(())
}
