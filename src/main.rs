use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;

use salesman_dashboard::config::AppConfig;
use salesman_dashboard::host::{
    FixedGeolocator, RecordingImportEnvironment, RecordingNavigator, ScriptedInteractor,
    TracingPresenter,
};
use salesman_dashboard::session::{SessionStore, ACCESS_TOKEN, REFRESH_TOKEN, USERNAME};
use salesman_dashboard::{init_tracing, AppContext, HostAdapters};

/// Headless run: validates the session taken from the environment, loads the
/// dashboard data and prints the resulting state. An optional argument names
/// an Excel file to import.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = AppConfig::from_env();
    info!(profile = ?config.public_profile(), "starting headless dashboard");

    let session = SessionStore::in_memory();
    for (variable, key) in [
        ("SALESMAN_ACCESS_TOKEN", ACCESS_TOKEN),
        ("SALESMAN_REFRESH_TOKEN", REFRESH_TOKEN),
        ("SALESMAN_USERNAME", USERNAME),
    ] {
        if let Ok(value) = env::var(variable) {
            session.set(key, value);
        }
    }

    let geolocator = match (env::var("SALESMAN_LAT"), env::var("SALESMAN_LON")) {
        (Ok(lat), Ok(lon)) => FixedGeolocator::at(
            lat.parse().context("SALESMAN_LAT is not a number")?,
            lon.parse().context("SALESMAN_LON is not a number")?,
        ),
        _ => FixedGeolocator::unavailable(),
    };

    let hosts = HostAdapters {
        presenter: Arc::new(TracingPresenter),
        navigator: Arc::new(RecordingNavigator::new("/index.html")),
        interactor: Arc::new(ScriptedInteractor::accepting()),
        import_environment: Arc::new(RecordingImportEnvironment::new()),
        geolocator: Arc::new(geolocator),
    };
    let context = AppContext::new(config, session, hosts).context("failed to build dashboard")?;

    if !context.initialize().await {
        context.destroy();
        bail!("dashboard initialization failed");
    }

    if let Some(path) = env::args_os().nth(1).map(PathBuf::from) {
        context
            .imports()
            .select_file(Some(&path))
            .await
            .with_context(|| format!("cannot read {}", path.display()))?
            .context("file rejected")?;
        let report = context.imports().start_import().await?;
        info!(records = ?report.records_processed, "import finished");
    }

    let stats = context.app_stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("{}", serde_json::to_string_pretty(&context.export_state()?)?);
    context.destroy();
    Ok(())
}
