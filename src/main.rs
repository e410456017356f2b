mod cli;

use anyhow::Context;
use axaml_preview::fsnode::PathNode;
use axaml_preview::loader::{self, DotnetLauncher};
use axaml_preview::{
    BuildWatcher, LoaderSettings, MarkupRegistry, PreviewEvent, PreviewPayload, RemoteLoader,
};
use clap::Parser;
use cli::Cli;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const FILE_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    if cli.list_versions {
        return list_versions(config.host.package_dir.clone());
    }
    let Some(file) = cli.file.clone() else {
        anyhow::bail!("No file to preview");
    };

    let mut registry = MarkupRegistry::builtin();
    if let Some(path) = &cli.registry {
        registry.extend(MarkupRegistry::load(path).context("Failed to load markup registry")?);
    }
    let launcher = Arc::new(DotnetLauncher::from_config(&config.host));
    let (loader, mut events) = RemoteLoader::new(
        LoaderSettings::from_config(&config),
        launcher,
        Arc::new(registry),
    );

    std::fs::create_dir_all(&cli.out)
        .with_context(|| format!("Failed to create {}", cli.out.display()))?;

    let payload = cli.load_payload(&file, &config)?;
    loader.update(payload);

    let (rebuilt_tx, mut rebuilt) = mpsc::unbounded_channel();
    let _watcher = match (cli.watch, &cli.app) {
        (true, Some(_)) => {
            let project = cli.project(&file, &config);
            Some(
                BuildWatcher::new(&project, move || {
                    let _ = rebuilt_tx.send(());
                })
                .context("Failed to start build watcher")?,
            )
        }
        _ => None,
    };

    let source = PathNode::file(&file);
    let mut source_hash = source.change_hash();
    let mut ticker = tokio::time::interval(FILE_POLL_INTERVAL);

    let result = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(PreviewEvent::Payload(payload)) => {
                    let reported = report(&payload, &cli.out);
                    if !cli.watch {
                        break reported;
                    }
                    if let Err(e) = reported {
                        eprintln!("{:#}", e);
                    }
                }
                Some(PreviewEvent::Output(line)) => tracing::debug!(target: "host", "{}", line),
                None => break Ok(()),
            },
            Some(()) = rebuilt.recv() => {
                tracing::info!("Application rebuilt, restarting preview");
                loader.stop();
                loader.update(cli.load_payload(&file, &config)?);
            }
            _ = ticker.tick(), if cli.watch => {
                let hash = source.change_hash();
                if hash != source_hash {
                    source_hash = hash;
                    tracing::info!("{} changed", source.name());
                    loader.update(cli.load_payload(&file, &config)?);
                }
            }
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    loader.dispose();
    result
}

fn list_versions(package_dir: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let dir = package_dir
        .or_else(loader::package_directory)
        .context("Package directory could not be resolved")?;
    for version in loader::framework_versions(&dir) {
        match loader::find_host_app(&dir, &version) {
            Some(host) => println!("{}\t{}", version, host.display()),
            None => println!("{}\t(no designer host)", version),
        }
    }
    Ok(())
}

fn report(payload: &PreviewPayload, out: &Path) -> anyhow::Result<()> {
    if let Some(error) = &payload.error {
        if let Some(output) = &payload.output {
            eprintln!("{}", output);
        }
        anyhow::bail!("{}: {}", payload.name, error);
    }
    if let Some(icon) = &payload.window_icon {
        let path = out.join("icon.png");
        icon.save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    match &payload.bitmap {
        Some(bitmap) => {
            let path = out.join("preview.png");
            bitmap
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            let title = payload.window_title.as_deref().unwrap_or(&payload.name);
            println!(
                "{} -> {} ({}x{} @ {}x)",
                title,
                path.display(),
                bitmap.width(),
                bitmap.height(),
                payload.scale
            );
        }
        None => match &payload.text {
            Some(text) => println!("{}", text),
            None => println!("{}: nothing to render", payload.name),
        },
    }
    Ok(())
}
