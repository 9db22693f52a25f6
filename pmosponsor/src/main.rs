use anyhow::{Context, Result};
use pmoconfig::Config;
use pmosponsor::{
    ChromecastDevice, JsonFileCacheStore, PlaybackMonitor, SegmentCache, SponsorBlockClient,
    SponsorConfigExt, YtDlpResolver, find_device, logs,
};
use tracing::info;

fn main() -> Result<()> {
    // Répertoire de configuration optionnel en premier argument
    let config_dir = std::env::args().nth(1).unwrap_or_default();
    let config = Config::load_config(&config_dir).context("Failed to load configuration")?;

    logs::init_logging(&config.get_log_min_level()?);

    let settings = config.sponsor_config()?;
    info!(
        device = %settings.device_name,
        app = %settings.app_name,
        cache_file = %settings.cache_file.display(),
        "Starting pmosponsor"
    );

    let info = find_device(&settings.device_name, settings.discovery_timeout)
        .with_context(|| format!("Could not find Chromecast '{}'", settings.device_name))?;
    let device = ChromecastDevice::new(info).with_timeout(settings.cast_timeout);
    device.attach().context("Could not attach to Chromecast")?;
    info!(
        host = %device.info().host,
        model = ?device.info().model,
        "Monitoring Chromecast"
    );

    let cache = SegmentCache::load(
        JsonFileCacheStore::new(&settings.cache_file),
        settings.cache_ttl_chrono(),
    );
    let source = SponsorBlockClient::new(settings.api_url.clone(), settings.http_timeout);
    info!(api_url = source.api_url(), "Segment service configured");
    let resolver = YtDlpResolver::new(settings.resolver_command.clone(), settings.resolver_timeout);

    let mut monitor = PlaybackMonitor::new(device, resolver, source, cache, &settings);

    // Personne n'envoie sur ce canal : la boucle tourne jusqu'à l'arrêt du processus
    let (_shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    monitor.run(&shutdown_rx);

    Ok(())
}
