use std::{io::ErrorKind, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fancoil_common::{sampling::SensorSet, settings::DeviceSettings, topics::Topics};

#[derive(Clone)]
struct SettingsStore {
    path: Arc<PathBuf>,
}

impl SettingsStore {
    fn new() -> Self {
        let data_dir = std::env::var("FANCOIL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.fancoil"));

        Self {
            path: Arc::new(data_dir.join("settings.json")),
        }
    }

    async fn load(&self) -> anyhow::Result<DeviceSettings> {
        let mut settings = DeviceSettings::default();
        match tokio::fs::read(self.path.as_ref()).await {
            Ok(raw) => {
                settings
                    .apply_json(&raw)
                    .context("settings file is malformed")?;
                Ok(settings)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(settings),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, settings: &DeviceSettings) -> anyhow::Result<()> {
        let path = self.path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(&settings.to_document())?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = SettingsStore::new();
    let settings = match store.load().await {
        Ok(settings) => settings,
        Err(err) => {
            warn!("failed to load device settings: {err:#}");
            DeviceSettings::default()
        }
    };

    let mqtt_host = std::env::var("MQTT_HOST").ok().unwrap_or_else(|| {
        if settings.mqtt_server.is_empty() {
            "127.0.0.1".to_string()
        } else {
            settings.mqtt_server.clone()
        }
    });
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .or_else(|| settings.mqtt_port.parse::<u16>().ok())
        .unwrap_or(1883);

    let topics = Topics::new(&settings.base_topic);

    let mut mqtt_options = MqttOptions::new(settings.mqtt_client_id.clone(), mqtt_host, mqtt_port);
    if !settings.mqtt_user.is_empty() {
        mqtt_options.set_credentials(settings.mqtt_user.clone(), settings.mqtt_pass.clone());
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.publish(topics.status.as_str(), QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish online status")?;

    for topic in topics.commands() {
        mqtt.subscribe(topic, QoS::AtLeastOnce)
            .await
            .context("failed to subscribe to command topic")?;
    }

    let shared_settings = Arc::new(Mutex::new(settings));

    {
        let shared_settings = shared_settings.clone();
        let store = store.clone();
        let topics = topics.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let Ok(message) = std::str::from_utf8(&publish.payload) else {
                            continue;
                        };

                        let mut settings = shared_settings.lock().await;
                        if topics.handle_command(&mut settings, &publish.topic, message) {
                            info!("settings updated from {}", publish.topic);
                            if let Err(err) = store.save(&settings).await {
                                warn!("failed to save device settings: {err:#}");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("mqtt poll error: {err}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    info!("fan-coil publisher started");

    let mut channels = SensorSet::new();
    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_secs(10));

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        // Hardware integration point:
        // replace these simulated readings with the DHT22 + DS18B20 drivers on
        // the ESP target.
        let temperature_c = 21.0 + ((tick % 8) as f32 * 0.1);
        let humidity = 45.0 + ((tick % 6) as f32 * 0.5);
        let inlet_c = 35.0 + ((tick % 5) as f32 * 0.3);

        let temperature = channels.temperature.record_and_average(temperature_c);
        publish_average(
            &mqtt,
            &topics.temperature,
            temperature,
            channels.temperature.precision(),
        )
        .await?;

        let humidity_average = channels.humidity.record_and_average(humidity);
        publish_average(
            &mqtt,
            &topics.humidity,
            humidity_average,
            channels.humidity.precision(),
        )
        .await?;

        let inlet = channels.inlet.record_and_average(inlet_c);
        publish_average(&mqtt, &topics.inlet, inlet, channels.inlet.precision()).await?;
    }
}

async fn publish_average(
    mqtt: &AsyncClient,
    topic: &str,
    average: f32,
    precision: u32,
) -> anyhow::Result<()> {
    let payload = format!("{average:.precision$}", precision = precision as usize);
    debug!("publish topic [{topic}] payload [{payload}]");
    mqtt.publish(topic, QoS::AtLeastOnce, true, payload)
        .await
        .context("failed to publish sensor average")?;
    Ok(())
}
