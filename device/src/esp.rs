use std::{
    sync::{mpsc, Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use dht_sensor::dht22;
use ds18b20::{Ds18b20, Resolution};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, IOPin, InputOutput, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};
use one_wire_bus::{Address, OneWire};
use serde::Serialize;

use fancoil_common::{
    provisioning::{self, BootstrapOutcome, PortalSubmission},
    sampling::SensorSet,
    settings::DeviceSettings,
    topics::Topics,
};

const NVS_NAMESPACE: &str = "fancoil";
const NVS_SETTINGS_KEY: &str = "settings_json";

const DS18B20_PIN: i32 = 4;
const DHT22_PIN: i32 = 16;

const PROVISIONING_AP_SSID: &str = "FanCoil-AP";
const PROVISIONING_AP_PASSWORD: &str = "FanCoilSetup";
const PROVISIONING_WAIT_SECS: u64 = 300;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const MAX_HTTP_BODY: usize = 2048;
const MAX_MQTT_PAYLOAD_BYTES: usize = 64;
const LOOP_TICK_MS: u64 = 500;

// A sampling gap this long restarts the affected averages from the next
// reading, so a stalled sensor does not drag a stale window around.
const SAMPLE_GAP_RESET_MS: u64 = 120_000;

const PORTAL_TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Fan Coil Setup</title>
  <style>
    body{font-family:Arial,sans-serif;max-width:560px;margin:2rem auto;padding:0 1rem;color:#111}
    h1{margin:0 0 .5rem}.card{border:1px solid #ddd;border-radius:10px;padding:1rem;margin-bottom:1rem}
    label{display:block;margin:.5rem 0 .2rem}
    input{width:100%;padding:.5rem;box-sizing:border-box}
    .muted{color:#555}.ok{color:#106010}.err{color:#a00000}
    button{padding:.55rem .9rem;margin-top:.8rem}
  </style>
</head>
<body>
  <h1>Fan Coil Setup</h1>
  <p class="muted">Join the device to your WiFi network and MQTT broker.</p>
  <div class="card">
    <label>WiFi SSID</label><input id="wifiSsid">
    <label>WiFi Password</label><input id="wifiPass" type="password">
    <!--FIELDS-->
    <button id="save">Save &amp; Connect</button>
  </div>
  <p id="status" class="muted"></p>
  <script>
    const q=(id)=>document.getElementById(id);
    q('save').addEventListener('click', async ()=>{
      q('status').className='muted'; q('status').textContent='Saving...';
      const payload={
        wifiSsid:q('wifiSsid').value.trim(),
        wifiPass:q('wifiPass').value,
        server:q('server').value.trim(),
        port:q('port').value.trim(),
        clientName:q('clientName').value.trim(),
        user:q('user').value.trim(),
        password:q('password').value,
        baseTopic:q('baseTopic').value.trim(),
      };
      try{
        const r=await fetch('/api/config',{method:'PUT',headers:{'content-type':'application/json'},body:JSON.stringify(payload)});
        const b=await r.json().catch(()=>({}));
        if(!r.ok)throw new Error(b.error||('Request failed: '+r.status));
        q('status').className='ok'; q('status').textContent='Saved. The device is connecting...';
      }catch(err){q('status').className='err'; q('status').textContent=err.message;}
    });
  </script>
</body>
</html>
"#;

struct AirReading {
    temperature_c: f32,
    humidity: f32,
}

struct FanCoilSensors {
    one_wire: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    inlet_address: Option<Address>,
    dht_pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
}

#[derive(Clone)]
struct SettingsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

impl SettingsStore {
    /// Builds settings from defaults plus whatever the stored document
    /// carries; an absent document is a normal first run.
    fn load(&self) -> anyhow::Result<DeviceSettings> {
        let _guard = self.lock.lock().unwrap();
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 2048];

        let mut settings = DeviceSettings::default();
        match nvs.get_str(NVS_SETTINGS_KEY, &mut buffer)? {
            Some(raw) => {
                settings
                    .apply_json(raw.as_bytes())
                    .context("stored settings document is malformed")?;
                Ok(settings)
            }
            None => Ok(settings),
        }
    }

    fn save(&self, settings: &DeviceSettings) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let payload = serde_json::to_string(&settings.to_document())?;
        nvs.set_str(NVS_SETTINGS_KEY, &payload)?;
        Ok(())
    }
}

impl FanCoilSensors {
    fn new(inlet_pin: AnyIOPin, dht_pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut one_wire_pin = PinDriver::input_output_od(inlet_pin)?;
        one_wire_pin.set_pull(Pull::Up)?;
        one_wire_pin.set_high()?;

        let mut dht_pin = PinDriver::input_output_od(dht_pin)?;
        dht_pin.set_pull(Pull::Up)?;
        dht_pin.set_high()?;

        let one_wire = OneWire::new(one_wire_pin)
            .map_err(|err| anyhow!("failed to initialize one-wire bus: {err:?}"))?;

        let mut sensors = Self {
            one_wire,
            inlet_address: None,
            dht_pin,
            delay: Ets,
        };

        sensors.find_inlet_probe();
        Ok(sensors)
    }

    fn has_inlet_probe(&self) -> bool {
        self.inlet_address.is_some()
    }

    fn find_inlet_probe(&mut self) {
        let mut first_probe: Option<Address> = None;
        let mut device_count = 0_u32;

        for device in self.one_wire.devices(false, &mut self.delay) {
            match device {
                Ok(address) => {
                    device_count = device_count.saturating_add(1);
                    if first_probe.is_none() && address.family_code() == ds18b20::FAMILY_CODE {
                        first_probe = Some(address);
                    }
                }
                Err(err) => {
                    warn!("one-wire device scan failed: {err:?}");
                    break;
                }
            }
        }

        self.inlet_address = first_probe;

        match self.inlet_address {
            Some(address) => info!(
                "inlet probe ready on GPIO{} ({} one-wire device(s), using {:?})",
                DS18B20_PIN, device_count, address
            ),
            None => warn!(
                "no inlet probe found on GPIO{} ({} one-wire device(s) detected)",
                DS18B20_PIN, device_count
            ),
        }
    }

    fn read_air(&mut self) -> Option<AirReading> {
        if let Err(err) = self.dht_pin.set_high() {
            warn!("failed to raise DHT22 line before read: {err:?}");
            return None;
        }

        match dht22::blocking::read(&mut self.delay, &mut self.dht_pin) {
            Ok(reading) => {
                debug!(
                    "[DHT22] {:.1}C {:.1}%",
                    reading.temperature, reading.relative_humidity
                );
                Some(AirReading {
                    temperature_c: reading.temperature,
                    humidity: reading.relative_humidity,
                })
            }
            Err(err) => {
                warn!("failed to read DHT22 on GPIO{}: {err:?}", DHT22_PIN);
                None
            }
        }
    }

    fn read_inlet_c(&mut self) -> Option<f32> {
        if self.inlet_address.is_none() {
            self.find_inlet_probe();
        }

        let address = self.inlet_address?;
        let probe = match Ds18b20::new::<core::convert::Infallible>(address) {
            Ok(probe) => probe,
            Err(err) => {
                warn!("invalid inlet probe address {:?}: {err:?}", address);
                self.inlet_address = None;
                return None;
            }
        };

        if let Err(err) =
            ds18b20::start_simultaneous_temp_measurement(&mut self.one_wire, &mut self.delay)
        {
            warn!("failed to start inlet conversion: {err:?}");
            self.inlet_address = None;
            return None;
        }

        Resolution::Bits12.delay_for_measurement_time(&mut self.delay);

        match probe.read_data(&mut self.one_wire, &mut self.delay) {
            Ok(data) => {
                debug!("[DS18B20] inlet {:.1}C", data.temperature);
                Some(data.temperature)
            }
            Err(err) => {
                warn!("failed to read inlet probe: {err:?}");
                self.inlet_address = None;
                None
            }
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let store = SettingsStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let mut settings = store.load().unwrap_or_else(|err| {
        warn!("failed to load device settings: {err:#}");
        DeviceSettings::default()
    });

    let Peripherals { modem, pins, .. } = Peripherals::take()?;

    let mut sensors = FanCoilSensors::new(pins.gpio4.downgrade(), pins.gpio16.downgrade())
        .context("failed to initialize fan-coil sensors")?;

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    match connect_and_configure(&mut wifi, &mut settings)? {
        outcome @ BootstrapOutcome::Connected { .. } => {
            info!("wifi connected");
            if outcome.needs_save() {
                if let Err(err) = store.save(&settings) {
                    warn!("failed to save device settings: {err:#}");
                }
            }
        }
        BootstrapOutcome::Failed => {
            warn!("connectivity bootstrap failed; restarting");
            thread::sleep(Duration::from_secs(1));
            unsafe { esp_idf_svc::sys::esp_restart() };
        }
    }

    let topics = Topics::new(&settings.base_topic);
    let (mut mqtt, conn) = create_mqtt_client(&settings)?;

    for topic in topics.commands() {
        mqtt.subscribe(topic, QoS::AtLeastOnce)?;
    }

    spawn_command_listener(conn, Arc::new(Mutex::new(settings)), store, topics.clone());

    if let Err(err) = mqtt.publish(&topics.status, QoS::AtLeastOnce, true, b"online") {
        warn!("failed to publish online status: {err:?}");
    }

    let mut channels = SensorSet::new();
    channels.inlet.exists = sensors.has_inlet_probe();
    if !channels.inlet.exists {
        warn!("inlet channel disabled; no probe detected at startup");
    }

    let mut last_air_poll: Option<Instant> = None;
    let mut last_inlet_poll: Option<Instant> = None;
    let mut last_air_ok: Option<Instant> = None;
    let mut last_inlet_ok: Option<Instant> = None;

    loop {
        if !ensure_wifi_connected(&mut wifi) {
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
            continue;
        }

        if due(&mut last_air_poll, channels.temperature.poll_interval_ms()) {
            if let Some(reading) = sensors.read_air() {
                if is_stale(last_air_ok, SAMPLE_GAP_RESET_MS) {
                    info!("air readings resumed after a gap; restarting averages");
                    channels.temperature.reset(reading.temperature_c);
                    channels.humidity.reset(reading.humidity);
                }
                last_air_ok = Some(Instant::now());

                let temperature = channels.temperature.record_and_average(reading.temperature_c);
                publish_average(
                    &mut mqtt,
                    &topics.temperature,
                    temperature,
                    channels.temperature.precision(),
                );

                let humidity = channels.humidity.record_and_average(reading.humidity);
                publish_average(&mut mqtt, &topics.humidity, humidity, channels.humidity.precision());
            }
        }

        if channels.inlet.exists && due(&mut last_inlet_poll, channels.inlet.poll_interval_ms()) {
            if let Some(inlet_c) = sensors.read_inlet_c() {
                if is_stale(last_inlet_ok, SAMPLE_GAP_RESET_MS) {
                    info!("inlet readings resumed after a gap; restarting average");
                    channels.inlet.reset(inlet_c);
                }
                last_inlet_ok = Some(Instant::now());

                let inlet = channels.inlet.record_and_average(inlet_c);
                publish_average(&mut mqtt, &topics.inlet, inlet, channels.inlet.precision());
            }
        }

        thread::sleep(Duration::from_millis(LOOP_TICK_MS));
    }
}

/// Tries the radio's stored station credentials, falling back to the
/// provisioning AP + portal. Connecting through a fresh submission copies
/// the MQTT fields into `settings` and reports whether they changed; the
/// caller persists them based on the outcome alone.
fn connect_and_configure(
    wifi: &mut BlockingWifi<&mut EspWifi<'static>>,
    settings: &mut DeviceSettings,
) -> anyhow::Result<BootstrapOutcome> {
    if connect_stored_station(wifi) {
        return Ok(BootstrapOutcome::Connected {
            settings_changed: false,
        });
    }

    warn!(
        "station connection unavailable; starting provisioning AP `{}`",
        PROVISIONING_AP_SSID
    );
    let _ = wifi.stop();
    start_provisioning_ap(wifi)?;

    let (submit_tx, submit_rx) = mpsc::channel();
    let portal = create_portal_server(render_portal_page(settings), submit_tx)?;

    let submission = match submit_rx.recv_timeout(Duration::from_secs(PROVISIONING_WAIT_SECS)) {
        Ok(submission) => submission,
        Err(_) => {
            warn!("no provisioning submission within {PROVISIONING_WAIT_SECS}s");
            return Ok(BootstrapOutcome::Failed);
        }
    };
    drop(portal);

    let settings_changed = provisioning::apply_submission(settings, &submission);

    let _ = wifi.stop();
    configure_station(wifi, &submission.wifi_ssid, &submission.wifi_pass)?;
    if !connect_station(wifi) {
        warn!(
            "failed to join `{}` with submitted credentials",
            submission.wifi_ssid
        );
        return Ok(BootstrapOutcome::Failed);
    }

    Ok(BootstrapOutcome::Connected { settings_changed })
}

fn connect_stored_station(wifi: &mut BlockingWifi<&mut EspWifi<'static>>) -> bool {
    let stored = match wifi.get_configuration() {
        Ok(Configuration::Client(client)) => client,
        Ok(_) => {
            info!("no stored station configuration");
            return false;
        }
        Err(err) => {
            warn!("failed to read stored wifi configuration: {err:?}");
            return false;
        }
    };

    if stored.ssid.is_empty() {
        info!("no stored station credentials");
        return false;
    }

    info!("connecting to stored network `{}`", stored.ssid);
    connect_station(wifi)
}

fn connect_station(wifi: &mut BlockingWifi<&mut EspWifi<'static>>) -> bool {
    if let Err(err) = wifi.start() {
        warn!("wifi start failed: {err:?}");
        return false;
    }

    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect() {
            Ok(()) => match wifi.wait_netif_up() {
                Ok(()) => {
                    info!("wifi connected and netif up on attempt {attempt}");
                    return true;
                }
                Err(err) => warn!("wifi netif up failed on attempt {attempt}: {err:#}"),
            },
            Err(err) => warn!("wifi connect failed on attempt {attempt}: {err:#}"),
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    false
}

/// Reports whether the station link is up, reconnecting once if it dropped.
fn ensure_wifi_connected(wifi: &mut BlockingWifi<&mut EspWifi<'static>>) -> bool {
    match wifi.is_connected() {
        Ok(true) => return true,
        Ok(false) => {}
        Err(err) => {
            warn!("failed to query wifi link state: {err:?}");
            return false;
        }
    }

    warn!("wifi link lost; reconnecting");
    match wifi.connect() {
        Ok(()) => match wifi.wait_netif_up() {
            Ok(()) => {
                info!("wifi reconnected");
                true
            }
            Err(err) => {
                warn!("wifi netif up failed after reconnect: {err:#}");
                false
            }
        },
        Err(err) => {
            warn!("wifi reconnect failed: {err:#}");
            false
        }
    }
}

fn configure_station(
    wifi: &mut BlockingWifi<&mut EspWifi<'static>>,
    ssid: &str,
    pass: &str,
) -> anyhow::Result<()> {
    let auth_method = if pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid.try_into().map_err(|_| anyhow!("wifi ssid too long"))?,
        password: pass
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    Ok(())
}

fn start_provisioning_ap(wifi: &mut BlockingWifi<&mut EspWifi<'static>>) -> anyhow::Result<()> {
    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: PROVISIONING_AP_SSID
            .try_into()
            .map_err(|_| anyhow!("provisioning AP SSID too long"))?,
        password: PROVISIONING_AP_PASSWORD
            .try_into()
            .map_err(|_| anyhow!("provisioning AP password too long"))?,
        auth_method: AuthMethod::WPAWPA2Personal,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    info!(
        "provisioning AP started on `{}` (password: `{}`)",
        PROVISIONING_AP_SSID, PROVISIONING_AP_PASSWORD
    );
    Ok(())
}

fn render_portal_page(settings: &DeviceSettings) -> String {
    use std::fmt::Write as _;

    let mut inputs = String::new();
    for field in provisioning::portal_fields(settings) {
        let _ = write!(
            inputs,
            r#"<label>{}</label><input id="{}" value="{}" maxlength="{}">"#,
            field.label,
            field.id,
            html_escape(&field.value),
            field.max_len
        );
    }

    PORTAL_TEMPLATE.replace("<!--FIELDS-->", &inputs)
}

fn html_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn create_portal_server(
    page: String,
    submit: mpsc::Sender<PortalSubmission>,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;
    let page = Arc::new(page);

    // Captive-portal probe paths all land on the setup form.
    for path in [
        "/",
        "/generate_204",
        "/gen_204",
        "/hotspot-detect.html",
        "/connecttest.txt",
        "/ncsi.txt",
        "/fwlink",
    ] {
        let page = page.clone();
        server.fn_handler::<anyhow::Error, _>(path, Method::Get, move |req| {
            req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
                .write_all(page.as_bytes())?;
            Ok(())
        })?;
    }

    let submit = Mutex::new(submit);
    server.fn_handler::<anyhow::Error, _>("/api/config", Method::Put, move |mut req| {
        let body = read_request_body(&mut req)?;
        let submission: PortalSubmission =
            serde_json::from_slice(&body).context("invalid provisioning payload")?;

        if let Err(message) = validate_submission(&submission) {
            return write_error(req, 400, message);
        }

        if submit.lock().unwrap().send(submission).is_err() {
            return write_error(req, 409, "Provisioning window is closed");
        }

        let payload = serde_json::json!({ "accepted": true });
        write_json(req, &payload)
    })?;

    Ok(server)
}

fn validate_submission(submission: &PortalSubmission) -> Result<(), &'static str> {
    if submission.wifi_ssid.trim().is_empty() {
        return Err("wifiSsid cannot be empty");
    }
    if !submission.port.is_empty() {
        match submission.port.parse::<u16>() {
            Ok(port) if port > 0 => {}
            _ => return Err("port must be a number between 1 and 65535"),
        }
    }
    Ok(())
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(
    mut req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    mut req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn create_mqtt_client(
    settings: &DeviceSettings,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let port = match settings.mqtt_port.parse::<u16>() {
        Ok(port) => port,
        Err(_) => {
            warn!("invalid MQTT port `{}`; using 1883", settings.mqtt_port);
            1883
        }
    };
    let url = format!("mqtt://{}:{}", settings.mqtt_server, port);

    let conf = MqttClientConfiguration {
        client_id: Some(settings.mqtt_client_id.as_str()),
        username: if settings.mqtt_user.is_empty() {
            None
        } else {
            Some(settings.mqtt_user.as_str())
        },
        password: if settings.mqtt_pass.is_empty() {
            None
        } else {
            Some(settings.mqtt_pass.as_str())
        },
        ..Default::default()
    };

    Ok(EspMqttClient::new(&url, &conf)?)
}

fn spawn_command_listener(
    mut conn: EspMqttConnection,
    shared_settings: Arc<Mutex<DeviceSettings>>,
    store: SettingsStore,
    topics: Topics,
) {
    thread::Builder::new()
        .name("mqtt-poll".to_string())
        .stack_size(8192)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => {
                    if let EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } = event.payload()
                    {
                        // Only full MQTT payloads are processed.
                        if !matches!(details, Details::Complete) {
                            continue;
                        }

                        if data.len() > MAX_MQTT_PAYLOAD_BYTES {
                            warn!(
                                "dropping oversized MQTT payload on topic {} ({} bytes)",
                                topic,
                                data.len()
                            );
                            continue;
                        }

                        if let Ok(message) = core::str::from_utf8(data) {
                            let mut settings = shared_settings.lock().unwrap();
                            if topics.handle_command(&mut settings, topic, message) {
                                info!("settings updated from {topic}");
                                if let Err(err) = store.save(&settings) {
                                    warn!("failed to save device settings: {err:#}");
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!("mqtt poll error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                }
            }
        })
        .expect("failed to spawn mqtt thread");
}

fn publish_average(mqtt: &mut EspMqttClient<'static>, topic: &str, average: f32, precision: u32) {
    let payload = format!("{average:.precision$}", precision = precision as usize);
    debug!("publish topic [{topic}] payload [{payload}]");
    if let Err(err) = mqtt.publish(topic, QoS::AtLeastOnce, true, payload.as_bytes()) {
        warn!("failed to publish to {topic}: {err:?}");
    }
}

fn due(last: &mut Option<Instant>, interval_ms: u64) -> bool {
    let now = Instant::now();
    if let Some(previous) = *last {
        if now.duration_since(previous) < Duration::from_millis(interval_ms) {
            return false;
        }
    }
    *last = Some(now);
    true
}

fn is_stale(last_ok: Option<Instant>, max_gap_ms: u64) -> bool {
    last_ok
        .map(|at| at.elapsed() > Duration::from_millis(max_gap_ms))
        .unwrap_or(false)
}
