//! HTTP exporter: POSTs every reading as a JSON document.

use super::{ExportError, Exporter};
use crate::BoxFuture;
use crate::mac_address::MacAddress;
use crate::reading::Reading;
use reqwest::Client;
use reqwest::header::FROM;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;

/// Value of the `From` header sent with every request.
pub const FROM_HEADER_VALUE: &str = "ruuvitag-collector";

/// JSON body of a single reading.
///
/// Pressure is sent in hectopascals, acceleration in g.
#[derive(Debug, Serialize)]
pub struct JsonReading<'a> {
    pub mac: MacAddress,
    pub name: &'a str,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub tx_power: Option<i8>,
    pub acceleration_x: Option<f64>,
    pub acceleration_y: Option<f64>,
    pub acceleration_z: Option<f64>,
    pub movement_counter: Option<u32>,
    pub measurement_number: Option<u32>,
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
}

impl<'a> From<&'a Reading> for JsonReading<'a> {
    fn from(reading: &'a Reading) -> Self {
        let values = &reading.values;
        let (acceleration_x, acceleration_y, acceleration_z) = match values.acceleration {
            Some((x, y, z)) => (Some(x), Some(y), Some(z)),
            None => (None, None, None),
        };
        Self {
            mac: reading.device_id,
            name: &reading.name,
            temperature: values.temperature,
            humidity: values.humidity,
            pressure: values.pressure.map(|pa| pa / 100.0),
            battery_voltage: values.battery,
            tx_power: values.tx_power,
            acceleration_x,
            acceleration_y,
            acceleration_z,
            movement_counter: values.movement_counter,
            measurement_number: values.measurement_sequence,
            ts: OffsetDateTime::from(reading.timestamp),
        }
    }
}

/// Exporter POSTing readings to one URL.
///
/// `close` drops the HTTP client, releasing its pooled connections. Exports
/// after that fail with [`ExportError::Closed`].
pub struct HttpExporter {
    client: Mutex<Option<Client>>,
    url: String,
    token: Option<String>,
}

impl HttpExporter {
    /// Build an exporter posting to `url`.
    ///
    /// `token`, when present, is sent as a bearer token. `timeout` bounds each
    /// request.
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ExportError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(ExportError::Config("HTTP URL must be non-empty".into()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client: Mutex::new(Some(client)),
            url,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn client(&self) -> Result<Client, ExportError> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ExportError::Closed)
    }

    async fn post(&self, client: &Client, reading: &Reading) -> Result<(), ExportError> {
        let mut request = client
            .post(&self.url)
            .header(FROM, FROM_HEADER_VALUE)
            .json(&JsonReading::from(reading));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

impl Exporter for HttpExporter {
    fn name(&self) -> String {
        format!("HTTP ({})", self.url)
    }

    fn export<'a>(&'a self, readings: &'a [Reading]) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            if readings.is_empty() {
                return Err(ExportError::NoMeasurements);
            }
            let client = self.client()?;
            for reading in readings {
                self.post(&client, reading).await?;
            }
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), ExportError>> {
        Box::pin(async move {
            self.client
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_reading;
    use std::time::SystemTime;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one request, answer with `status` and return the raw request.
    async fn serve_once(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/readings", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response =
                format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8(request).unwrap()
        });
        (url, handle)
    }

    #[test]
    fn json_body_matches_reading() {
        let mut reading = test_reading("Backyard", 21.5);
        reading.timestamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_577_836_800);
        reading.values.pressure = Some(100_200.0);
        reading.values.acceleration = Some((0.0, 0.5, 1.0));

        let json = serde_json::to_value(JsonReading::from(&reading)).unwrap();
        assert_eq!(json["mac"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(json["name"], "Backyard");
        assert_eq!(json["temperature"], 21.5);
        assert_eq!(json["pressure"], 1002.0);
        assert_eq!(json["acceleration_y"], 0.5);
        assert!(json["humidity"].is_null());
        assert_eq!(json["ts"], "2020-01-01T00:00:00Z");
    }

    #[test]
    fn rejects_empty_url() {
        let result = HttpExporter::new("  ", None, Duration::from_secs(1));
        assert!(matches!(result, Err(ExportError::Config(_))));
    }

    #[test]
    fn name_includes_url() {
        let exporter =
            HttpExporter::new("http://localhost:8080/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(exporter.name(), "HTTP (http://localhost:8080/)");
    }

    #[tokio::test]
    async fn rejects_empty_batch() {
        let exporter =
            HttpExporter::new("http://localhost:8080/", None, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            exporter.export(&[]).await,
            Err(ExportError::NoMeasurements)
        ));
    }

    #[tokio::test]
    async fn export_after_close_fails() {
        let exporter =
            HttpExporter::new("http://localhost:8080/", None, Duration::from_secs(1)).unwrap();

        exporter.close().await.unwrap();
        exporter.close().await.unwrap();

        assert!(matches!(
            exporter.export(&[test_reading("Backyard", 21.5)]).await,
            Err(ExportError::Closed)
        ));
    }

    #[tokio::test]
    async fn posts_json_with_headers() {
        let (url, server) = serve_once("200 OK").await;
        let exporter =
            HttpExporter::new(url, Some("secret".into()), Duration::from_secs(5)).unwrap();

        exporter
            .export(&[test_reading("Backyard", 21.5)])
            .await
            .unwrap();

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /readings HTTP/1.1"));
        assert!(lower.contains("content-type: application/json"));
        assert!(lower.contains("from: ruuvitag-collector"));
        assert!(lower.contains("authorization: bearer secret"));
        assert!(request.contains("\"name\":\"Backyard\""));
        assert!(request.contains("\"temperature\":21.5"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (url, server) = serve_once("500 Internal Server Error").await;
        let exporter = HttpExporter::new(url, None, Duration::from_secs(5)).unwrap();

        let result = exporter.export(&[test_reading("Backyard", 21.5)]).await;

        assert!(matches!(result, Err(ExportError::Status { status: 500, .. })));
        let request = server.await.unwrap();
        assert!(!request.to_ascii_lowercase().contains("authorization:"));
    }
}
