//! Desktop serial-to-HTTP bridge.
//!
//! Watches the node's serial line stream for sensor lines, rate limits
//! them, and posts each admitted record as JSON to an HTTP endpoint. The
//! HTTP client sits behind the [`Uploader`] trait so the loop can be tested
//! without a network.

use chrono::Local;
use std::future::Future;
use std::io::{self, Write};
use std::pin::Pin;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

/// Default minimum interval between uploads.
pub const DEFAULT_UPLOAD_PERIOD: Duration = Duration::from_millis(1_000);

/// Hard floor for the upload period, enforced at construction.
pub const MIN_UPLOAD_PERIOD: Duration = Duration::from_millis(100);

/// One record admitted for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRecord {
    /// Monotonic sequence number, counting admitted records only.
    pub sequence: u32,
    pub temperature_c: f32,
    pub humidity_pct: f32,
    /// Local wall clock, `dd/mm/yyyy hh:mm:ss`.
    pub timestamp: String,
}

/// Errors returned by the upload path.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint returned status {0}")]
    Status(u16),
}

/// Upload seam; keeps the HTTP client out of the core loop.
pub trait Uploader {
    fn upload(
        &self,
        record: &UploadRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + '_>>;
}

/// Posts records to a fixed HTTP endpoint as JSON.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    url: String,
}

impl HttpUploader {
    pub fn new(url: String) -> Self {
        HttpUploader {
            client: reqwest::Client::new(),
            url,
        }
    }
}

impl Uploader for HttpUploader {
    fn upload(
        &self,
        record: &UploadRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + '_>> {
        let payload = serde_json::json!({
            "STT": record.sequence,
            "Temp": record.temperature_c,
            "Hum": record.humidity_pct,
            "Time": record.timestamp,
        });
        Box::pin(async move {
            let response = self.client.post(&self.url).json(&payload).send().await?;
            if !response.status().is_success() {
                return Err(UploadError::Status(response.status().as_u16()));
            }
            Ok(())
        })
    }
}

/// Admits at most one upload per interval. Suppressed lines are dropped,
/// not queued; the first line is always admitted.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl RateLimiter {
    /// Create a limiter; intervals below [`MIN_UPLOAD_PERIOD`] are clamped
    /// up to it.
    pub fn new(interval: Duration) -> Self {
        RateLimiter {
            interval: interval.max(MIN_UPLOAD_PERIOD),
            last_emit: None,
        }
    }

    /// Whether an event at `now` should be admitted. Admission resets the
    /// interval; suppression does not.
    pub fn should_emit(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        RateLimiter::new(DEFAULT_UPLOAD_PERIOD)
    }
}

/// Match `Humidity: <float>%, Temperature: <float> C` anywhere in a line.
///
/// Returns `(humidity, temperature)`. Leading noise (timestamps, log tags)
/// is tolerated; anything that does not complete the pattern is rejected.
pub fn parse_sensor_line(line: &str) -> Option<(f32, f32)> {
    let rest = &line[line.find("Humidity:")? + "Humidity:".len()..];
    let (hum_str, rest) = rest.split_once('%')?;
    let humidity: f32 = hum_str.trim().parse().ok()?;

    let rest = rest.strip_prefix(',')?.trim_start();
    let rest = rest.strip_prefix("Temperature:")?;
    let mut tokens = rest.split_whitespace();
    let temperature: f32 = tokens.next()?.parse().ok()?;
    match tokens.next() {
        Some("C") => Some((humidity, temperature)),
        _ => None,
    }
}

/// Parse an upload period: a bare number is milliseconds; `ms` and `s`
/// suffixes are accepted.
pub fn parse_period(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty period".to_string());
    }
    if let Some(num) = src.strip_suffix("ms") {
        let ms: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid milliseconds: {num}"))?;
        return Ok(Duration::from_millis(ms));
    }
    if let Some(num) = src.strip_suffix('s') {
        let secs: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid seconds: {num}"))?;
        return Ok(Duration::from_secs(secs));
    }
    let ms: u64 = src.parse().map_err(|_| format!("invalid period: {src}"))?;
    Ok(Duration::from_millis(ms))
}

/// Local wall clock in the endpoint's `dd/mm/yyyy hh:mm:ss` format.
pub fn local_timestamp() -> String {
    Local::now().format("%d/%m/%Y %H:%M:%S").to_string()
}

/// Run the bridge loop until the line channel closes.
///
/// Non-matching lines and rate-suppressed lines are dropped. Upload
/// failures are reported on `err` and do not stop the loop.
pub async fn run_bridge(
    lines: &mut mpsc::Receiver<String>,
    uploader: &dyn Uploader,
    limiter: &mut RateLimiter,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> io::Result<()> {
    let mut sequence = 0u32;

    while let Some(line) = lines.recv().await {
        let Some((humidity, temperature)) = parse_sensor_line(&line) else {
            continue;
        };
        if !limiter.should_emit(Instant::now()) {
            continue;
        }

        sequence += 1;
        let record = UploadRecord {
            sequence,
            temperature_c: temperature,
            humidity_pct: humidity,
            timestamp: local_timestamp(),
        };

        match uploader.upload(&record).await {
            Ok(()) => writeln!(
                out,
                "#{} T={:.2} H={:.2} uploaded",
                record.sequence, temperature, humidity
            )?,
            Err(e) => writeln!(err, "upload failed: {e}")?,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct FakeUploader {
        records: Mutex<Vec<UploadRecord>>,
        fail: bool,
    }

    impl Uploader for FakeUploader {
        fn upload(
            &self,
            record: &UploadRecord,
        ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + '_>> {
            let record = record.clone();
            Box::pin(async move {
                if self.fail {
                    return Err(UploadError::Status(500));
                }
                self.records.lock().unwrap().push(record);
                Ok(())
            })
        }
    }

    async fn send_lines(lines: Vec<&str>) -> (FakeUploader, String, String) {
        let uploader = FakeUploader::default();
        let mut limiter = RateLimiter::new(Duration::from_millis(100));

        let (tx, mut rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            tx.send(line.to_string()).await.unwrap();
        }
        drop(tx);

        let mut out = Vec::new();
        let mut err = Vec::new();
        run_bridge(&mut rx, &uploader, &mut limiter, &mut out, &mut err)
            .await
            .unwrap();
        (
            uploader,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_parse_sensor_line() {
        assert_eq!(
            parse_sensor_line("Humidity: 60.50%, Temperature: 30.25 C"),
            Some((60.50, 30.25))
        );
        // Leading noise from the node's log stream is tolerated.
        assert_eq!(
            parse_sensor_line("\t Humidity: 45.00%, Temperature: -10.50 C"),
            Some((45.00, -10.50))
        );
    }

    #[test]
    fn test_parse_sensor_line_rejects_partial_pattern() {
        assert_eq!(parse_sensor_line(""), None);
        assert_eq!(parse_sensor_line("Humidity: 60.50%"), None);
        assert_eq!(parse_sensor_line("Humidity: 60.50%, Temperature: abc C"), None);
        assert_eq!(parse_sensor_line("Humidity: 60.50%, Temperature: 30.25"), None);
        assert_eq!(parse_sensor_line("Temperature: 30.25 C"), None);
        assert_eq!(parse_sensor_line("2 -61"), None);
    }

    #[test]
    fn test_rate_limiter_first_event_admitted() {
        let mut limiter = RateLimiter::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert!(limiter.should_emit(t0));
        assert!(!limiter.should_emit(t0));
    }

    #[test]
    fn test_rate_limiter_admits_after_interval() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(limiter.should_emit(t0));
        assert!(!limiter.should_emit(t0 + Duration::from_millis(99)));
        assert!(limiter.should_emit(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn test_rate_limiter_suppression_does_not_reset_interval() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(limiter.should_emit(t0));
        assert!(!limiter.should_emit(t0 + Duration::from_millis(60)));
        // Still measured from t0, not from the suppressed event.
        assert!(limiter.should_emit(t0 + Duration::from_millis(110)));
    }

    #[test]
    fn test_rate_limiter_clamps_to_floor() {
        let mut limiter = RateLimiter::new(Duration::from_millis(10));
        let t0 = Instant::now();
        assert!(limiter.should_emit(t0));
        // 10 ms requested, but the 100 ms floor applies.
        assert!(!limiter.should_emit(t0 + Duration::from_millis(50)));
        assert!(limiter.should_emit(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("1000").unwrap(), Duration::from_millis(1000));
        assert_eq!(parse_period("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_period("2s").unwrap(), Duration::from_secs(2));
        assert!(parse_period("").is_err());
        assert!(parse_period("fast").is_err());
    }

    #[test]
    fn test_timestamp_format() {
        let ts = local_timestamp();
        // dd/mm/yyyy hh:mm:ss
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[2..3], "/");
        assert_eq!(&ts[5..6], "/");
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[13..14], ":");
    }

    #[tokio::test]
    async fn test_bridge_uploads_matching_lines() {
        let (uploader, out, err) = send_lines(vec![
            "Humidity: 60.50%, Temperature: 30.25 C",
            "noise line",
        ])
        .await;

        let records = uploader.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[0].humidity_pct, 60.50);
        assert_eq!(records[0].temperature_c, 30.25);
        assert!(out.contains("#1"));
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn test_bridge_rate_limits_bursts() {
        let (uploader, _, _) = send_lines(vec![
            "Humidity: 60.00%, Temperature: 30.00 C",
            "Humidity: 61.00%, Temperature: 31.00 C",
            "Humidity: 62.00%, Temperature: 32.00 C",
        ])
        .await;

        // The burst arrives within one interval; only the first is admitted,
        // and the sequence counter never sees the suppressed lines.
        let records = uploader.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 1);
        assert_eq!(records[0].humidity_pct, 60.00);
    }

    #[tokio::test]
    async fn test_bridge_survives_upload_failure() {
        let uploader = FakeUploader {
            fail: true,
            ..FakeUploader::default()
        };
        let mut limiter = RateLimiter::default();

        let (tx, mut rx) = mpsc::channel(1);
        tx.send("Humidity: 60.50%, Temperature: 30.25 C".to_string())
            .await
            .unwrap();
        drop(tx);

        let mut out = Vec::new();
        let mut err = Vec::new();
        run_bridge(&mut rx, &uploader, &mut limiter, &mut out, &mut err)
            .await
            .unwrap();

        assert!(out.is_empty());
        let err = String::from_utf8(err).unwrap();
        assert!(err.contains("endpoint returned status 500"));
    }
}
