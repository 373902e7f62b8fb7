//! Reachability checks for the external services of the stack.
//!
//! Each configured endpoint gets exactly one GET request, no retries. The
//! outcome is reported, never propagated: a stopped Grafana must not abort
//! `perfmon` itself.

use crate::config::ServiceEndpoint;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ProberError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    /// The endpoint answered with a 2xx status (InfluxDB's ping answers 204).
    Ok { status: u16 },
    /// The endpoint answered, but not with a success status.
    Unhealthy { status: u16 },
    /// No HTTP response: connection refused, timeout, DNS failure.
    Unreachable { reason: String },
}

impl ProbeStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeStatus::Ok { .. })
    }
}

/// Map an HTTP status code onto a probe outcome.
pub fn classify_status(status: StatusCode) -> ProbeStatus {
    if status.is_success() || status == StatusCode::NO_CONTENT {
        ProbeStatus::Ok {
            status: status.as_u16(),
        }
    } else {
        ProbeStatus::Unhealthy {
            status: status.as_u16(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceReport {
    pub service: ServiceEndpoint,
    pub status: ProbeStatus,
}

impl ServiceReport {
    /// Console lines describing this report.
    pub fn status_lines(&self) -> Vec<String> {
        let ServiceEndpoint { name, port, .. } = &self.service;
        match &self.status {
            ProbeStatus::Ok { .. } => vec![format!("✅ {name} is running on port {port}")],
            ProbeStatus::Unhealthy { status } => {
                vec![format!("⚠️  {name} responded with status {status}")]
            }
            ProbeStatus::Unreachable { .. } => vec![
                format!("❌ {name} is not running on port {port}"),
                "   Start services with: docker compose up -d".to_string(),
            ],
        }
    }
}

pub struct ServiceProber {
    client: reqwest::Client,
    services: Vec<ServiceEndpoint>,
}

impl ServiceProber {
    pub fn new(services: Vec<ServiceEndpoint>, timeout: Duration) -> Result<Self, ProberError> {
        // The stack runs on localhost; environment proxies must not intercept it.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;

        Ok(Self { client, services })
    }

    pub fn services(&self) -> &[ServiceEndpoint] {
        &self.services
    }

    /// Issue one GET against `service` and classify the result.
    pub async fn probe(&self, service: &ServiceEndpoint) -> ProbeStatus {
        debug!("Probing {} at {}", service.name, service.url);

        match self.client.get(&service.url).send().await {
            Ok(response) => classify_status(response.status()),
            Err(e) => ProbeStatus::Unreachable {
                reason: e.to_string(),
            },
        }
    }

    /// Probe every configured service in order, printing one status line per
    /// service.
    pub async fn check_all(&self) -> Vec<ServiceReport> {
        println!("🔍 Checking service status...");

        let mut reports = Vec::with_capacity(self.services.len());
        for service in &self.services {
            let status = self.probe(service).await;

            match &status {
                ProbeStatus::Ok { status } => {
                    info!(service = %service.name, status, "service reachable")
                }
                ProbeStatus::Unhealthy { status } => {
                    warn!(service = %service.name, status, "service unhealthy")
                }
                ProbeStatus::Unreachable { reason } => {
                    warn!(service = %service.name, %reason, "service unreachable")
                }
            }

            let report = ServiceReport {
                service: service.clone(),
                status,
            };
            for line in report.status_lines() {
                println!("{}", line);
            }
            reports.push(report);
        }

        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `status_line` to every connection; returns the base URL.
    async fn stub_server(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{addr}")
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}/ping")
    }

    fn prober(services: Vec<ServiceEndpoint>) -> ServiceProber {
        ServiceProber::new(services, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), ProbeStatus::Ok { status: 200 });
        assert_eq!(
            classify_status(StatusCode::NO_CONTENT),
            ProbeStatus::Ok { status: 204 }
        );
        assert_eq!(
            classify_status(StatusCode::FOUND),
            ProbeStatus::Unhealthy { status: 302 }
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            ProbeStatus::Unhealthy { status: 503 }
        );
    }

    #[test]
    fn test_status_lines() {
        let report = ServiceReport {
            service: ServiceEndpoint::influxdb(),
            status: ProbeStatus::Unreachable {
                reason: "connection refused".to_string(),
            },
        };
        let lines = report.status_lines();
        assert_eq!(lines[0], "❌ influxdb is not running on port 8086");
        assert!(lines[1].contains("Start services"));

        let report = ServiceReport {
            service: ServiceEndpoint::grafana(),
            status: ProbeStatus::Unhealthy { status: 500 },
        };
        assert_eq!(
            report.status_lines(),
            vec!["⚠️  grafana responded with status 500".to_string()]
        );
    }

    #[tokio::test]
    async fn test_probe_no_content_is_ok() {
        let url = stub_server("204 No Content").await;
        let service = ServiceEndpoint::new("influxdb", format!("{url}/ping"));

        let status = prober(vec![]).probe(&service).await;
        assert_eq!(status, ProbeStatus::Ok { status: 204 });
    }

    #[tokio::test]
    async fn test_probe_server_error_is_unhealthy() {
        let url = stub_server("500 Internal Server Error").await;
        let service = ServiceEndpoint::new("grafana", url);

        let status = prober(vec![]).probe(&service).await;
        assert_eq!(status, ProbeStatus::Unhealthy { status: 500 });
    }

    #[tokio::test]
    async fn test_probe_closed_port_is_unreachable() {
        let service = ServiceEndpoint::new("influxdb", closed_port_url());

        let status = prober(vec![]).probe(&service).await;
        assert!(matches!(status, ProbeStatus::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_check_all_reports_every_service_in_order() {
        let healthy = stub_server("200 OK").await;
        let broken = stub_server("503 Service Unavailable").await;
        let services = vec![
            ServiceEndpoint::new("grafana", healthy),
            ServiceEndpoint::new("influxdb", closed_port_url()),
            ServiceEndpoint::new("extra", broken),
        ];

        let reports = prober(services).check_all().await;

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].service.name, "grafana");
        assert!(reports[0].status.is_ok());
        assert!(matches!(reports[1].status, ProbeStatus::Unreachable { .. }));
        assert_eq!(reports[2].status, ProbeStatus::Unhealthy { status: 503 });
    }
}
