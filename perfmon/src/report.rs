//! Console reports. Rendering is pure so the text can be checked in tests.

use crate::config::MonitorConfig;

fn service_url<'a>(config: &'a MonitorConfig, name: &str, fallback: &'a str) -> &'a str {
    config
        .service(name)
        .map(|service| service.url.as_str())
        .unwrap_or(fallback)
}

fn service_port(config: &MonitorConfig, name: &str, fallback: u16) -> u16 {
    config
        .service(name)
        .map(|service| service.port)
        .unwrap_or(fallback)
}

/// Where to find the services and which commands are available, printed
/// after a successful init.
pub fn render_banner(config: &MonitorConfig) -> String {
    let grafana = service_url(config, "grafana", crate::config::DEFAULT_GRAFANA_URL);
    let influx_port = service_port(config, "influxdb", 8086);

    let mut lines = vec![
        "\n📊 Access your services:".to_string(),
        format!("   Grafana Dashboard: {grafana} (admin/admin)"),
        format!("   InfluxDB: http://localhost:{influx_port} (administrator/administrator)"),
        "\n📝 Available commands:".to_string(),
        "   perfmon test      - Run performance tests".to_string(),
        "   perfmon test:all  - Run all performance tests".to_string(),
        "   perfmon info      - Show system information".to_string(),
        "   docker compose up -d  - Start Docker services".to_string(),
        "   docker compose down   - Stop Docker services".to_string(),
    ];
    if config.heapdump.enabled {
        lines.push("   perfmon heapdump  - Take manual heap snapshot".to_string());
        lines.push("   kill -USR2 <pid>  - Take heap snapshot via signal".to_string());
    }
    finish(lines)
}

/// Architecture, configuration and project layout.
pub fn render_info(config: &MonitorConfig) -> String {
    let heapdump = &config.heapdump;
    let heapdump_dir = heapdump.directory.display();

    let mut lines = vec![
        "\n📋 Performance Monitoring System Info:".to_string(),
        "=====================================".to_string(),
        "🏗️  Architecture:".to_string(),
        "   • K6: Performance testing engine".to_string(),
        "   • InfluxDB: Time-series database for metrics".to_string(),
        "   • Grafana: Visualization and dashboards".to_string(),
        "   • Docker: Container orchestration".to_string(),
    ];
    if heapdump.enabled {
        lines.push("   • Heapdump: Memory profiling and snapshots".to_string());
    }

    lines.push("\n🔧 Configuration:".to_string());
    lines.push("   • Database: k6".to_string());
    lines.extend(config.services.iter().map(|service| {
        format!(
            "   • {}: {} (port {})",
            service.name, service.url, service.port
        )
    }));
    lines.push("   • Grafana Admin: admin/admin".to_string());
    lines.push("   • InfluxDB Admin: administrator/administrator".to_string());
    let engine = std::iter::once(config.engine.program.as_str())
        .chain(config.engine.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    lines.push(format!("   • Load-test engine: {engine}"));
    if heapdump.enabled {
        lines.push(format!("   • Heapdump Directory: {heapdump_dir}"));
        lines.push("   • Heapdump Enabled: true".to_string());
        if let Some(interval) = heapdump.interval {
            lines.push(format!("   • Heapdump Interval: {}s", interval.as_secs()));
        }
    }

    lines.push("\n📁 Project Structure:".to_string());
    lines.push("   • tests/performance/: K6 test scenarios".to_string());
    lines.push("   • dashboard/: Grafana dashboard configurations".to_string());
    lines.push("   • data/: Persistent data storage".to_string());
    lines.push("   • log/: Application logs".to_string());
    if heapdump.enabled {
        lines.push(format!("   • {heapdump_dir}/: Heap snapshots"));
    }
    finish(lines)
}

fn finish(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
