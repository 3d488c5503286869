use crate::cli::OutputFormat;
use crate::error::OctopingError;
use crate::metrics::collector::Metrics;
use crate::Result;
use std::fmt::Write;

/// Renders collected series in one of the offline formats. Prometheus text
/// is rendered from the agent's registry instead.
pub struct MetricsExporter {
    format: OutputFormat,
}

impl MetricsExporter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_metrics(&self, metrics: &Metrics) -> Result<String> {
        match self.format {
            OutputFormat::Text => Ok(format_table(metrics)),
            OutputFormat::Json => serde_json::to_string_pretty(metrics)
                .map(|mut s| {
                    s.push('\n');
                    s
                })
                .map_err(|e| OctopingError::MetricsError(e.to_string())),
            OutputFormat::Yaml => {
                serde_yaml::to_string(metrics).map_err(|e| OctopingError::MetricsError(e.to_string()))
            }
            OutputFormat::Prometheus => Err(OctopingError::MetricsError(
                "prometheus output is rendered from the registry".to_string(),
            )),
        }
    }
}

pub fn format_table(metrics: &Metrics) -> String {
    let name_width = metrics
        .series
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0)
        .max("METRIC".len());

    let mut out = String::new();
    let _ = writeln!(out, "{:<6} {:<w$} {:>14}", "PROBE", "METRIC", "VALUE", w = name_width);
    for series in &metrics.series {
        let _ = writeln!(
            out,
            "{:<6} {:<w$} {:>14}",
            series.probe,
            series.name,
            format_value(series.value),
            w = name_width
        );
    }
    out
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.3}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::collector::Series;

    fn sample() -> Metrics {
        Metrics {
            series: vec![
                Series {
                    probe: "icmp".to_string(),
                    node: "node-a".to_string(),
                    name: "nodes_total",
                    value: 2.0,
                },
                Series {
                    probe: "icmp".to_string(),
                    node: "node-a".to_string(),
                    name: "packet_loss_mean",
                    value: 0.5,
                },
            ],
        }
    }

    #[test]
    fn test_table() {
        let table = format_table(&sample());
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("PROBE"));
        assert!(lines[1].contains("nodes_total") && lines[1].ends_with(" 2"));
        assert!(lines[2].ends_with("0.500"));
    }

    #[test]
    fn test_json() {
        let json = MetricsExporter::new(OutputFormat::Json)
            .format_metrics(&sample())
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["series"][0]["name"], "nodes_total");
        assert_eq!(value["series"][1]["value"], 0.5);
    }

    #[test]
    fn test_yaml() {
        let yaml = MetricsExporter::new(OutputFormat::Yaml)
            .format_metrics(&sample())
            .unwrap();
        assert!(yaml.contains("name: packet_loss_mean"));
    }
}
