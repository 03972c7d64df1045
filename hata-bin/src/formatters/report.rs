use std::fmt::{self, Display};
use std::time::Duration;

use anyhow::Result;
use console::Style;
use hata_lib::connector::PoolStats;
use hata_lib::ratelimit::HandlerSnapshot;
use hata_lib::{ErrorKind, Response};
use http::StatusCode;
use serde::Serialize;

use crate::formatters::color::{BOLD_PINK, DIM, GREEN, PINK, YELLOW, color};
use crate::options::OutputFormat;

/// Result of one of the issued requests
#[derive(Debug, Serialize)]
pub(crate) struct Outcome {
    /// Position of the request in the batch, starting at 1
    pub(crate) request: usize,
    #[serde(serialize_with = "serialize_status")]
    pub(crate) status: Option<StatusCode>,
    #[serde(with = "humantime_serde")]
    pub(crate) elapsed: Duration,
    /// `X-RateLimit-Remaining` of the final response
    pub(crate) remaining: Option<usize>,
    pub(crate) body: String,
    pub(crate) error: Option<String>,
}

impl Outcome {
    pub(crate) fn new(
        request: usize,
        elapsed: Duration,
        result: hata_lib::Result<Response>,
    ) -> Self {
        match result {
            Ok(response) => Self {
                request,
                status: Some(response.status()),
                elapsed,
                remaining: response.rate_limit().remaining,
                body: response.text().into_owned(),
                error: None,
            },
            Err(ErrorKind::RejectedStatusCode { status, body }) => Self {
                request,
                status: Some(status),
                elapsed,
                remaining: None,
                body: String::from_utf8_lossy(&body).into_owned(),
                error: Some(format!("Rejected status code: {status}")),
            },
            Err(error) => Self {
                request,
                status: None,
                elapsed,
                remaining: None,
                body: String::new(),
                error: Some(error.to_string()),
            },
        }
    }

    pub(crate) const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

fn serialize_status<S: serde::Serializer>(
    status: &Option<StatusCode>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match status {
        Some(status) => serializer.serialize_some(&status.as_u16()),
        None => serializer.serialize_none(),
    }
}

/// Rate limit state of the handler the requests went through
#[derive(Debug, Serialize)]
pub(crate) struct HandlerReport {
    pub(crate) size: usize,
    pub(crate) active: usize,
    pub(crate) cooling_down: usize,
    pub(crate) queued: usize,
}

impl From<HandlerSnapshot> for HandlerReport {
    fn from(snapshot: HandlerSnapshot) -> Self {
        Self {
            size: snapshot.size,
            active: snapshot.active,
            cooling_down: snapshot.drops,
            queued: snapshot.queued,
        }
    }
}

/// State of the connection pool after the run
#[derive(Debug, Serialize)]
pub(crate) struct PoolReport {
    pub(crate) idle: usize,
    pub(crate) active: usize,
}

impl From<PoolStats> for PoolReport {
    fn from(stats: PoolStats) -> Self {
        Self {
            idle: stats.idle,
            active: stats.active + stats.dialing,
        }
    }
}

/// Everything a run of the CLI observed
#[derive(Debug, Serialize)]
pub(crate) struct Report {
    pub(crate) method: String,
    pub(crate) url: String,
    pub(crate) total: usize,
    pub(crate) successful: usize,
    pub(crate) failed: usize,
    /// Whether Discord's global rate limit was still in effect at the end
    pub(crate) global_locked: bool,
    pub(crate) handler: HandlerReport,
    pub(crate) pool: PoolReport,
    pub(crate) outcomes: Vec<Outcome>,
}

impl Report {
    pub(crate) const fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Render the report in the given format
    pub(crate) fn format(&self, format: OutputFormat) -> Result<String> {
        Ok(match format {
            OutputFormat::Json => serde_json::to_string_pretty(self)?,
            _ => self.to_string(),
        })
    }
}

fn status_style(outcome: &Outcome) -> &'static Style {
    match outcome.status {
        _ if outcome.is_success() => &GREEN,
        Some(StatusCode::TOO_MANY_REQUESTS) => &YELLOW,
        _ => &PINK,
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            let style = status_style(outcome);
            let status = outcome
                .status
                .map_or_else(|| "ERR".to_string(), |status| status.as_u16().to_string());
            color!(f, style, "[{}]", status)?;
            write!(f, " {} {} ", self.method, self.url)?;
            color!(f, DIM, "({}ms)", outcome.elapsed.as_millis())?;
            if let Some(error) = &outcome.error {
                write!(f, " | {error}")?;
            }
            writeln!(f)?;
        }

        // A single request prints its payload like curl would
        if let [outcome] = self.outcomes.as_slice()
            && !outcome.body.is_empty()
        {
            writeln!(f, "{}", outcome.body)?;
        }

        writeln!(f)?;
        let summary = format!(
            "{} Total, {} OK, {} Errors",
            self.total, self.successful, self.failed
        );
        if self.is_success() {
            color!(f, GREEN, "{}\n", summary)?;
        } else {
            color!(f, BOLD_PINK, "{}\n", summary)?;
        }

        let handler = &self.handler;
        writeln!(
            f,
            "Rate limit: budget {}, {} active, {} cooling down, {} queued",
            handler.size, handler.active, handler.cooling_down, handler.queued
        )?;
        if self.global_locked {
            color!(f, YELLOW, "{}\n", "Global rate limit in effect")?;
        }
        write!(
            f,
            "Connections: {} idle, {} active",
            self.pool.idle, self.pool.active
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    use super::*;

    fn report(outcomes: Vec<Outcome>) -> Report {
        let successful = outcomes.iter().filter(|outcome| outcome.is_success()).count();
        Report {
            method: "GET".to_string(),
            url: "https://discord.com/api/v10/channels/1".to_string(),
            total: outcomes.len(),
            successful,
            failed: outcomes.len() - successful,
            global_locked: false,
            handler: HandlerReport {
                size: 5,
                active: 0,
                cooling_down: 1,
                queued: 0,
            },
            pool: PoolReport { idle: 1, active: 0 },
            outcomes,
        }
    }

    #[test]
    fn test_rejected_outcome_keeps_body() {
        let outcome = Outcome::new(
            1,
            Duration::from_millis(12),
            Err(ErrorKind::RejectedStatusCode {
                status: StatusCode::NOT_FOUND,
                body: r#"{"message": "Unknown Channel"}"#.into(),
            }),
        );
        assert!(!outcome.is_success());
        assert_eq!(outcome.status, Some(StatusCode::NOT_FOUND));
        assert!(outcome.body.contains("Unknown Channel"));
    }

    #[test]
    fn test_compact_output() {
        console::set_colors_enabled(false);
        let failed = Outcome::new(2, Duration::from_millis(3), Err(ErrorKind::Timeout));
        let output = report(vec![failed]).to_string();

        assert!(output.contains("[ERR] GET https://discord.com/api/v10/channels/1 (3ms) | Request timed out"));
        assert!(output.contains("1 Total, 0 OK, 1 Errors"));
        assert!(output.contains("Rate limit: budget 5, 0 active, 1 cooling down, 0 queued"));
        assert!(output.ends_with("Connections: 1 idle, 0 active"));
    }

    #[test]
    fn test_json_output() {
        let failed = Outcome::new(1, Duration::from_millis(40), Err(ErrorKind::ConnectorClosed));
        let output = report(vec![failed]).format(OutputFormat::Json).unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["failed"], 1);
        assert_eq!(value["handler"]["size"], 5);
        assert_eq!(
            value["outcomes"][0],
            json!({
                "request": 1,
                "status": null,
                "elapsed": "40ms",
                "remaining": null,
                "body": "",
                "error": "Connector is closed",
            })
        );
    }
}
