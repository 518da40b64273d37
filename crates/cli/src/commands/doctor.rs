use std::time::Instant;

use serde::Serialize;
use supportline_agent::capability::mcp::JsonRpcTransport;
use supportline_core::config::{AppConfig, LlmProvider, LoadOptions};
use supportline_core::domain::tool::Operation;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    elapsed_ms: u64,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            elapsed_ms: 0,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    let started = Instant::now();
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                elapsed_ms: elapsed_ms(started),
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_credentials(&config));
            checks.push(check_capability_provider(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                elapsed_ms: elapsed_ms(started),
                details: error.to_string(),
            });
            checks.push(DoctorCheck::skipped("llm_credentials"));
            checks.push(DoctorCheck::skipped("capability_provider"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_credentials(config: &AppConfig) -> DoctorCheck {
    let details = match config.llm.provider {
        LlmProvider::OpenAi => format!("api key present for model `{}`", config.llm.model),
        LlmProvider::Ollama => format!(
            "local provider at `{}`",
            config.llm.base_url.as_deref().unwrap_or("<unset>")
        ),
    };
    DoctorCheck { name: "llm_credentials", status: CheckStatus::Pass, elapsed_ms: 0, details }
}

fn check_capability_provider(config: &AppConfig) -> DoctorCheck {
    let started = Instant::now();
    let fail = |details: String| DoctorCheck {
        name: "capability_provider",
        status: CheckStatus::Fail,
        elapsed_ms: elapsed_ms(started),
        details,
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => return fail(format!("failed to initialize async runtime: {error}")),
    };

    let transport =
        match JsonRpcTransport::new(config.capability.base_url.clone(), config.capability.timeout())
        {
            Ok(transport) => transport,
            Err(error) => return fail(format!("failed to build http client: {error}")),
        };

    let advertised = match runtime.block_on(transport.list_tools()) {
        Ok(tools) => tools,
        Err(failure) => {
            return fail(format!(
                "`{}` did not answer tools/list: {}",
                transport.endpoint(),
                failure.message
            ))
        }
    };

    let missing: Vec<&str> = Operation::ALL
        .iter()
        .map(Operation::name)
        .filter(|name| !advertised.iter().any(|tool| tool == name))
        .collect();

    if missing.is_empty() {
        DoctorCheck {
            name: "capability_provider",
            status: CheckStatus::Pass,
            elapsed_ms: elapsed_ms(started),
            details: format!("`{}` advertises {} tools", transport.endpoint(), advertised.len()),
        }
    } else {
        fail(format!("provider is missing operations: {}", missing.join(", ")))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!(
            "- [{marker}] {} ({} ms): {}",
            check.name, check.elapsed_ms, check.details
        ));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
