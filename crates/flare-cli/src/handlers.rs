//! Command handlers.

use crate::config::CliConfig;
use anyhow::Context;
use chrono::Utc;
use console::style;
use flare_core::trigger::{ArtifactSelectionKind, ManifestSelectionKind, Trigger, TriggerCondition, WebhookToken};
use flare_db::Database;
use flare_triggers::webhook::{PayloadPlan, curl_example};
use flare_triggers::{CronValidator, FilterMatcher};
use tracing::info;

fn cron_validator(config: &CliConfig) -> CronValidator {
    CronValidator::new(config.engine.min_cron_interval_secs, config.engine.cron_lookahead)
}

pub fn cron_validate(config: &CliConfig, expression: &str) -> anyhow::Result<()> {
    cron_validator(config).validate(expression)?;
    println!("{} \"{}\" is a valid schedule", style("✓").green(), expression);
    Ok(())
}

pub fn cron_next(config: &CliConfig, expression: &str, count: usize) -> anyhow::Result<()> {
    let fires = cron_validator(config).next_fire_times(expression, Utc::now(), count)?;
    if fires.is_empty() {
        println!("{} \"{}\" never fires again", style("!").yellow(), expression);
    }
    for fire in fires {
        println!("  {}", fire.to_rfc3339());
    }
    Ok(())
}

/// Problems found without consulting any store.
pub fn check_trigger(trigger: &Trigger, cron: &CronValidator) -> Vec<String> {
    let filter = FilterMatcher::new();
    let mut problems = Vec::new();

    if trigger.name.trim().is_empty() {
        problems.push("Trigger name is required".to_string());
    }

    let condition = match &trigger.condition {
        TriggerCondition::NewArtifact(c) => c
            .artifact_filter
            .as_deref()
            .filter(|f| !f.is_empty())
            .map(|f| filter.validate(f, c.regex)),
        TriggerCondition::NewManifest(c) => c
            .version_regex
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(|r| filter.validate_version_regex(r)),
        TriggerCondition::Scheduled(c) => Some(cron.validate(&c.cron_expression)),
        TriggerCondition::NewInstance(_) if trigger.service_infra_workflows.is_empty() => {
            problems.push("New instance triggers need at least one service infra workflow".to_string());
            None
        }
        _ => None,
    };
    if let Some(Err(e)) = condition {
        problems.push(e.to_string());
    }

    for selection in &trigger.artifact_selections {
        if let ArtifactSelectionKind::LastCollected {
            artifact_filter: Some(f),
            regex,
            ..
        } = &selection.kind
        {
            if let Err(e) = filter.validate(f, *regex) {
                problems.push(e.to_string());
            }
        }
    }
    for selection in &trigger.manifest_selections {
        if let ManifestSelectionKind::LastCollected {
            version_regex: Some(r),
            ..
        } = &selection.kind
        {
            if let Err(e) = filter.validate_version_regex(r) {
                problems.push(e.to_string());
            }
        }
    }
    problems
}

pub fn trigger_validate(config: &CliConfig, path: &str) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let trigger: Trigger = serde_yaml::from_str(&content).context("parsing trigger")?;

    let problems = check_trigger(&trigger, &cron_validator(config));
    if problems.is_empty() {
        println!(
            "{} Trigger \"{}\" ({}) looks valid",
            style("✓").green(),
            trigger.name,
            trigger.condition_kind()
        );
        return Ok(());
    }
    for problem in &problems {
        println!("{} {}", style("✗").red(), problem);
    }
    anyhow::bail!("{} problem(s) found in {path}", problems.len())
}

pub fn webhook_payload(config: &CliConfig, path: &str, token: Option<String>) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let plan: PayloadPlan = serde_yaml::from_str(&content).context("parsing payload plan")?;
    let payload = plan.render()?;
    println!("{payload}");

    if let Some(token) = token {
        let token = WebhookToken {
            token,
            http_method: "POST".to_string(),
            payload,
        };
        println!();
        println!("{}", curl_example(&config.engine.portal_url, &token));
    }
    Ok(())
}

pub fn config_path() -> anyhow::Result<()> {
    println!("{}", CliConfig::default_path()?.display());
    Ok(())
}

pub async fn db_migrate(config: &CliConfig) -> anyhow::Result<()> {
    let database = config
        .database
        .as_ref()
        .context("no database configured; set DATABASE_URL or the database section")?;
    let db = Database::connect_with(database).await?;
    db.migrate().await?;
    info!("Migrations complete");
    println!("{} Database is up to date", style("✓").green());
    Ok(())
}

pub fn show_config(config: &CliConfig) -> anyhow::Result<()> {
    let mut shown = config.clone();
    if let Some(database) = shown.database.as_mut() {
        database.url = redact(&database.url);
    }
    print!("{}", serde_yaml::to_string(&shown)?);
    Ok(())
}

/// Hide the password of a connection URL.
fn redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((credentials, host)) => match credentials.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
            None => url.to_string(),
        },
        None => url.to_string(),
    }
}
