//! CLI smoke entry point.
//!
//! # Responsibility
//! - Wire the embedded backend, change hub, store and binder end to end.
//! - Seed a demo book of leads, then print the store after the initial load,
//!   a detail update and a lead delete.

use clap::Parser;
use leadsync_core::model::caller::{CallerRole, OwnerScope};
use leadsync_core::model::lead::{DetailPatch, LeadDetail, LeadRecord};
use leadsync_core::{
    default_log_level, init_logging, init_stderr_logging, ChangeChannelAdapter, ChangeTransport,
    LeadStore, LocalChangeHub, LogNotifier, SqliteLeadBackend, SubscriptionBinder, SyncConfig,
};
use log::info;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Lead sync smoke run over an in-memory backend", long_about = None)]
struct Cli {
    /// JSON sync config; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = default_log_level().to_string())]
    log_level: String,
    /// Absolute directory for rolling log files; logs go to stderr otherwise.
    #[arg(long)]
    log_dir: Option<String>,
    /// Role provisioned for the demo caller (agent, manager, admin, super_admin).
    #[arg(long, default_value = "agent", value_parser = parse_role)]
    role: CallerRole,
    /// How long to wait for change events to settle between steps.
    #[arg(long, default_value_t = 50)]
    settle_ms: u64,
}

fn parse_role(value: &str) -> Result<CallerRole, String> {
    CallerRole::parse(value).ok_or_else(|| format!("unknown role `{value}`"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("leadsync: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    match cli.log_dir.as_deref() {
        Some(dir) => init_logging(&cli.log_level, dir)?,
        None => init_stderr_logging(&cli.log_level)?,
    }

    let config = match &cli.config {
        Some(path) => SyncConfig::load(path).map_err(|err| err.to_string())?,
        None => SyncConfig::default(),
    };
    config.validate().map_err(|err| err.to_string())?;

    let hub = Arc::new(LocalChangeHub::new());
    let backend = Arc::new(
        SqliteLeadBackend::open_in_memory()
            .map_err(|err| err.to_string())?
            .with_change_hub(Arc::clone(&hub), &config),
    );

    let caller = OwnerScope::new(Uuid::new_v4(), cli.role);
    let seeded = seed_demo(&backend, caller).map_err(|err| err.to_string())?;
    info!(
        "event=cli_seed module=cli status=ok leads={} role={}",
        seeded.len(),
        caller.role.as_str()
    );

    let transport: Arc<dyn ChangeTransport> = hub;
    let adapter = Arc::new(ChangeChannelAdapter::new(
        transport,
        config.namespace.clone(),
        config.schema.clone(),
    ));
    let binder = SubscriptionBinder::new(adapter, &config);
    let store = LeadStore::new(
        Arc::clone(&backend),
        Some(caller),
        config.clone(),
        Arc::new(LogNotifier),
    );
    let settle = Duration::from_millis(cli.settle_ms);

    let binding = binder.mount(&store).await;
    print_leads("initial load", &store);

    if let Some(detail_id) = seeded.first().and_then(|record| record.detail_id) {
        let patch = DetailPatch::new(detail_id).with_stage("underwriting");
        backend.update_detail(&patch).map_err(|err| err.to_string())?;
        tokio::time::sleep(settle).await;
        print_leads("after stage update", &store);
    }

    if let Some(record) = seeded.last() {
        backend.delete_lead(record.id).map_err(|err| err.to_string())?;
        tokio::time::sleep(settle).await;
        print_leads("after delete", &store);
    }

    binder.unbind(binding);
    store.clear();
    Ok(())
}

/// Seeds two owned leads, one shared lead and one the caller cannot see.
fn seed_demo(
    backend: &SqliteLeadBackend,
    caller: OwnerScope,
) -> leadsync_core::BackendResult<Vec<LeadRecord>> {
    let teammate = Uuid::new_v4();
    backend.provision_role(caller.user_id, caller.role)?;
    backend.provision_role(teammate, CallerRole::Agent)?;

    let mut visible = Vec::new();
    visible.push(backend.insert_lead(
        caller.user_id,
        Some(&demo_detail("Ada", "Lovelace", "Analytical Engines", 250_000, "new")),
    )?);
    visible.push(backend.insert_lead(
        caller.user_id,
        Some(&demo_detail("Grace", "Hopper", "Compiler Works", 120_000, "qualified")),
    )?);

    let mut shared_detail = demo_detail("Alan", "Turing", "Bletchley Freight", 80_000, "new");
    shared_detail.redacted_fields = vec!["email".to_string(), "phone".to_string()];
    let shared = backend.insert_lead(teammate, Some(&shared_detail))?;
    backend.grant_access(shared.id, caller.user_id)?;
    visible.push(shared);

    backend.insert_lead(
        teammate,
        Some(&demo_detail("Edsger", "Dijkstra", "Shortest Path LLC", 60_000, "new")),
    )?;
    Ok(visible)
}

fn demo_detail(first: &str, last: &str, business: &str, amount: i64, stage: &str) -> LeadDetail {
    let mut detail = LeadDetail::new(Uuid::new_v4());
    detail.first_name = Some(first.to_string());
    detail.last_name = Some(last.to_string());
    detail.email = Some(format!("{}@example.com", first.to_ascii_lowercase()));
    detail.phone = Some("555-0100".to_string());
    detail.business_name = Some(business.to_string());
    detail.loan_amount = Some(Decimal::from(amount));
    detail.loan_type = Some("term".to_string());
    detail.stage = Some(stage.to_string());
    detail.priority = Some("normal".to_string());
    detail
}

fn print_leads(label: &str, store: &LeadStore<Arc<SqliteLeadBackend>>) {
    let view = store.snapshot();
    println!(
        "== {label}: {} leads (loading={}, error={})",
        view.records.len(),
        view.loading,
        view.error.as_deref().unwrap_or("-")
    );
    for lead in &view.records {
        println!(
            "#{:<4} {:<20} {:<22} {:<24} {:>12} {}",
            lead.lead_number,
            lead.display_name,
            lead.business_name,
            lead.email,
            lead.loan_amount,
            lead.stage
        );
    }
}
