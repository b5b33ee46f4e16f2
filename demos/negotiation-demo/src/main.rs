use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use contract_negotiators::engine::Outcome;
use contract_negotiators::factory::{create_negotiations, AuditConfig};
use contract_negotiators::terms::ConstraintSet;
use contract_negotiators::{
    ContractRecord, LedgerSink, NegotiationConfig, Negotiations, SignatureOutcome,
    SignatureProvider,
};

#[derive(clap::Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Negotiation config in YAML. Defaults are used if not set.
    #[clap(long, env = "NEGOTIATION_CONFIG")]
    pub config: Option<PathBuf>,
    /// YAML file with `party_a` and `party_b` constraint sets.
    #[clap(long)]
    pub parties: Option<PathBuf>,
    /// Store audit trail in JSON lines file.
    #[clap(long)]
    pub audit_file: Option<PathBuf>,
    /// Signatories that refuse to sign.
    #[clap(long)]
    pub decline: Vec<String>,
}

#[derive(serde::Deserialize)]
struct Parties {
    party_a: ConstraintSet,
    party_b: ConstraintSet,
}

fn default_parties() -> Parties {
    Parties {
        party_a: ConstraintSet::new("Party A")
            .with_range("duration", 12.0, 24.0, 2.0)
            .with_range("payment-amount", 4000.0, 5000.0, 1.0)
            .with_one_of("payment-cadence", &["monthly", "quarterly"], 1.0)
            .with_one_of("support-level", &["24/7", "business-hours"], 1.0)
            .with_one_of("security-tier", &["high", "standard"], 3.0),
        party_b: ConstraintSet::new("Party B")
            .with_range("duration", 12.0, 18.0, 2.0)
            .with_range("payment-amount", 4500.0, 6000.0, 2.0)
            .with_one_of("payment-cadence", &["quarterly", "monthly"], 1.0)
            .with_one_of("support-level", &["business-hours"], 1.0)
            .with_one_of("security-tier", &["basic", "standard"], 1.0),
    }
}

/// Signs for everyone except listed signatories.
struct DemoSignatures {
    declining: Vec<String>,
}

#[async_trait(?Send)]
impl SignatureProvider for DemoSignatures {
    async fn acquire_signature(
        &self,
        contract_id: &str,
        signatory: &str,
    ) -> anyhow::Result<SignatureOutcome> {
        let outcome = match self.declining.iter().any(|name| name == signatory) {
            true => SignatureOutcome::Declined,
            false => SignatureOutcome::Signed,
        };
        println!("  Signature of {signatory} for contract {}: {outcome}", &contract_id[..12]);
        Ok(outcome)
    }
}

#[derive(Default)]
struct DemoLedger {
    transactions: AtomicU64,
}

#[async_trait(?Send)]
impl LedgerSink for DemoLedger {
    async fn commit(&self, record: &ContractRecord) -> anyhow::Result<String> {
        let tx = self.transactions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("demo-tx-{tx}-{}", &record.id[..8]))
    }
}

fn load_config(args: &Args) -> anyhow::Result<NegotiationConfig> {
    let mut config = match &args.config {
        Some(path) => NegotiationConfig::from_file(path)?,
        None => NegotiationConfig::default(),
    };
    if let Some(path) = &args.audit_file {
        config.audit = AuditConfig::JsonLines { path: path.clone() };
    }
    Ok(config)
}

fn load_parties(args: &Args) -> anyhow::Result<Parties> {
    match &args.parties {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Reading parties: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Parsing parties: {}", path.display()))
        }
        None => Ok(default_parties()),
    }
}

#[actix_rt::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let parties = load_parties(&args)?;
    let negotiations = create_negotiations(
        config,
        Arc::new(DemoSignatures {
            declining: args.decline.clone(),
        }),
        Arc::new(DemoLedger::default()),
    )?;

    println!("Starting Contract Negotiation Demo");
    println!("{}", "=".repeat(50));

    println!("Step 1: Initiating negotiation...");
    let session = negotiations.open_session(parties.party_a, parties.party_b)?;
    println!("  Session {} opened.", session.session_id);

    println!("\nStep 2: Exchanging proposals...");
    let report = session.negotiate().await?;
    for proposal in &report.proposals {
        println!(
            "  Round {:>2}: {} proposes {} (score for counterparty: {:.2})",
            proposal.round, proposal.proposer, proposal.terms, proposal.score
        );
    }

    println!("\nStep 3: Granting final approval...");
    match &report.outcome {
        Outcome::Converged { terms, round } => println!("  Approved in round {round}: {terms}"),
        Outcome::Impasse(impasse) => {
            println!("  Negotiation failed. {impasse}");
            print_audit_trail(&negotiations, &session.session_id)?;
            bail!("No agreement reached.");
        }
    }

    println!("\nStep 4: Acquiring signatures and deploying contract...");
    let record = session.deploy().await?;
    println!(
        "  Contract {} is {} (ledger: {}).",
        record.id,
        record.state,
        record.ledger_ref.as_deref().unwrap_or("-")
    );

    println!("\nStep 5: Audit trail");
    print_audit_trail(&negotiations, &session.session_id)?;
    print_audit_trail(&negotiations, &record.id)?;

    println!("\nFinal status:");
    println!("{}", serde_json::to_string_pretty(&session.status())?);
    Ok(())
}

fn print_audit_trail(negotiations: &Negotiations, subject: &str) -> anyhow::Result<()> {
    for entry in negotiations.audit().entries(subject)? {
        println!(
            "  #{:<3} {:<20} {}",
            entry.sequence,
            entry.kind.to_string(),
            entry.payload
        );
    }
    Ok(())
}
