use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use license_sdk::token::{decode_unverified, token_key};
use license_sdk::{
    ClientConfig, DebtThresholds, LicenseClient, LicensePayload, LicenseSigner, LicenseVerifier,
    RedemptionOutcome, RedemptionReport, SubmitLicenseRequest,
};

const PRIVATE_KEY_FILE: &str = "license_private.pem";
const PUBLIC_KEY_FILE: &str = "license_public.pem";

#[derive(Parser, Debug)]
#[command(name = "licensectl")]
#[command(about = "Issue, inspect and submit one-time license tokens")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an RSA signing key pair
    Keygen {
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        #[arg(short, long, default_value = "2048")]
        bits: usize,
    },
    /// Sign a new license token
    Issue {
        /// Private key PEM
        #[arg(short, long)]
        key: PathBuf,

        #[arg(short, long)]
        amount: Option<i64>,

        /// Bind the token to one account
        #[arg(short, long)]
        uid: Option<String>,

        #[arg(long)]
        expires_in_days: Option<u64>,

        /// Extra payload fields as key=value
        #[arg(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// Decode a token and optionally check its signature
    Inspect {
        token: String,

        /// Public key PEM
        #[arg(short, long)]
        pubkey: Option<PathBuf>,
    },
    /// Print the debt cooldown table
    Debt {
        /// Configure a cooldown for the Large tier
        #[arg(long)]
        large_days: Option<u64>,
    },
    /// Submit a license to a running issuer
    Submit {
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        issuer: String,

        #[arg(long, default_value = "default")]
        namespace: String,

        #[arg(long)]
        name: String,

        #[arg(short, long)]
        uid: String,

        #[arg(short, long)]
        token: String,
    },
    /// Switch the issuer between local and external validation
    Network {
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        issuer: String,

        /// on = external authority, off = local key
        #[arg(value_parser = ["on", "off"])]
        mode: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Keygen { out, bits } => keygen(&out, bits),
        Command::Issue {
            key,
            amount,
            uid,
            expires_in_days,
            fields,
        } => issue(&key, amount, uid, expires_in_days, &fields),
        Command::Inspect { token, pubkey } => inspect(&token, pubkey.as_deref()),
        Command::Debt { large_days } => {
            debt_table(large_days);
            Ok(())
        }
        Command::Submit {
            issuer,
            namespace,
            name,
            uid,
            token,
        } => {
            let client = LicenseClient::new(ClientConfig::new(&issuer))?;
            let request = SubmitLicenseRequest {
                namespace,
                name,
                uid,
                token,
            };
            let report = client.submit(&request).await?;
            print_report(&report);
            Ok(())
        }
        Command::Network { issuer, mode } => {
            let client = LicenseClient::new(ClientConfig::new(&issuer))?;
            let ack = client.set_network_mode(mode == "on").await?;
            println!(
                "Issuer at {} now validates {}",
                client.issuer_url(),
                if ack.external { "against the external authority" } else { "with the local key" }
            );
            Ok(())
        }
    }
}

fn keygen(out: &Path, bits: usize) -> Result<()> {
    println!("Generating {}-bit RSA key pair...", bits);
    let signer = LicenseSigner::new(bits)?;

    std::fs::create_dir_all(out)?;
    let private_path = out.join(PRIVATE_KEY_FILE);
    let public_path = out.join(PUBLIC_KEY_FILE);
    std::fs::write(&private_path, signer.to_pem()?)
        .with_context(|| format!("writing {}", private_path.display()))?;
    std::fs::write(&public_path, signer.public_key_pem()?)
        .with_context(|| format!("writing {}", public_path.display()))?;

    println!("  Private key: {}", private_path.display());
    println!("  Public key:  {}", public_path.display());
    println!();
    println!("Point the issuer at the public key with LICENSE_PUBKEY_PATH.");
    Ok(())
}

fn parse_field(raw: &str) -> Result<(String, serde_json::Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("field must be KEY=VALUE, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("field name is empty in '{}'", raw));
    }
    // Numbers and booleans keep their JSON type.
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn build_payload(
    amount: Option<i64>,
    uid: Option<String>,
    expires_at: Option<u64>,
    fields: &[String],
) -> Result<LicensePayload> {
    let mut payload = LicensePayload {
        uid,
        amount,
        expires_at,
        ..LicensePayload::default()
    };
    for raw in fields {
        let (name, value) = parse_field(raw)?;
        if matches!(name.as_str(), "uid" | "amount" | "expires_at") {
            return Err(anyhow!("'{}' has its own flag", name));
        }
        payload.extra.insert(name, value);
    }
    Ok(payload)
}

fn issue(
    key: &Path,
    amount: Option<i64>,
    uid: Option<String>,
    expires_in_days: Option<u64>,
    fields: &[String],
) -> Result<()> {
    let pem = std::fs::read_to_string(key).with_context(|| format!("reading {}", key.display()))?;
    let signer = LicenseSigner::from_pem(&pem)?;

    let expires_at = expires_in_days.map(|days| {
        let ttl = Duration::from_secs(days * 24 * 60 * 60);
        (Utc::now().timestamp().max(0) as u64).saturating_add(ttl.as_secs())
    });
    let payload = build_payload(amount, uid, expires_at, fields)?;
    println!("{}", signer.issue(&payload)?);
    Ok(())
}

fn format_unix(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

fn inspect(token: &str, pubkey: Option<&Path>) -> Result<()> {
    let (payload, _, signature) = decode_unverified(token)?;

    println!();
    println!("  Token key:   {}", token_key(token));
    println!("  Signature:   {} bytes", signature.len());
    println!(
        "  Bound to:    {}",
        payload.uid.as_deref().unwrap_or("any account")
    );
    match payload.credit_amount() {
        Some(amount) => println!("  Credit:      {}", amount),
        None => println!("  Credit:      none"),
    }
    if let Some(expires_at) = payload.expires_at {
        let now = Utc::now().timestamp().max(0) as u64;
        let state = if payload.is_expired_at(now) { "expired".red() } else { "active".green() };
        println!("  Expires:     {} ({})", format_unix(expires_at), state);
    }
    for (name, value) in &payload.extra {
        println!("  {:<12} {}", format!("{}:", name), value);
    }
    println!();

    if let Some(path) = pubkey {
        let pem =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let verifier = LicenseVerifier::from_pem(&pem)?;
        match verifier.verify(token) {
            Ok(_) => println!("SIGNATURE: {}", "VALID".green().bold()),
            Err(e) => println!("SIGNATURE: {} ({})", "INVALID".red().bold(), e),
        }
    }
    Ok(())
}

fn humanize(secs: u64) -> String {
    const DAY: u64 = 24 * 60 * 60;
    match secs {
        0 => "none".to_string(),
        s if s % DAY == 0 => format!("{} days", s / DAY),
        s => format!("{} s", s),
    }
}

fn debt_table(large_days: Option<u64>) {
    let mut thresholds = DebtThresholds::default();
    if let Some(days) = large_days {
        thresholds = thresholds.with_large(Duration::from_secs(days * 24 * 60 * 60));
    }

    println!();
    println!("  {:<8} {}", "Status".bold(), "Cooldown".bold());
    for (label, secs) in thresholds.table() {
        let cooldown = match secs {
            Some(secs) => humanize(secs),
            None => "unconfigured".yellow().to_string(),
        };
        println!("  {:<8} {}", label, cooldown);
    }
    println!();
}

fn print_report(report: &RedemptionReport) {
    let verdict = match report.outcome {
        RedemptionOutcome::Redeemed => report.outcome.to_string().to_uppercase().green(),
        RedemptionOutcome::Duplicate => report.outcome.to_string().to_uppercase().yellow(),
        _ => report.outcome.to_string().to_uppercase().red(),
    };

    println!();
    println!("  License:  {}", report.key);
    println!("  Account:  {}", report.uid);
    if let Some(amount) = report.credited {
        println!("  Credited: {}", amount);
    }
    println!("  Deleted:  {}", report.deleted);
    println!("  Trail:    {}", report.trail.join(" -> "));
    println!();
    println!("OUTCOME: {}", verdict.bold());
    println!("{}", report.message);
    if report.outcome.retry_advised() {
        println!("The token was not consumed; it can be submitted again.");
    }
}
