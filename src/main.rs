//! nearai-verify - attestation and chat signature verifier for NEAR AI
//! Confidential Cloud.

use clap::{Args, Parser, Subcommand};
use nearai_verify::nearai::hashing::{ContentHashPair, HashReconciliation};
use nearai_verify::nearai::models::ChatRequest;
use nearai_verify::nearai::quote::IntelQuote;
use nearai_verify::nearai::signature::verify_signature;
use nearai_verify::nearai::verifier::CoprocessorCheck;
use nearai_verify::{
    ChatVerifier, ConfidentialCloud, NearAiClient, NearAiConfig, NearAiError, VerificationReport,
};
use serde::Serialize;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

const DEFAULT_MODEL: &str = "gpt-oss-120b";
const DEFAULT_MESSAGE: &str = "Respond with only two words";

#[derive(Parser)]
#[command(name = "nearai-verify")]
#[command(about = "Verify NEAR AI Confidential Cloud attestations and signed chat exchanges")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// API key for NEAR AI Cloud
    #[arg(long, env = "NEARAI_CLOUD_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Base URL of the cloud API
    #[arg(long, env = "NEARAI_API_BASE", default_value = nearai_verify::nearai::config::DEFAULT_BASE_URL, global = true)]
    base_url: String,

    /// NVIDIA remote attestation endpoint
    #[arg(long, env = "NEARAI_NRAS_URL", default_value = nearai_verify::nearai::nras::NRAS_GPU_VERIFIER_URL, global = true)]
    nras_url: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60, global = true)]
    timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Attest the model, send a chat message and verify its signature
    Verify {
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,

        #[arg(long, default_value = DEFAULT_MESSAGE)]
        message: String,
    },

    /// Fetch and decode a model's attestation report
    Report {
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,
    },

    /// Send a chat message and print the request and response hashes
    Hashes {
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,

        #[arg(long, default_value = DEFAULT_MESSAGE)]
        message: String,
    },

    /// Check a personal-message signature offline
    CheckSignature {
        /// Signed text, usually `<request_hash>:<response_hash>`
        #[arg(long)]
        text: String,

        /// 65-byte hex signature
        #[arg(long)]
        signature: String,

        /// Expected signer address; may be repeated
        #[arg(long = "address", required = true)]
        addresses: Vec<String>,
    },
}

impl ConnectionArgs {
    fn into_config(self) -> NearAiConfig {
        let timeout = Duration::from_secs(self.timeout);
        NearAiConfig {
            api_key: self.api_key,
            ..NearAiConfig::default()
        }
        .with_base_url(self.base_url)
        .with_nras_url(self.nras_url)
        .with_request_timeout(timeout)
        .with_connect_timeout(timeout.min(Duration::from_secs(10)))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("nearai_verify=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Runs one command; `Ok(false)` means a verdict came back invalid.
async fn run(cli: Cli) -> Result<bool, NearAiError> {
    let json = cli.json;
    let connection = cli.connection;

    match cli.command {
        Commands::Verify { model, message } => {
            let client = NearAiClient::new(connection.into_config())?;
            let report = ChatVerifier::new(client).verify_chat(&model, &message).await?;
            if json {
                print_json(&report)?;
            } else {
                render_report(&report);
            }
            Ok(report.is_valid())
        }
        Commands::Report { model } => {
            let client = NearAiClient::new(connection.into_config())?;
            let report = ChatVerifier::new(client).attestation_report(&model).await?;
            print_json(&report)?;
            Ok(true)
        }
        Commands::Hashes { model, message } => {
            let client = NearAiClient::new(connection.into_config())?;
            let request_body = ChatRequest::user_stream(model, message).to_body()?;
            let completion = client.fetch_chat_completion(&request_body).await?;
            let hashes = ContentHashPair::compute(&request_body, &completion.raw_stream_text);

            if json {
                print_json(&serde_json::json!({
                    "request_hash": hashes.request_hash,
                    "response_hash": hashes.response_hash,
                    "chat_id": completion.chat_id,
                }))?;
            } else {
                println!("REQUEST HASH:  {}", hashes.request_hash);
                println!("RESPONSE HASH: {}", hashes.response_hash);
                println!(
                    "CHAT ID:       {}",
                    completion.chat_id.as_deref().unwrap_or("-")
                );
            }
            Ok(true)
        }
        Commands::CheckSignature {
            text,
            signature,
            addresses,
        } => {
            let verdict = verify_signature(&text, &signature, addresses);
            if json {
                print_json(&verdict)?;
            } else {
                println!("Message:   {}", verdict.message);
                println!("Expected:  {}", verdict.expected_addresses.join(", "));
                println!(
                    "Recovered: {}",
                    verdict.recovered_address.as_deref().unwrap_or("-")
                );
                if let Some(e) = &verdict.error {
                    println!("Error:     {e}");
                }
                println!("Valid:     {}", mark(verdict.valid));
            }
            Ok(verdict.valid)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), NearAiError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "yes"
    } else {
        "NO"
    }
}

fn render_report(report: &VerificationReport) {
    println!("Model:    {}", report.model);
    println!("Chat id:  {}", report.chat_id);
    println!();

    println!("Attestation");
    println!("  Signing addresses: {}", report.signing_addresses.join(", "));
    match &report.attestation.intel_quote {
        IntelQuote::Decoded(q) => println!(
            "  Intel quote: version {} ({} bytes)",
            q.version, q.size_bytes
        ),
        IntelQuote::Invalid(e) => println!("  Intel quote: undecodable ({e})"),
    }

    match &report.coprocessor {
        CoprocessorCheck::Skipped { reason } => {
            println!("  GPU attestation: skipped ({reason})");
        }
        CoprocessorCheck::Checked { payloads, passed } => {
            println!("  GPU attestation: {}", mark(*passed));
            for p in payloads {
                let who = p.signing_address.as_deref().unwrap_or("-");
                match (&p.error, p.overall_result) {
                    (Some(e), _) => println!("    {who}: error: {e}"),
                    (None, Some(r)) => println!("    {who}: overall result {r}"),
                    (None, None) => println!("    {who}: no overall result claim"),
                }
            }
        }
    }
    println!();

    println!("Exchange");
    println!("  Request hash:  {}", report.hashes.request_hash);
    println!("  Response hash: {}", report.hashes.response_hash);
    match &report.hash_reconciliation {
        HashReconciliation::Compared {
            valid,
            request_match,
            response_match,
            ..
        } => println!(
            "  Signed hashes match: {} (request {}, response {})",
            mark(*valid),
            mark(*request_match),
            mark(*response_match)
        ),
        HashReconciliation::Malformed { error, .. } => {
            println!("  Signed hashes match: NO ({error})")
        }
    }
    println!(
        "  Signature recovered to: {}",
        report.signature.recovered_address.as_deref().unwrap_or("-")
    );
    if let Some(e) = &report.signature.error {
        println!("  Signature error: {e}");
    }
    println!("  Signature valid: {}", mark(report.signature.valid));
    println!();

    println!("Verdict: {}", if report.is_valid() { "VERIFIED" } else { "FAILED" });
}
