//! Walk both simulated lifecycles end to end and print what happens.
//!
//! The demo creates an enclave, runs every reference workload, seals and
//! unseals a blob, then launches a VM, encrypts a few pages, and attests
//! both instances. Useful as a smoke test and as classroom output.

use clap::Parser;
use serde_json::json;
use tee_lab_engine::{LabConfig, Simulator};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lab_demo", about = "tee-lab lifecycle walkthrough")]
struct Args {
    /// Name for the demo enclave instance
    #[arg(long, default_value = "demo-enclave")]
    enclave: String,
    /// Owner identity for the demo VM
    #[arg(long, default_value = "demo-owner")]
    owner: String,
    /// Number of VM pages to encrypt
    #[arg(long, default_value = "3")]
    pages: u64,
    /// Pinned root secret (64 hex chars) for reproducible keys.
    /// Can also be set via TEE_LAB_ROOT_SECRET.
    #[arg(long, env = "TEE_LAB_ROOT_SECRET")]
    root_secret: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.root_secret {
        Some(hex) => LabConfig::new(tee_lab_engine::RootSecret::from_hex(hex)?, "tee-lab"),
        None => LabConfig::from_env()?,
    };
    let sim = Simulator::new(config);

    println!("tee-lab demo (signer: {})", sim.signer());

    // --- Enclave lifecycle ---
    let handle = sim.enclaves.load_or_fetch(&args.enclave)?;
    println!("[enclave] loaded {} measurement={}", handle.name, handle.measurement);

    let search = sim.enclaves.compute(
        &args.enclave,
        "keyword_search",
        &json!({ "keyword": "secure", "documents": ["hello secure world", "secure enclaves"] }),
    )?;
    println!("[enclave] keyword_search -> {}", search.result);

    let inference = sim.enclaves.compute(
        &args.enclave,
        "inference",
        &json!({ "vector": [3.0, 4.0] }),
    )?;
    println!("[enclave] inference -> {}", inference.result);

    let token = sim
        .enclaves
        .seal(&args.enclave, &args.owner, &json!({ "secret": "rotate-me" }))?;
    let recovered = sim.enclaves.unseal(&args.enclave, &args.owner, &token)?;
    println!("[enclave] seal/unseal roundtrip -> {}", recovered);

    let counter = sim.enclaves.compute(
        &args.enclave,
        "counter",
        &json!({ "initial": 0, "increments": 3 }),
    )?;
    println!(
        "[enclave] counter -> {} (measurement advanced to {})",
        counter.result, counter.measurement
    );

    let report = sim.enclaves.attest(&args.enclave, "v1")?;
    println!("[enclave] attestation nonce={} measurement={}", report.nonce, report.measurement);

    // --- VM lifecycle ---
    let launch = sim.vms.launch(&args.owner)?;
    println!(
        "[vm] launched {} vcpu={} measurement={}",
        launch.vm_id, launch.vcpu_id, launch.measurement
    );

    for page_id in 0..args.pages {
        let payload = format!("page {} contents", page_id);
        let receipt = sim.vms.encrypt_page(&launch.vm_id, page_id, payload.as_bytes())?;
        println!(
            "[vm] encrypted page {} tag={} measurement={}",
            page_id, receipt.tag, receipt.measurement
        );
    }

    let report = sim.vms.attest(&launch.vm_id, "v1")?;
    println!("[vm] attestation nonce={} measurement={}", report.nonce, report.measurement);

    Ok(())
}
