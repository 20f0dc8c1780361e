//! Zeratul Token CLI - inspect packed policies and run the ledger locally

use anyhow::{bail, Context};
use clap::Parser;
use ed25519_dalek::SigningKey;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zeratul_token::{
    token::Sideload, DigestProofSystem, KeyRegistry, MemoryLedger, OperationCall, OperationId,
    PackedPolicy, PolicyFlag, PolicyRecord, TokenConfig, TokenLedger, TokenState, VerificationKey,
};

#[derive(Parser)]
#[command(name = "zeratul-token")]
#[command(about = "Zeratul Token - policy-gated token ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Decode a packed policy scalar (decimal or 0x-prefixed hex)
    Decode { packed: String },

    /// Pack the policy records of a config file
    Pack {
        #[arg(short, long)]
        config: String,
    },

    /// Print the genesis state for a config file
    Genesis {
        #[arg(short, long)]
        config: String,
    },

    /// Run mint/transfer/burn and a proof-gated mint on an in-memory ledger
    Demo,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("zeratul_token=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Decode { packed } => decode(&packed),
        Command::Pack { config } => {
            let config = TokenConfig::from_file(&config)?;
            let packed = config.packed_policy();
            println!("{packed} ({})", packed.bits());
            Ok(())
        }
        Command::Genesis { config } => {
            let config = TokenConfig::from_file(&config)?;
            let state = TokenState::genesis(&config);
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Command::Demo => demo(),
    }
}

fn decode(raw: &str) -> anyhow::Result<()> {
    let bits = match raw.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    }
    .with_context(|| format!("not a number: {raw}"))?;
    let packed = PackedPolicy::from_bits(bits)?;

    println!("{packed}");
    for op in OperationId::ALL {
        let record = packed.record(op);
        let set: Vec<String> = PolicyFlag::ALL
            .iter()
            .filter(|f| record.flag(**f))
            .map(|f| format!("{f:?}"))
            .collect();
        println!(
            "  {:<14} {:#04x}  [{}]",
            op.to_string(),
            record.to_bits(),
            set.join(", ")
        );
    }
    Ok(())
}

fn demo() -> anyhow::Result<()> {
    let admin = SigningKey::from_bytes(&[1u8; 32]);
    let alice = SigningKey::from_bytes(&[2u8; 32]);
    let bob = SigningKey::from_bytes(&[3u8; 32]);
    let (a, b) = (
        alice.verifying_key().to_bytes(),
        bob.verifying_key().to_bytes(),
    );

    let config = TokenConfig {
        admin: admin.verifying_key().to_bytes(),
        address: [0xCC; 32],
        ..Default::default()
    };
    let mut token = TokenLedger::new(&config, MemoryLedger::new(), DigestProofSystem)?;

    // plain flow, every policy disabled
    let call = OperationCall::Mint {
        recipient: a,
        amount: 1_000,
    };
    token.mint(a, 1_000, &[token.sign(&admin, &call, None)?])?;
    let call = OperationCall::Transfer {
        from: a,
        to: b,
        amount: 400,
    };
    token.transfer(a, b, 400, &[token.sign(&alice, &call, None)?])?;
    let call = OperationCall::Burn {
        from: b,
        amount: 150,
    };
    token.burn(b, 150, &[token.sign(&bob, &call, None)?])?;
    info!(
        alice = token.balance_of(&a),
        bob = token.balance_of(&b),
        supply = token.circulating(),
        "plain flow done"
    );

    // proof-gated mint
    let record = PolicyRecord::DISABLED
        .with_flag(PolicyFlag::ShouldVerify, true)
        .with_flag(PolicyFlag::RequireRecipientMatch, true)
        .with_flag(PolicyFlag::RequireTokenBalanceMatch, true);
    let call = OperationCall::UpdatePolicyRecord {
        operation: OperationId::Mint.as_u8(),
        record,
    };
    let auth = token.sign(&admin, &call, None)?;
    token.update_policy_record(OperationId::Mint.as_u8(), record, &[auth])?;

    let vk = VerificationKey::new(b"demo-mint-circuit".to_vec());
    let call = OperationCall::UpdateRegistryEntry {
        operation: OperationId::Mint.as_u8(),
        hash: vk.hash(),
    };
    let registry = token.update_registry_entry(
        OperationId::Mint.as_u8(),
        vk.hash(),
        &KeyRegistry::new(),
        &[token.sign(&admin, &call, None)?],
    )?;

    let call = OperationCall::Mint {
        recipient: a,
        amount: 50,
    };
    if token.mint(a, 50, &[token.sign(&admin, &call, None)?]).is_ok() {
        bail!("direct mint went through with the proof policy on");
    }

    let proof = DigestProofSystem::prove_current(&vk, token.ledger(), a, token.token_id());
    let sideload = Sideload {
        proof: &proof,
        key: &vk,
        registry: &registry,
    };
    let auth = token.sign(&admin, &call, Some(&sideload))?;
    token.mint_with_proof(a, 50, sideload, &[auth])?;

    info!(
        alice = token.balance_of(&a),
        supply = token.circulating(),
        policy = %token.packed_policy(),
        "proof-gated mint done"
    );
    println!("{}", serde_json::to_string_pretty(token.state())?);
    Ok(())
}
