//! Key generation collaborator: mints an Ed25519 keypair, writes the secret
//! key hex to `operator.sk`, and appends the public key hex to
//! `authorized_keys.txt`. Grounded in `original_source/operator/keygen.py`
//! (PyNaCl); appends rather than overwrites so the authorized-key set can
//! grow across multiple `keygen` runs.

#![forbid(unsafe_code)]

use std::fs::OpenOptions;
use std::io::Write;

use clap::Parser;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

/// Generate an Ed25519 operator keypair and register it as authorized.
#[derive(Parser, Debug)]
struct Args {
    /// Path to write the secret key hex.
    #[arg(long, default_value = "operator.sk")]
    secret_key_path: String,

    /// Path to append the public key hex to.
    #[arg(long, default_value = "authorized_keys.txt")]
    authorized_keys_path: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let signing_key = SigningKey::generate(&mut OsRng);
    let sk_hex = hex::encode(signing_key.to_bytes());
    let vk_hex = hex::encode(signing_key.verifying_key().to_bytes());

    println!("Private Key: {sk_hex}");
    println!("Public Key:  {vk_hex}");

    std::fs::write(&args.secret_key_path, &sk_hex)?;

    let mut keys_file =
        OpenOptions::new().create(true).append(true).open(&args.authorized_keys_path)?;
    writeln!(keys_file, "{vk_hex}")?;

    println!("Keys saved: {} / {}", args.secret_key_path, args.authorized_keys_path);
    Ok(())
}
