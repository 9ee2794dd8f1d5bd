use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use vvstream::crypto::{CryptoContext, PrivateKey, PublicParams};
use vvstream::ply::FieldMask;

/// Key setup and field-level encryption of PLY frames.
#[derive(Parser)]
#[clap(name = "vvcrypt")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate public parameters
    Setup {
        #[clap(long = "pub", default_value = "pub_key")]
        pub_key: PathBuf,
    },
    /// Generate a private key holding the given attributes
    Keygen {
        #[clap(long = "priv", default_value = "priv_key")]
        priv_key: PathBuf,
        #[clap(required = true)]
        attributes: Vec<String>,
    },
    /// Encrypt the selected fields of a PLY frame under a policy
    Encrypt {
        #[clap(long = "pub", default_value = "pub_key")]
        pub_key: PathBuf,
        #[clap(long)]
        pattern: FieldMask,
        /// e.g. "viewer and (hd or 2 of (a, b, c))"
        #[clap(long)]
        policy: String,
        /// Defaults to the input path with `.cpabe` appended
        #[clap(short, long)]
        output: Option<PathBuf>,
        input: PathBuf,
    },
    /// Restore a PLY frame from an encrypted one
    Decrypt {
        #[clap(long = "pub", default_value = "pub_key")]
        pub_key: PathBuf,
        #[clap(long = "priv", default_value = "priv_key")]
        priv_key: PathBuf,
        #[clap(long)]
        pattern: FieldMask,
        /// Defaults to the input path without its `.cpabe` extension
        #[clap(short, long)]
        output: Option<PathBuf>,
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match Cli::parse().command {
        Command::Setup { pub_key } => {
            PublicParams::generate().save(&pub_key)?;
            info!("wrote public parameters to {}", pub_key.display());
        }
        Command::Keygen {
            priv_key,
            attributes,
        } => {
            PrivateKey::new(attributes).save(&priv_key)?;
            info!("wrote private key to {}", priv_key.display());
        }
        Command::Encrypt {
            pub_key,
            pattern,
            policy,
            output,
            input,
        } => {
            let ctx = CryptoContext::for_encryption(&pub_key, pattern)
                .context("failed to initialise encryptor")?;
            let full = read(&input)?;
            let container = ctx
                .encrypt(&full, &policy)
                .with_context(|| format!("failed to encrypt {}", input.display()))?;
            let output = output.unwrap_or_else(|| {
                let mut name = input.clone().into_os_string();
                name.push(".cpabe");
                PathBuf::from(name)
            });
            write(&output, &container)?;
        }
        Command::Decrypt {
            pub_key,
            priv_key,
            pattern,
            output,
            input,
        } => {
            let ctx = CryptoContext::for_decryption(&pub_key, &priv_key, pattern)
                .context("failed to initialise decryptor")?;
            let output = match output {
                Some(output) => output,
                None if input.extension().map_or(false, |ext| ext == "cpabe") => {
                    input.with_extension("")
                }
                None => bail!("{} has no .cpabe extension, pass --output", input.display()),
            };
            let container = read(&input)?;
            let full = ctx
                .decrypt(&container)
                .with_context(|| format!("failed to decrypt {}", input.display()))?;
            write(&output, &full)?;
        }
    }
    Ok(())
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    info!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}
