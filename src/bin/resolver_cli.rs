use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand};
use serde_json::Value;

use btc_evm_swap::swap::service::{QuoteRequest, SwapRequest};

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    api_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Price a pair and obtain a quote id.
    Quote {
        #[arg(long)]
        from_chain_id: u64,

        #[arg(long, default_value = "0x0000000000000000000000000000000000000000")]
        from_token: String,

        #[arg(long)]
        to_chain_id: u64,

        #[arg(long, default_value = "0x0000000000000000000000000000000000000000")]
        to_token: String,

        /// Source amount in its smallest unit.
        #[arg(long)]
        amount: String,

        #[arg(long)]
        btc_destination_address: Option<String>,
    },
    /// Start a swap from a previously issued quote.
    Initiate {
        #[arg(long)]
        quote_id: String,

        #[arg(long)]
        user_btc_refund_pubkey: String,

        #[arg(long)]
        user_evm_address: String,

        #[arg(long)]
        btc_destination_address: Option<String>,
    },
    /// Read the current lifecycle state of a swap.
    Status {
        #[arg(long)]
        swap_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    btc_evm_swap::logging::init().ok();
    let args = Args::parse();
    let client = reqwest::Client::new();

    let response = match args.command {
        Command::Quote {
            from_chain_id,
            from_token,
            to_chain_id,
            to_token,
            amount,
            btc_destination_address,
        } => {
            let request = QuoteRequest {
                from_chain_id,
                from_token_address: from_token,
                to_chain_id,
                to_token_address: to_token,
                amount,
                btc_destination_address,
            };
            client
                .post(format!("{}/quote", args.api_url))
                .json(&request)
                .send()
                .await
                .context("POST /quote")?
        }
        Command::Initiate {
            quote_id,
            user_btc_refund_pubkey,
            user_evm_address,
            btc_destination_address,
        } => {
            let request = SwapRequest {
                quote_id,
                user_btc_refund_pubkey,
                user_evm_address,
                btc_destination_address,
            };
            client
                .post(format!("{}/swap/initiate", args.api_url))
                .json(&request)
                .send()
                .await
                .context("POST /swap/initiate")?
        }
        Command::Status { swap_id } => client
            .get(format!("{}/swap/status/{swap_id}", args.api_url))
            .send()
            .await
            .context("GET /swap/status")?,
    };

    let status = response.status();
    let body: Value = response.json().await.context("decode response body")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    anyhow::ensure!(status.is_success(), "request failed with status {status}");
    Ok(())
}
