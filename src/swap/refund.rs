use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tracing::{debug, info, warn};

use super::store::SwapStore;
use super::{SwapStatus, unix_now};
use crate::bitcoin::BitcoinChain;

/// Background loop tracking HTLCs whose swaps ended in `Refunded` or
/// `Error` with a deposit still locked. The refund branch commits to the
/// user's pubkey, so the spend is the user's to make; the resolver only
/// watches for the branch to open and for the user's reclaim to land.
pub fn spawn_refund_watcher<S, B>(store: Arc<S>, btc: Arc<B>, poll_interval: Duration)
where
    S: SwapStore,
    B: BitcoinChain,
{
    tokio::spawn(async move {
        loop {
            if let Err(err) = watch_refunds_once(&store, &btc).await {
                warn!(error = %err, "refund watcher error");
            }
            tokio::time::sleep(poll_interval).await;
        }
    });
}

/// One sweep over the store: for every due refund past its locktime,
/// checks whether the HTLC output is still unspent and records the user's
/// reclaim once it disappears.
pub async fn watch_refunds_once<S, B>(store: &Arc<S>, btc: &Arc<B>) -> Result<()>
where
    S: SwapStore,
    B: BitcoinChain,
{
    let now = unix_now();
    for record in store.list_in_state(&[SwapStatus::Refunded, SwapStatus::Error]) {
        if !record.btc_refund_due || record.btc_refund_reclaimed {
            continue;
        }
        // a settled HTLC was spent by our own claim, not the refund branch
        if record.btc_redeem_txid.is_some() {
            continue;
        }
        let Some((txid, vout)) = record.btc_funding_txid.zip(record.btc_funding_vout) else {
            continue;
        };
        if now < record.btc_locktime {
            continue;
        }

        if btc.is_outpoint_unspent(txid, vout).await? {
            debug!(
                swap_id = %record.id,
                %txid,
                vout,
                "htlc refund branch open; awaiting the user's reclaim"
            );
        } else {
            info!(swap_id = %record.id, %txid, vout, "htlc reclaimed via the refund branch");
            store
                .update(&record.id, |r| r.btc_refund_reclaimed = true)
                .context("record htlc reclaim")?;
        }
    }
    Ok(())
}
