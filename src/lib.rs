//! linkstress -- serial link stress tester.
//!
//! Drives synthetic traffic from every DUT port to its paired AUX port,
//! counts what was sent and what arrived, and fails a session on any dropped
//! byte. Sessions repeat for a fixed number of iterations or continuously
//! until one fails.

pub mod campaign;
pub mod config;
pub mod detect;
pub mod engine;
pub mod link;
pub mod traffic;

use anyhow::Result;

use crate::campaign::{Campaign, CampaignPlan, CampaignReport};
use crate::config::HarnessConfig;

/// Run a campaign on the configured backend until it stops. Ctrl-C
/// interrupts it; in-flight tasks are joined and their ports closed first.
pub async fn run(config: HarnessConfig, plan: CampaignPlan) -> Result<CampaignReport> {
    let opener = link::opener_for(&config.ports);
    let campaign = Campaign::new(opener, config, plan)?;

    let interrupt = campaign.interrupt_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping campaign");
            interrupt.cancel();
        }
    });

    Ok(campaign.run().await)
}
