use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pepr-report")]
#[command(about = "Exemption-aware ClusterPolicyReport controller")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check cluster connectivity, permissions, and required CRDs
    Check,

    /// Manage the Exemption CRD
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },

    /// Run the report controller: watch Exemptions, ingest evaluations,
    /// publish the pepr-report
    Run {
        /// Listen address for the evaluation ingest endpoint
        #[arg(long, default_value = "0.0.0.0:8080")]
        listen: String,

        /// Per-attempt budget in seconds for one report sync pass
        #[arg(long, default_value_t = pepr_report::controller::DEFAULT_SYNC_TIMEOUT.as_secs())]
        sync_timeout_secs: u64,
    },
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print the CRD YAML to stdout
    Generate,

    /// Install the CRD into the connected cluster
    Install,
}
