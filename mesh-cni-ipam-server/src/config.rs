use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ipnetwork::IpNetwork;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    /// Run the IPAM service
    Serve(ServeArgs),
    /// Print the custom resource definitions
    Crdgen,
}

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Pools to allocate networks from, comma separated. IPAM is disabled
    /// when none are given.
    #[arg(long, env = "IPAM_POOLS", value_delimiter = ',')]
    pub pools: Vec<IpNetwork>,

    /// How long a network or address must be held before a release frees it
    #[arg(
        long,
        env = "IPAM_GRACE_PERIOD",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub grace_period: Duration,

    /// Interval between reconciliations with the desired state, 0s disables
    #[arg(
        long,
        env = "IPAM_SYNC_INTERVAL",
        default_value = "2m",
        value_parser = humantime::parse_duration
    )]
    pub sync_interval: Duration,

    /// API listener
    #[arg(long, default_value = "0.0.0.0:6000")]
    pub listen_address: SocketAddr,

    /// Metrics listener
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub metrics_address: SocketAddr,

    /// How long to wait for the Kubernetes stores to sync
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub store_timeout: Duration,

    /// Read the desired state from this YAML file instead of Kubernetes
    #[arg(long, env = "IPAM_DESIRED_STATE_FILE")]
    pub desired_state_file: Option<PathBuf>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::parse_from(["mesh-cni-ipam", "serve", "--pools", "10.0.0.0/8,fd00::/48"]);
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(
            args.pools,
            vec![
                "10.0.0.0/8".parse::<IpNetwork>().unwrap(),
                "fd00::/48".parse::<IpNetwork>().unwrap()
            ]
        );
        assert_eq!(args.grace_period, Duration::from_secs(30));
        assert_eq!(args.sync_interval, Duration::from_secs(120));
        assert_eq!(args.listen_address, "0.0.0.0:6000".parse().unwrap());
        assert!(args.desired_state_file.is_none());
    }

    #[test]
    fn test_serve_durations() {
        let cli = Cli::parse_from([
            "mesh-cni-ipam",
            "serve",
            "--grace-period",
            "1m 30s",
            "--sync-interval",
            "0s",
        ]);
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert!(args.pools.is_empty());
        assert_eq!(args.grace_period, Duration::from_secs(90));
        assert!(args.sync_interval.is_zero());
    }

    #[test]
    fn test_invalid_pool_rejected() {
        let res = Cli::try_parse_from(["mesh-cni-ipam", "serve", "--pools", "10.0.0.0/40"]);
        assert!(res.is_err());
    }
}
