use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use umbra_cloud::CloudSettings;
use umbra_controller::{ControllerConfig, DEFAULT_SELECTION_ANNOTATION};

/// How often submitted cloud operations are polled.
const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Upper bound on a single cloud operation, submit to terminal.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Parser, Debug, Clone)]
#[command(
    name = "umbra",
    about = "Private link exposure for cluster services behind an internal load balancer"
)]
pub struct Config {
    /// Resource group holding the cluster's virtual network
    #[arg(long, env = "UMBRA_VNET_RESOURCE_GROUP")]
    pub vnet_resource_group: String,

    /// Name of the cluster's virtual network
    #[arg(long, env = "UMBRA_VNET_NAME")]
    pub vnet_name: String,

    /// Subnet that carries link service NAT addresses
    #[arg(long, env = "UMBRA_NAT_SUBNET_NAME")]
    pub nat_subnet_name: String,

    /// Address prefix for the NAT subnet when it has to be created
    #[arg(long, env = "UMBRA_NAT_SUBNET_PREFIX", value_parser = parse_ipv4_cidr)]
    pub nat_subnet_prefix: Option<String>,

    /// Resource group holding the cluster's load balancer
    #[arg(long, env = "UMBRA_LB_RESOURCE_GROUP")]
    pub lb_resource_group: String,

    /// Name of the cluster's internal load balancer
    #[arg(long, env = "UMBRA_LB_NAME")]
    pub lb_name: String,

    /// Annotation that opts a service into private link exposure
    #[arg(
        long,
        env = "UMBRA_SERVICE_ANNOTATION",
        default_value = DEFAULT_SELECTION_ANNOTATION
    )]
    pub service_annotation: String,

    /// Seconds between full resync passes over cached objects
    #[arg(long, env = "UMBRA_SYNC_PERIOD_SECONDS", default_value_t = 30)]
    pub sync_period_seconds: u64,

    /// Initial retry delay for a failing object, in seconds
    #[arg(long, env = "UMBRA_MIN_RETRY_DELAY_SECONDS", default_value_t = 5)]
    pub min_retry_delay_seconds: u64,

    /// Retry delay ceiling, in seconds
    #[arg(long, env = "UMBRA_MAX_RETRY_DELAY_SECONDS", default_value_t = 300)]
    pub max_retry_delay_seconds: u64,

    /// Cloud SDK auth file with the service principal credentials
    #[arg(long, env = "UMBRA_AUTH_FILE")]
    pub auth_file: PathBuf,

    /// Base URL of the cluster API
    #[arg(long, env = "UMBRA_API_URL")]
    pub api_url: String,

    /// Sync workers per controller
    #[arg(long, default_value_t = 1)]
    pub workers: usize,
}

impl Config {
    /// Cross-field checks clap cannot express.
    pub fn validate(&self) -> miette::Result<()> {
        if self.min_retry_delay_seconds > self.max_retry_delay_seconds {
            return Err(miette::miette!(
                "--min-retry-delay-seconds ({}) must not exceed --max-retry-delay-seconds ({})",
                self.min_retry_delay_seconds,
                self.max_retry_delay_seconds
            ));
        }
        Ok(())
    }

    pub fn cloud_settings(&self) -> CloudSettings {
        CloudSettings {
            lb_resource_group: self.lb_resource_group.clone(),
            load_balancer_name: self.lb_name.clone(),
            vnet_resource_group: self.vnet_resource_group.clone(),
            vnet_name: self.vnet_name.clone(),
            nat_subnet_name: self.nat_subnet_name.clone(),
            nat_subnet_prefix: self.nat_subnet_prefix.clone(),
            poll_interval: OPERATION_POLL_INTERVAL,
            operation_timeout: OPERATION_TIMEOUT,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            min_retry_delay: Duration::from_secs(self.min_retry_delay_seconds),
            max_retry_delay: Duration::from_secs(self.max_retry_delay_seconds),
        }
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_seconds)
    }
}

fn parse_ipv4_cidr(value: &str) -> Result<String, String> {
    let (address, prefix) = value
        .split_once('/')
        .ok_or_else(|| format!("'{value}' is not in address/prefix form"))?;
    address
        .parse::<std::net::Ipv4Addr>()
        .map_err(|_| format!("'{address}' is not an IPv4 address"))?;
    let bits: u8 = prefix
        .parse()
        .map_err(|_| format!("'{prefix}' is not a valid prefix length"))?;
    if bits > 32 {
        return Err(format!("prefix length /{bits} is out of range"));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec![
            "umbra",
            "--vnet-resource-group",
            "net-rg",
            "--vnet-name",
            "vnet1",
            "--nat-subnet-name",
            "apl-subnet",
            "--lb-resource-group",
            "cluster-rg",
            "--lb-name",
            "kube-lb",
            "--auth-file",
            "/etc/umbra/auth.json",
            "--api-url",
            "http://localhost:8080",
        ]
    }

    #[test]
    fn defaults_are_applied() {
        let config = Config::try_parse_from(base_args()).unwrap();
        assert_eq!(config.service_annotation, "umbra.dev/private-link");
        assert_eq!(config.sync_period_seconds, 30);
        assert_eq!(config.min_retry_delay_seconds, 5);
        assert_eq!(config.max_retry_delay_seconds, 300);
        assert_eq!(config.workers, 1);
        assert!(config.nat_subnet_prefix.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn required_flags_are_fatal_when_missing() {
        let mut args = base_args();
        args.truncate(args.len() - 2); // drop --api-url and its value
        assert!(Config::try_parse_from(args).is_err());
    }

    #[test]
    fn nat_prefix_must_be_an_ipv4_cidr() {
        let mut args = base_args();
        args.extend(["--nat-subnet-prefix", "10.1.0.0/24"]);
        let config = Config::try_parse_from(args).unwrap();
        assert_eq!(config.nat_subnet_prefix.as_deref(), Some("10.1.0.0/24"));

        for bad in ["10.1.0.0", "10.1.0.0/33", "fe80::/64", "subnet/24", "10.1.0/24"] {
            let mut args = base_args();
            args.extend(["--nat-subnet-prefix", bad]);
            assert!(
                Config::try_parse_from(args).is_err(),
                "accepted invalid prefix {bad}"
            );
        }
    }

    #[test]
    fn retry_window_must_be_ordered() {
        let mut args = base_args();
        args.extend(["--min-retry-delay-seconds", "600"]);
        let config = Config::try_parse_from(args).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn derived_settings_mirror_the_flags() {
        let mut args = base_args();
        args.extend(["--nat-subnet-prefix", "10.1.0.0/24", "--workers", "4"]);
        let config = Config::try_parse_from(args).unwrap();

        let settings = config.cloud_settings();
        assert_eq!(settings.lb_resource_group, "cluster-rg");
        assert_eq!(settings.load_balancer_name, "kube-lb");
        assert_eq!(settings.vnet_resource_group, "net-rg");
        assert_eq!(settings.vnet_name, "vnet1");
        assert_eq!(settings.nat_subnet_name, "apl-subnet");
        assert_eq!(settings.nat_subnet_prefix.as_deref(), Some("10.1.0.0/24"));

        let controller = config.controller_config();
        assert_eq!(controller.workers, 4);
        assert_eq!(controller.min_retry_delay, Duration::from_secs(5));
        assert_eq!(controller.max_retry_delay, Duration::from_secs(300));
        assert_eq!(config.sync_period(), Duration::from_secs(30));
    }
}
