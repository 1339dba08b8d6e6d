//! Ambient configuration: CLI/env parsing and tracing bootstrap.

pub mod cli {
    //! Parse from either CLI flags or environment variables.
    pub use clap::Parser;

    /// Default interval, in seconds, between autoscaler ticks.
    pub const DEFAULT_TICK_SECS: u64 = 10;
    /// Default cluster-wide cap on lease rejections per tick.
    pub const DEFAULT_REJECTS_PER_TICK: u32 = 50;
    /// Default lease offer expiry, in seconds.
    pub const DEFAULT_LEASE_OFFER_EXPIRY_SECS: i64 = 300;
    /// Default log level. Can use this argument or the `SCHED_LOG` env var.
    pub const DEFAULT_SCHED_LOG: &str = "info";

    #[derive(Parser, Debug, Clone, PartialEq)]
    #[clap(author, name = "fleet-scheduler", about, long_about = None)]
    /// parses from CLI flags & environment variables.
    pub struct Config {
        /// seconds between autoscaler ticks
        #[clap(long, env, value_parser, default_value_t = DEFAULT_TICK_SECS)]
        pub tick_secs: u64,
        /// cluster-wide cap on lease rejections processed per tick
        #[clap(long, env, value_parser, default_value_t = DEFAULT_REJECTS_PER_TICK)]
        pub rejects_per_tick: u32,
        /// seconds after which an un-renewed offer is treated as stale
        #[clap(long, env, value_parser, default_value_t = DEFAULT_LEASE_OFFER_EXPIRY_SECS)]
        pub lease_offer_expiry_secs: i64,
        /// the attribute name used to partition machines into autoscaling groups
        #[clap(long, env, value_parser)]
        pub partition_attribute_name: String,
        /// attribute whose value is used as a scale-down termination identifier,
        /// instead of the hostname
        #[clap(long, env, value_parser)]
        pub map_hostname_attribute_name: Option<String>,
        /// attribute used to balance scale-down victim selection across (e.g. zone)
        #[clap(long, env, value_parser)]
        pub scale_down_balanced_by_attribute_name: Option<String>,
        /// include disk capacity/used figures in `resource_status` snapshots
        #[clap(long, env, value_parser, default_value_t = false)]
        pub report_disk_in_status: bool,
        /// set the log level. All valid `RUST_LOG` directives are accepted
        #[clap(long, env, value_parser, default_value = DEFAULT_SCHED_LOG)]
        pub sched_log: String,
        /// name given to tokio worker threads
        #[clap(long, env, value_parser, default_value = "fleet-scheduler")]
        pub thread_name: String,
        /// number of tokio worker threads; defaults to the number of logical CPUs
        #[clap(long, env, value_parser)]
        pub threads: Option<usize>,
    }

    impl Config {
        pub fn tick_duration(&self) -> std::time::Duration {
            std::time::Duration::from_secs(self.tick_secs)
        }
    }
}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{self, format::Format},
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    /// log as "json" or "standard" (unstructured)
    static DEFAULT_LOG_FORMAT: &str = "standard";

    #[derive(Debug)]
    pub struct Config {
        pub log_frmt: String,
    }

    impl Config {
        pub fn parse(sched_log: &str) -> Result<Self> {
            let log_frmt = std::env::var("LOG_FORMAT").unwrap_or_else(|_| DEFAULT_LOG_FORMAT.to_string());
            let filter = EnvFilter::try_new(sched_log).or_else(|_| EnvFilter::try_new("info"))?;

            match &log_frmt[..] {
                "json" => {
                    tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
                }
                "pretty" => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().event_format(Format::default().pretty().with_source_location(false)))
                        .init();
                }
                _ => {
                    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
                }
            }

            Ok(Self { log_frmt })
        }
    }
}
