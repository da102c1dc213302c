use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "nsq-writer", version, about = "Publish to nsqd from the command line")]
pub struct Cli {
  #[clap(subcommand)]
  pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
  /// Publish each line of stdin as a message
  Pub(PubArgs),
}

#[derive(Parser, Debug)]
pub struct PubArgs {
  /// nsqd TCP address (host:port); repeat for several daemons
  #[clap(long = "nsqd-tcp-address", required = true, env = "NSQD_TCP_ADDRESSES", value_delimiter = ',')]
  pub nsqd_tcp_addresses: Vec<String>,

  /// Topic to publish to
  #[clap(long, short)]
  pub topic: String,

  /// Lines per MPUB; 1 sends plain PUBs
  #[clap(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
  pub batch_size: u32,

  /// Seconds to wait for the first connection before giving up
  #[clap(long, default_value_t = 5)]
  pub ready_timeout: u64,

  /// Seconds between a connection closing and the next attempt
  #[clap(long, default_value_t = 15)]
  pub reconnect_interval: u64,
}
