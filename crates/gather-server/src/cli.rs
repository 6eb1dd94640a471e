use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "gather-server", about = "Gather realtime gateway server")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/gather.toml")]
    pub config: String,

    /// Override the bind address from the config file
    #[arg(long)]
    pub bind: Option<String>,
}
