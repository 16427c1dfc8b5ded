use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "parley-server", about = "Parley messaging gateway")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/parley.toml")]
    pub config: String,

    /// Listen address (overrides config)
    #[arg(long)]
    pub bind: Option<String>,
}
