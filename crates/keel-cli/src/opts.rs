use clap::Args;

/// Output options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct OutputOpts {
    /// JSON output envelope
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output (implies --json)
    #[arg(long, global = true)]
    pub pretty: bool,
}
