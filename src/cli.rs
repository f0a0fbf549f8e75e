use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "podlog-forwarder")]
#[command(about = "Forward container logs from a namespace to a remote HTTP collector")]
pub struct Cli {
    /// Namespace to watch
    #[arg(short = 'n', long, env = "TARGET_NAMESPACE")]
    pub namespace: Option<String>,

    /// HTTP endpoint receiving one POST per log line
    #[arg(long, env = "REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Label selector for pods
    #[arg(short = 'l', long, env = "LABEL_SELECTOR")]
    pub selector: Option<String>,

    /// Regex container names must match
    #[arg(long, env = "CONTAINER_REGEX")]
    pub container_regex: Option<String>,

    /// Stream mode: all, real (only new lines) or since
    #[arg(long, env = "LOG_MODE", default_value = "all")]
    pub mode: String,

    /// Look-back window in seconds for --mode since
    #[arg(long, env = "SINCE_SECONDS", allow_hyphen_values = true)]
    pub since_seconds: Option<i64>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
