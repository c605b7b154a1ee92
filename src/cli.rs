use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "podlink",
    version,
    about = "Remote shell, live logs and resource usage for one Kubernetes container."
)]
pub struct CliArgs {
    /// Target container as namespace/pod:container (namespace defaults to "default")
    pub target: String,

    /// Tunnel base URL (ws://, wss://, http:// or https://)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Bearer token for the tunnel endpoints
    #[arg(long, env = "PODLINK_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Runtime config file (skips discovery)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of historical log lines requested when the log stream opens
    #[arg(long)]
    pub tail_lines: Option<u32>,

    /// Stop the log stream after the tail instead of following
    #[arg(long)]
    pub no_follow: bool,

    /// Read resource usage from the Kubernetes metrics API instead of the tunnel
    #[arg(long)]
    pub poll_metrics: bool,

    /// Directory log exports are written to
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Write tracing output to this file while the UI owns the terminal
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::CliArgs;
    use clap::{CommandFactory, Parser};

    #[test]
    fn target_is_required_and_flags_are_optional() {
        assert!(CliArgs::try_parse_from(["podlink"]).is_err());

        let args = CliArgs::try_parse_from([
            "podlink",
            "prod/web-1:app",
            "--base-url",
            "wss://ops.example.com",
            "--tail-lines",
            "20",
            "--no-follow",
            "--poll-metrics",
        ])
        .expect("args");
        assert_eq!(args.target, "prod/web-1:app");
        assert_eq!(args.base_url.as_deref(), Some("wss://ops.example.com"));
        assert_eq!(args.tail_lines, Some(20));
        assert!(args.no_follow);
        assert!(args.poll_metrics);
        assert_eq!(args.log_filter, "info");
        assert!(args.config.is_none());
    }

    #[test]
    fn token_can_come_from_the_environment() {
        let command = CliArgs::command();
        let token = command
            .get_arguments()
            .find(|arg| arg.get_id() == "token")
            .expect("token arg");
        assert_eq!(
            token.get_env().and_then(|name| name.to_str()),
            Some("PODLINK_TOKEN")
        );
        assert!(token.is_hide_env_values_set());
    }
}
