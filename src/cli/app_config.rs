use clap::Parser;
use rslow::SlowOptions;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about)]
pub struct Cli {
    ///  Address to listen on
    #[arg(short = 'b', long = "bind", value_name = "addr", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,
    /// JSON options file, e.g. {"threshold": 500, "tags": ["api"]}
    #[arg(short = 'c', long = "config", value_name = "file")]
    pub config_path_option: Option<PathBuf>,
    /// Milliseconds a request may take before it is reported
    #[arg(short = 't', long = "threshold", value_name = "ms", allow_negative_numbers = true)]
    pub threshold_option: Option<i64>,
    /// Extra tag for every report (repeatable)
    #[arg(long = "tag", value_name = "tag")]
    pub tags: Vec<String>,
    /// Report every request, not just slow ones
    #[arg(short = 'a', long = "all-requests")]
    pub all_requests: bool,
    /// Include the request id in reports
    #[arg(long = "include-id")]
    pub include_id: bool,
    /// Time each pipeline phase of every request
    #[arg(short = 'l', long = "lifecycle")]
    pub lifecycle: bool,
    /// Require this bearer token on every route
    #[arg(long = "token", value_name = "token")]
    pub token_option: Option<String>,
    /// Log as JSON lines
    #[arg(long = "json")]
    pub json: bool,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl Cli {
    /// File options first, then flags on top.
    pub fn slow_options(&self) -> Result<SlowOptions, anyhow::Error> {
        let mut options = match self.config_path_option.as_ref() {
            Some(path) => SlowOptions::from_file(path)?,
            None => SlowOptions::default(),
        };
        if let Some(threshold) = self.threshold_option {
            options.threshold = threshold;
        }
        options.tags.extend(self.tags.iter().cloned());
        options.verbose |= self.all_requests;
        options.include_id |= self.include_id;
        options.request_lifecycle |= self.lifecycle;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "rslow", "--threshold", "10", "--tag", "error", "-a", "--lifecycle",
        ]);
        let options = cli.slow_options().unwrap();
        assert_eq!(options.threshold, 10);
        assert!(options.tags.contains("error"));
        assert!(options.tags.contains(rslow::config::BASE_TAG));
        assert!(options.verbose);
        assert!(options.request_lifecycle);
        assert!(!options.include_id);
    }

    #[test]
    fn defaults_without_flags() {
        let cli = Cli::parse_from(["rslow"]);
        assert_eq!(cli.bind, "127.0.0.1:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(cli.slow_options().unwrap(), SlowOptions::default());
    }
}
