use anyhow::Result;
use clap::Parser;
use vision_guide::guide::{GuideCliArgs, GuideConfig};

/// Stream camera object detections to a guidance client over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "vision-guide", version)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) guide: GuideCliArgs,
}

impl Cli {
    pub(crate) fn into_config(self) -> Result<GuideConfig> {
        GuideConfig::try_from(self.guide)
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_reach_the_config() {
        let cli = Cli::try_parse_from([
            "vision-guide",
            "--source",
            "synthetic",
            "--port",
            "9000",
            "--cors-origin",
            "http://a.test",
            "--cors-origin",
            "http://b.test",
            "--no-annotate",
        ])
        .expect("parse");
        let config = cli.into_config().expect("valid");
        assert_eq!(config.port, 9000);
        assert_eq!(config.cors_origins.len(), 2);
        assert!(!config.annotate);
    }
}
