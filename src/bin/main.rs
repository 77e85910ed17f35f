//! One-shot CLI: analyze a question and print the response as JSON.

use clap::Parser;
use financial_research_agent::{agent::ResearchAgent, config::Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "analyze")]
#[command(version, about = "Answer a financial question with a validated analysis")]
struct Cli {
    /// The question, e.g. "What is the price of AAPL?"
    #[arg(required = true, trailing_var_arg = true, num_args = 1..)]
    question: Vec<String>,

    /// Print single-line JSON instead of pretty output
    #[arg(long)]
    compact: bool,
}

impl Cli {
    fn question(&self) -> String {
        self.question.join(" ")
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    dotenv::dotenv().ok();

    let settings = Settings::from_env()?;

    // Logs go to stderr so stdout stays valid JSON
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let agent = ResearchAgent::from_settings(&settings)?;
    let question = cli.question();

    info!(question = %question, "Running analysis");

    let response = agent.analyze(&question).await?;
    let rendered = if cli.compact {
        serde_json::to_string(&response)?
    } else {
        serde_json::to_string_pretty(&response)?
    };
    println!("{}", rendered);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_words_join_into_question() {
        let args = ["analyze", "What", "is", "the", "price", "of", "AAPL?"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.question(), "What is the price of AAPL?");
        assert!(!cli.compact);
    }

    #[test]
    fn test_help_and_version_are_not_questions() {
        let help = Cli::try_parse_from(["analyze", "--help"]).unwrap_err();
        assert_eq!(help.kind(), ErrorKind::DisplayHelp);

        let version = Cli::try_parse_from(["analyze", "--version"]).unwrap_err();
        assert_eq!(version.kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_question_is_required() {
        let err = Cli::try_parse_from(["analyze"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_compact_flag() {
        let cli = Cli::try_parse_from(["analyze", "--compact", "latest", "TSLA", "news"]).unwrap();
        assert!(cli.compact);
        assert_eq!(cli.question(), "latest TSLA news");
    }
}
