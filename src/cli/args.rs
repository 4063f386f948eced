//! Command-line argument definitions.

use crate::pipeline::state::{Level, Phase, Subject};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "planweave",
    version,
    about = "Generate source-traceable crisis-management action plans from a policy corpus"
)]
pub struct Args {
    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Explicit config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest a corpus directory of markdown documents into the knowledge store
    Ingest {
        /// Directory to scan for *.md files
        dir: PathBuf,

        /// Category tag applied to ingested documents
        #[arg(long)]
        doc_type: Option<String>,
    },

    /// Generate an action plan from the ingested corpus
    Generate {
        /// Plan name
        #[arg(long)]
        name: String,

        /// Textual timing guidance (e.g., "within 24h")
        #[arg(long)]
        timing: Option<String>,

        /// Organizational level: ministry, university, center
        #[arg(long)]
        level: Level,

        /// Crisis phase: preparedness, response
        #[arg(long)]
        phase: Phase,

        /// Crisis subject: war, sanction
        #[arg(long)]
        subject: Subject,

        /// Node ids injected through the special-protocols bypass lane
        #[arg(long = "special-protocol")]
        special_protocols: Vec<String>,

        /// Restrict retrieval to these documents
        #[arg(long = "document")]
        documents: Vec<String>,

        /// Guideline documents that are always included
        #[arg(long = "guideline")]
        guidelines: Vec<String>,

        /// Output path for the plan markdown
        #[arg(short, long, default_value = "plan.md")]
        output: PathBuf,
    },
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_args_parse() {
        let args = Args::try_parse_from([
            "planweave",
            "generate",
            "--name",
            "Ward Response",
            "--level",
            "center",
            "--phase",
            "response",
            "--subject",
            "war",
            "--special-protocol",
            "doc1_h5",
            "--document",
            "evac",
            "-o",
            "out/plan.md",
        ])
        .unwrap();

        match args.command {
            Command::Generate {
                name,
                level,
                phase,
                subject,
                special_protocols,
                documents,
                output,
                ..
            } => {
                assert_eq!(name, "Ward Response");
                assert_eq!(level, Level::Center);
                assert_eq!(phase, Phase::Response);
                assert_eq!(subject, Subject::War);
                assert_eq!(special_protocols, vec!["doc1_h5"]);
                assert_eq!(documents, vec!["evac"]);
                assert_eq!(output, PathBuf::from("out/plan.md"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_level_rejected() {
        let result = Args::try_parse_from([
            "planweave",
            "generate",
            "--name",
            "x",
            "--level",
            "district",
            "--phase",
            "response",
            "--subject",
            "war",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_ingest_args_parse() {
        let args = Args::try_parse_from(["planweave", "-v", "ingest", "./corpus"]).unwrap();
        assert_eq!(args.verbose, 1);
        match args.command {
            Command::Ingest { dir, doc_type } => {
                assert_eq!(dir, PathBuf::from("./corpus"));
                assert!(doc_type.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
