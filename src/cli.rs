use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "clausecheck")]
#[command(version)]
#[command(about = "Analyze contracts, review flagged clauses, and negotiate edits with an AI service")]
pub struct Cli {
    /// Path to a TOML config file (defaults to ./clausecheck.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Session file holding contract, analysis and clause state
    #[arg(long, global = true, default_value = "clausecheck_session.json")]
    pub session: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Submit a contract for analysis (a file, or pasted text via --text)
    Analyze {
        /// Contract file to upload
        file: Option<PathBuf>,

        /// Pasted contract text instead of a file
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,

        /// Jurisdiction to analyze under
        #[arg(long, short, default_value = "US")]
        jurisdiction: String,

        /// Print the raw analysis JSON instead of the report
        #[arg(long)]
        json: bool,
    },

    /// Print the stored risk report and clause list
    Report {
        /// Print the raw analysis JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the contract with flagged clauses highlighted
    Show,

    /// Ask the service to explain one flagged risk
    Explain {
        /// The risk text to explain (e.g. a clause id like red-0, or free text)
        risk: String,
    },

    /// Extract plain text from a document and load it as the contract
    Extract {
        file: PathBuf,

        /// Jurisdiction for the loaded contract
        #[arg(long, short, default_value = "US")]
        jurisdiction: String,
    },

    /// Request a redlined copy of a .docx contract for one clause
    Redline {
        file: PathBuf,

        /// Clause id whose text drives the redline
        #[arg(long)]
        clause: String,

        /// Where to write the returned document
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Negotiate flagged clauses over the streaming chat
    Negotiate {
        /// Clause ids to target (repeatable); omit to choose interactively
        #[arg(long = "clause", short = 'c')]
        clauses: Vec<String>,

        /// One-shot instruction; omit to enter the interactive chat loop
        #[arg(long, short)]
        message: Option<String>,
    },

    /// Discard all session state
    Reset,
}
