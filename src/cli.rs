use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Data directory holding config.yaml, the catalog and vectors.bin.
    /// Defaults to $ASSESSREC_BASE_PATH or ~/.local/share/assessrec
    #[clap(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP service.
    Serve {},

    /// Recommend assessments for a hiring query
    Recommend {
        /// Job description or free-text requirement
        #[clap(allow_hyphen_values = true)]
        text: String,

        /// Print the raw JSON response
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Build the vector index and persist it to the data directory
    Index {
        /// Discard persisted vectors and embed the whole catalog again
        #[clap(long, default_value = "false")]
        rebuild: bool,
    },
}
