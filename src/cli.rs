//! Command-line interface for uopconv

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uop_core::flatten::DEFAULT_CHECKPOINT_EVERY;
use uop_core::{EntryOrder, ErrorPolicy};

#[derive(Parser)]
#[command(name = "uopconv")]
#[command(about = "uopconv - Read UOP containers and flatten them into legacy MUL files", long_about = None)]
pub struct Cli {
    /// Print debug output (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Flatten one UOP container into a MUL file
    Flatten {
        /// Source .uop container
        src: PathBuf,

        /// Destination .mul file
        dst: PathBuf,

        #[command(flatten)]
        flatten: FlattenArgs,
    },

    /// Convert every map*LegacyMUL.uop in a client directory
    Maps {
        /// Client directory holding the map*LegacyMUL.uop files
        uo_dir: PathBuf,

        /// Directory receiving the map*.mul files
        out_dir: PathBuf,

        #[command(flatten)]
        flatten: FlattenArgs,
    },

    /// Show header fields and directory statistics
    Info {
        /// Source .uop container
        src: PathBuf,
    },

    /// List entries, one per line
    List {
        /// Source .uop container
        src: PathBuf,

        /// Listing order
        #[arg(long, value_enum, default_value_t = Ordering::Offset)]
        ordering: Ordering,
    },

    /// Extract single entries or the whole container
    #[command(group(ArgGroup::new("selector").required(true).args(["index", "name", "all"])))]
    Extract {
        /// Source .uop container
        src: PathBuf,

        /// Entry index (directory order)
        #[arg(long)]
        index: Option<usize>,

        /// Entry path, resolved through its name hash
        #[arg(long)]
        name: Option<String>,

        /// Extract every entry as <index>.bin
        #[arg(long)]
        all: bool,

        /// Output file (or directory with --all)
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args, Clone)]
pub struct FlattenArgs {
    /// Order in which entries are concatenated
    #[arg(long, value_enum, default_value_t = Ordering::Offset)]
    pub ordering: Ordering,

    /// What to do with an entry that cannot be decoded
    #[arg(long, value_enum, default_value_t = OnError::Skip)]
    pub on_error: OnError,

    /// Save a checkpoint every N entries
    #[arg(long, default_value_t = DEFAULT_CHECKPOINT_EVERY)]
    pub checkpoint_every: usize,

    /// Ignore any existing checkpoint and start from the first entry
    #[arg(long)]
    pub no_resume: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Ordering {
    /// Directory traversal order
    Directory,
    /// Ascending payload offset
    Offset,
}

impl From<Ordering> for EntryOrder {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Directory => EntryOrder::Directory,
            Ordering::Offset => EntryOrder::PayloadOffset,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OnError {
    /// Stop at the first bad entry
    Abort,
    /// Skip bad entries and keep going
    Skip,
}

impl From<OnError> for ErrorPolicy {
    fn from(on_error: OnError) -> Self {
        match on_error {
            OnError::Abort => ErrorPolicy::Strict,
            OnError::Skip => ErrorPolicy::Lenient,
        }
    }
}
