use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "archive",
    about = "Item archive: a tree of containers and items with attached images",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Data directory holding the database and blobs
    #[arg(short, long, global = true)]
    pub data: Option<PathBuf>,

    /// Configuration file (default: <data>/archive.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the data directory, database and default configuration
    Init,
    /// Create a resource at a path
    Add(AddArgs),
    /// Change a resource's metadata
    Edit(EditArgs),
    /// Attach an image to a resource, or clear it
    Attach(AttachArgs),
    /// List the children of a container
    Ls(LsArgs),
    /// Show one resource
    Show(PathArg),
    /// Print the id a path resolves to
    Resolve(PathArg),
    /// Print the path of a resource id
    Path(IdArg),
    /// Print every path under a resource
    Tree(TreeArgs),
    /// Move resources into a container
    Mv(MvArgs),
    /// Move every child of one container into another
    Reparent(ReparentArgs),
    /// Delete a resource
    Rm(RmArgs),
    /// Full-text search
    Search(SearchArgs),
    /// Work with the blob store directly
    Blob(BlobArgs),
    /// Import a directory hierarchy as resources
    Import(ImportArgs),
}

#[derive(Args)]
pub struct PathArg {
    pub path: String,
}

#[derive(Args)]
pub struct IdArg {
    pub id: String,
}

#[derive(Args)]
pub struct AddArgs {
    /// Full path of the new resource; its parent must exist
    pub path: String,
    #[arg(short, long, default_value = "item")]
    pub kind: String,
    #[arg(long, default_value = "")]
    pub color: String,
    #[arg(long, default_value = "")]
    pub comments: String,
    /// Image file to store and attach
    #[arg(long)]
    pub image: Option<PathBuf>,
}

#[derive(Args)]
pub struct EditArgs {
    pub path: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(short, long)]
    pub kind: Option<String>,
    #[arg(long)]
    pub color: Option<String>,
    #[arg(long)]
    pub comments: Option<String>,
}

#[derive(Args)]
pub struct AttachArgs {
    pub path: String,
    pub file: Option<PathBuf>,
    /// Remove the current image instead
    #[arg(long, conflicts_with = "file")]
    pub clear: bool,
}

#[derive(Args)]
pub struct LsArgs {
    /// Container to list (default: root)
    pub path: Option<String>,
}

#[derive(Args)]
pub struct TreeArgs {
    /// Anchor (default: root)
    pub path: Option<String>,
    /// Only containers, as offered for move targets
    #[arg(long)]
    pub containers: bool,
}

#[derive(Args)]
pub struct MvArgs {
    #[arg(required = true, num_args = 1..)]
    pub sources: Vec<String>,
    pub destination: String,
}

#[derive(Args)]
pub struct ReparentArgs {
    pub from: String,
    pub to: String,
}

#[derive(Args)]
pub struct RmArgs {
    pub path: String,
    /// Delete the whole subtree instead of reparenting children
    #[arg(long)]
    pub deep: bool,
}

#[derive(Args)]
pub struct SearchArgs {
    #[arg(required = true, num_args = 1..)]
    pub query: Vec<String>,
}

#[derive(Args)]
pub struct BlobArgs {
    #[command(subcommand)]
    pub action: BlobAction,
}

#[derive(Subcommand)]
pub enum BlobAction {
    /// Store a file and print its id
    Put { file: PathBuf },
    /// Write a blob to a file or stdout
    Get {
        id: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show size and integrity of a blob
    Stat { id: String },
}

#[derive(Args)]
pub struct ImportArgs {
    pub dir: PathBuf,
    /// Container to import under (default: root)
    #[arg(long, default_value = "/")]
    pub under: String,
}
