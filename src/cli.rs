use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "thermalog",
    version,
    about = "Hourly thermal-log OCR parsing and hallucination screening"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Locate(LocateArgs),
    Parse(ParseArgs),
    Validate(ValidateArgs),
    Fields(FieldsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LocateArgs {
    #[arg(long)]
    pub ocr_text_path: PathBuf,

    #[arg(long)]
    pub config_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ParseArgs {
    #[arg(long)]
    pub ocr_text_path: PathBuf,

    #[arg(long)]
    pub target_hour: String,

    #[arg(long = "known-hour")]
    pub known_hours: Vec<String>,

    #[arg(long)]
    pub layout_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub strict: bool,

    #[arg(long)]
    pub config_path: Option<PathBuf>,

    #[arg(long)]
    pub output_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long)]
    pub reading_path: PathBuf,

    /// Stored flags. When absent the detector runs on the reading instead.
    #[arg(long)]
    pub flags_path: Option<PathBuf>,

    #[arg(long)]
    pub series_path: Option<PathBuf>,

    #[arg(long)]
    pub layout_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub strict: bool,

    #[arg(long)]
    pub config_path: Option<PathBuf>,

    #[arg(long)]
    pub output_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct FieldsArgs {
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Also write the effective configuration as a reloadable JSON document.
    #[arg(long)]
    pub output_path: Option<PathBuf>,
}
