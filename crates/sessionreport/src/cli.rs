use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(name = "sessionreport", about = "Field collection session report generator")]
pub struct Cli {
    /// Project snapshot: a JSON dump of sessions, files, stats and prompts.
    pub project: String,

    /// Validation schema JSON file.
    #[arg(short = 's', long)]
    pub schema: Option<String>,

    /// Demographics rules JSON file (pin pattern plus attribute ids).
    #[arg(short = 'd', long)]
    pub demographics: Option<String>,

    /// Script-number classification rules JSON file.
    #[arg(short = 'c', long)]
    pub script_categories: Option<String>,

    /// Image prompt map JSON file (prompt names, corpus codes, exceptions).
    #[arg(long)]
    pub image_prompts: Option<String>,

    /// Include data from input prompts as columns.
    #[arg(short = 'i', long, action = ArgAction::SetTrue)]
    pub inputs: bool,

    /// Input prompt name to display name JSON map.
    #[arg(long)]
    pub input_renames: Option<String>,

    /// Expect bluetooth info in logs.
    #[arg(short = 'b', long, action = ArgAction::SetTrue)]
    pub bluetooth: bool,

    /// Include median values of stats in the schema.
    #[arg(short = 'm', long, action = ArgAction::SetTrue)]
    pub median_stats: bool,

    /// Do not upload the report.
    #[arg(short = 'n', long, action = ArgAction::SetTrue)]
    pub no_upload: bool,

    /// Override the automatic report name.
    #[arg(short = 'r', long)]
    pub report_name: Option<String>,

    /// Back up any existing report and recompute everything.
    #[arg(long, action = ArgAction::SetTrue)]
    pub from_scratch: bool,

    /// JSON array of corpus codes to exclude from stat checks.
    #[arg(long)]
    pub exclude_corpus_codes: Option<String>,

    /// JSON with rules for basic value substitutions.
    #[arg(long)]
    pub substitutions: Option<String>,

    /// Format all values in the Country column.
    #[arg(long, value_parser = ["alpha2", "alpha3", "full_name"])]
    pub countries: Option<String>,

    /// Prompt attribute keys to copy into the session row.
    #[arg(long, num_args = 1..)]
    pub prompt_attributes: Vec<String>,

    /// Directory the report tables are written to.
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: String,

    /// Worker pool size.
    #[arg(long, default_value_t = session_report_core::DEFAULT_WORKERS)]
    pub workers: usize,

    /// rclone remote the report is uploaded to.
    #[arg(long, default_value = "report:")]
    pub remote: String,

    #[arg(long, action = ArgAction::SetTrue)]
    pub verbose: bool,
}
