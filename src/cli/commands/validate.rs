use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde_json::json;

use crate::access::AccessRegistry;
use crate::cli::{utils::output_success, OutputFormat};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[arg(help = "Access declarations file (YAML)")]
    pub file: PathBuf,
}

pub fn handle(args: ValidateArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let registry = AccessRegistry::load(&args.file)
        .with_context(|| format!("loading {}", args.file.display()))?;
    let report = registry.validate()?;

    if let OutputFormat::Text = output_format {
        for site in &report.restricted {
            println!("  restricted    {}", site);
        }
        for site in &report.unrestricted {
            println!("  unrestricted  {}", site);
        }
    }

    output_success(
        &output_format,
        &format!(
            "{} valid: {} record types, {} resources",
            args.file.display(),
            report.records,
            report.resources
        ),
        Some(json!({ "report": report })),
    )
}
