use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use serde_json::json;

use crate::access::{AccessRegistry, AccessResolver, CallSite};
use crate::cli::{utils::output_success, OutputFormat};
use crate::database::RecordQuery;
use crate::filter::{Filter, FilterData};

use super::CallerArgs;

#[derive(Args, Debug)]
pub struct ExplainArgs {
    #[arg(help = "Access declarations file (YAML)")]
    pub file: PathBuf,

    #[arg(long, help = "Resource type name")]
    pub resource: String,

    #[arg(long, default_value = "list", help = "Operation name")]
    pub operation: String,

    #[arg(long, help = "JSON filter data (select, where, order, limit, offset)")]
    pub filter: Option<String>,

    #[command(flatten)]
    pub caller: CallerArgs,
}

pub fn handle(args: ExplainArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let registry = Arc::new(
        AccessRegistry::load(&args.file).with_context(|| format!("loading {}", args.file.display()))?,
    );
    let resolver = AccessResolver::new(registry.clone());
    let caller = args.caller.to_caller()?;

    let filter_data: FilterData = match &args.filter {
        Some(raw) => serde_json::from_str(raw).context("parsing --filter")?,
        None => FilterData::default(),
    };
    let (base, options) = Filter::parse(filter_data, crate::config::config().filter.max_nested_depth)?;

    let site = CallSite::new(args.resource, args.operation);
    let shape = registry.record_for(&site.resource)?;
    let explanation = resolver.explain(&site, &caller, base)?;
    let sql = RecordQuery::new(&registry, shape, explanation.predicate.clone(), options)?.to_sql()?;

    if let OutputFormat::Text = output_format {
        let level = |l: Option<crate::access::ScopeLevel>| l.map_or("none".to_string(), |l| l.to_string());
        println!("  rule from     {}", level(explanation.rule_level));
        println!("  policy from   {}", level(explanation.policy_level));
        println!("  applies       {}", explanation.applies);
        println!("  sql           {}", sql.query);
        println!("  params        {:?}", sql.params);
    }

    output_success(
        &output_format,
        &format!("resolved {}", site),
        Some(json!({ "explanation": explanation, "sql": sql.query, "params": sql.params })),
    )
}
