use clap::Args;
use serde_json::json;

use crate::access::Caller;
use crate::auth::{generate_jwt, Claims};
use crate::cli::{utils::output_success, OutputFormat};

use super::CallerArgs;

#[derive(Args, Debug)]
pub struct TokenArgs {
    #[command(flatten)]
    pub caller: CallerArgs,

    #[arg(long, help = "Signing secret (defaults to JWT_SECRET from configuration)")]
    pub secret: Option<String>,

    #[arg(long, help = "Token lifetime in hours (defaults to configuration)")]
    pub expiry_hours: Option<u64>,
}

pub fn handle(args: TokenArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let security = &crate::config::config().security;
    let secret = args.secret.unwrap_or_else(|| security.jwt_secret.clone());
    let caller = args.caller.to_caller()?;

    let mut claims = Claims::with_expiry(&args.caller.id, args.expiry_hours.unwrap_or(security.jwt_expiry_hours));
    claims.kind = caller.kind;
    claims.roles = caller.roles;
    claims.rights = caller.rights;
    claims.attributes = caller.attributes;
    claims.attributes.remove(Caller::ID_ATTRIBUTE);

    let token = generate_jwt(&claims, &secret)?;

    if let OutputFormat::Text = output_format {
        println!("{}", token);
        return Ok(());
    }
    output_success(&output_format, "token issued", Some(json!({ "token": token, "expires_at": claims.exp })))
}
