pub mod explain;
pub mod token;
pub mod validate;

use clap::Args;

use crate::access::{Caller, PrincipalKind};
use crate::cli::utils::parse_pairs;

/// Caller description shared by the commands that act on behalf of one
#[derive(Args, Debug, Clone)]
pub struct CallerArgs {
    #[arg(long = "sub", help = "Caller id")]
    pub id: String,

    #[arg(long = "role", help = "Role held by the caller (repeatable)")]
    pub roles: Vec<String>,

    #[arg(long = "right", help = "Right held by the caller (repeatable)")]
    pub rights: Vec<String>,

    #[arg(long = "attr", help = "Caller attribute as key=value (repeatable)")]
    pub attributes: Vec<String>,

    #[arg(long, help = "Caller is an API token rather than a user")]
    pub api_token: bool,
}

impl CallerArgs {
    pub fn to_caller(&self) -> anyhow::Result<Caller> {
        let kind = if self.api_token { PrincipalKind::ApiToken } else { PrincipalKind::User };
        let mut caller = Caller::new(&self.id).with_kind(kind);
        for role in &self.roles {
            caller = caller.with_role(role);
        }
        for right in &self.rights {
            caller = caller.with_right(right);
        }
        for (name, value) in parse_pairs(&self.attributes)? {
            caller = caller.with_attribute(name, value);
        }
        Ok(caller)
    }
}
