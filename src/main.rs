//! Billing Tags administration
//!
//! Inspect and edit tag definitions and object tags in a tag database.
//! Configuration comes from the environment (and `.env`), see `config.rs`.

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use billing_tags::utils::init_tracing;
use billing_tags::{
    BillingPredicate, CallContextFactory, CallOrigin, ObjectType, TagStoreConfig, TagUserApi, Target, UserType,
};

const USAGE: &str = "\
usage: billing_tags <command>

commands:
  definitions                               list tag definitions
  define <name> <description>               create a tag definition
  undefine <name>                           delete an unused tag definition
  tags <object_type> <object_id>            list tags and billing predicates
  tag <object_type> <object_id> <name>      attach a tag
  untag <object_type> <object_id> <name>    detach a tag";

fn parse_target(config: &TagStoreConfig, object_type: &str, object_id: &str) -> Result<Target> {
    let object_type: ObjectType = object_type.parse().map_err(anyhow::Error::msg)?;
    let object_id = Uuid::parse_str(object_id).with_context(|| format!("invalid object id '{}'", object_id))?;
    Ok(Target::new(config.default_tenant, object_id, object_type))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let config = TagStoreConfig::from_env();
    init_tracing(&config.log_filter).context("Failed to set tracing subscriber")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let (api, _audit) = TagUserApi::open(&config)
        .await
        .with_context(|| format!("Failed to open tag database {}", config.database_path.display()))?;
    let user = std::env::var("USER").unwrap_or_else(|_| "billing_tags".to_string());
    let ctx = CallContextFactory::default().create(user, CallOrigin::External, UserType::Admin);
    let tenant = config.default_tenant;

    info!("Running '{}' against {}", command, config.database_path.display());

    match (command.as_str(), &args[1..]) {
        ("definitions", []) => {
            for def in api.tag_definitions(tenant).await? {
                println!("{}", serde_json::to_string(&def)?);
            }
        }
        ("define", [name, description]) => {
            let def = api.create_tag_definition(tenant, name, description, &ctx).await?;
            println!("{}", serde_json::to_string(&def)?);
        }
        ("undefine", [name]) => {
            api.delete_tag_definition(tenant, name, &ctx).await?;
            println!("{}", json!({ "deleted": name }));
        }
        ("tags", [object_type, object_id]) => {
            let target = parse_target(&config, object_type, object_id)?;
            let store = api.tag_store_for(&target).await?;
            let mut predicates = serde_json::Map::new();
            for predicate in BillingPredicate::ALL {
                predicates.insert(predicate.as_str().to_string(), json!(store.allows(predicate)));
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "target": target,
                    "tags": store.members(),
                    "predicates": predicates,
                }))?
            );
        }
        ("tag", [object_type, object_id, name]) => {
            let target = parse_target(&config, object_type, object_id)?;
            let tag = api.add_tag(&target, name, &ctx).await?;
            println!("{}", serde_json::to_string(&tag)?);
        }
        ("untag", [object_type, object_id, name]) => {
            let target = parse_target(&config, object_type, object_id)?;
            let removed = api.remove_tag(&target, name, &ctx).await?;
            println!("{}", json!({ "removed": removed }));
        }
        _ => bail!("unrecognised command\n\n{}", USAGE),
    }

    Ok(())
}
