use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::warn;

use stratus_core::provider::Provider;
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::wait::{CancelHandle, CancelToken, PollOptions, cancel_pair};
use stratus_provider_huaweicloud::jobs::wait_for_job;
use stratus_provider_huaweicloud::{Config, HuaweiCloudProvider, ServiceClient};

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Manage Huawei Cloud resources and wait for them to converge", long_about = None)]
struct Cli {
    /// Region to operate in (overrides HW_REGION_NAME)
    #[arg(long, global = true)]
    region: Option<String>,

    /// Profile of the shared config file (overrides HW_PROFILE)
    #[arg(long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the resource types the provider manages
    Types,
    /// Show the current state of a resource
    Read {
        resource_type: String,
        name: String,
        identifier: String,
    },
    /// Create a resource and wait until it is usable
    Create {
        resource_type: String,
        name: String,

        /// JSON file with the resource attributes
        #[arg(long)]
        attributes: PathBuf,
    },
    /// Delete a resource and wait until it is gone
    Delete {
        resource_type: String,
        name: String,
        identifier: String,
    },
    /// Wait for an asynchronous job to finish
    WaitJob {
        /// Service that issued the job (e.g., "ims")
        service: String,
        job_id: String,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let (handle, token) = cancel_pair();
    cancel_on_ctrl_c(handle);

    if let Err(e) = run(cli, token).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Cancel in-flight waits on the first Ctrl-C
fn cancel_on_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            handle.cancel();
        }
    });
}

async fn run(cli: Cli, token: CancelToken) -> Result<(), String> {
    let config = load_config(cli.region.as_deref(), cli.profile.as_deref())?;

    match cli.command {
        Commands::Types => {
            let provider = provider(&config, token)?;
            for resource_type in provider.resource_types() {
                println!("{}", resource_type);
            }
            Ok(())
        }
        Commands::Read {
            resource_type,
            name,
            identifier,
        } => {
            let provider = provider(&config, token)?;
            let id = ResourceId::new(resource_type, name);
            let state = provider
                .read(&id, &identifier)
                .await
                .map_err(|e| e.to_string())?;
            print_state(&state);
            Ok(())
        }
        Commands::Create {
            resource_type,
            name,
            attributes,
        } => {
            let provider = provider(&config, token)?;
            let resource = Resource {
                id: ResourceId::new(resource_type, name),
                attributes: read_attributes(&attributes)?,
            };
            println!("{} {}", "Creating".cyan().bold(), resource.id);
            let state = provider
                .create(&resource)
                .await
                .map_err(|e| e.to_string())?;
            println!("  {} {}", "✓".green(), resource.id);
            print_state(&state);
            Ok(())
        }
        Commands::Delete {
            resource_type,
            name,
            identifier,
        } => {
            let provider = provider(&config, token)?;
            let id = ResourceId::new(resource_type, name);
            println!("{} {}", "Deleting".red().bold(), id);
            provider
                .delete(&id, &identifier)
                .await
                .map_err(|e| e.to_string())?;
            println!("  {} {}", "✓".green(), id);
            Ok(())
        }
        Commands::WaitJob {
            service,
            job_id,
            timeout,
        } => {
            let client = ServiceClient::new(&config, &service).map_err(|e| e.to_string())?;
            let options = PollOptions::default().with_timeout(Duration::from_secs(timeout));
            let job = wait_for_job(&client, &job_id, options, Some(token))
                .await
                .map_err(|e| e.to_string())?;
            println!("{} job {}", "Finished".green().bold(), job_id);
            println!(
                "{}",
                serde_json::to_string_pretty(&job).map_err(|e| e.to_string())?
            );
            Ok(())
        }
    }
}

fn load_config(region: Option<&str>, profile: Option<&str>) -> Result<Config, String> {
    Config::from_lookup(|key: &str| match key {
        "HW_REGION_NAME" if region.is_some() => region.map(str::to_string),
        "HW_PROFILE" if profile.is_some() => profile.map(str::to_string),
        _ => std::env::var(key).ok(),
    })
    .map_err(|e| e.to_string())
}

fn provider(config: &Config, token: CancelToken) -> Result<HuaweiCloudProvider, String> {
    HuaweiCloudProvider::with_cancel(config, token).map_err(|e| e.to_string())
}

/// Read resource attributes from a JSON object file
fn read_attributes(path: &Path) -> Result<HashMap<String, Value>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    parse_attributes(&content).map_err(|e| format!("{}: {}", path.display(), e))
}

fn parse_attributes(content: &str) -> Result<HashMap<String, Value>, String> {
    let json: serde_json::Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    match Value::from_json(&json) {
        Some(Value::Map(attributes)) => Ok(attributes),
        _ => Err("attributes must be a JSON object".to_string()),
    }
}

fn print_state(state: &State) {
    if !state.exists {
        println!("{} {} does not exist", "-".yellow().bold(), state.id);
        return;
    }

    println!(
        "{} {}",
        state.id.to_string().cyan().bold(),
        state.identifier.as_deref().unwrap_or_default()
    );
    let mut keys: Vec<_> = state.attributes.keys().collect();
    keys.sort();
    for key in keys {
        println!("    {}: {}", key.bold(), format_value(&state.attributes[key]));
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::List(items) => {
            let strs: Vec<_> = items.iter().map(format_value).collect();
            format!("[{}]", strs.join(", "))
        }
        Value::Map(map) => {
            let mut strs: Vec<_> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect();
            strs.sort();
            format!("{{{}}}", strs.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attributes() {
        let attributes = parse_attributes(
            r#"{"name": "cache", "capacity": 4, "availability_zones": ["az1"], "password": null}"#,
        )
        .unwrap();
        assert_eq!(
            attributes.get("name"),
            Some(&Value::String("cache".to_string()))
        );
        assert_eq!(attributes.get("capacity"), Some(&Value::Int(4)));
        assert!(!attributes.contains_key("password"));
    }

    #[test]
    fn test_parse_attributes_requires_object() {
        let error = parse_attributes("[1, 2]").unwrap_err();
        assert_eq!(error, "attributes must be a JSON object");
    }

    #[test]
    fn test_format_value() {
        let value = Value::List(vec![
            Value::String("az1".to_string()),
            Value::Int(2),
            Value::Float(0.75),
        ]);
        assert_eq!(format_value(&value), "[\"az1\", 2, 0.75]");

        let map = Value::Map(HashMap::from([
            ("b".to_string(), Value::Bool(true)),
            ("a".to_string(), Value::Int(1)),
        ]));
        assert_eq!(format_value(&map), "{a: 1, b: true}");
    }

    #[test]
    fn test_cli_parses_wait_job() {
        let cli = Cli::try_parse_from([
            "stratus", "--region", "cn-north-4", "wait-job", "ims", "j-1", "--timeout", "30",
        ])
        .unwrap();
        assert_eq!(cli.region.as_deref(), Some("cn-north-4"));
        assert!(matches!(
            cli.command,
            Commands::WaitJob { ref service, timeout: 30, .. } if service == "ims"
        ));
    }
}
