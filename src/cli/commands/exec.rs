use anyhow::Context;
use console::style;
use hostbroker::{BrokerConfig, ConnectionFactory, ConnectionOptions};

/// Parse `key=value`, reading the value as a YAML scalar so `port=22` is a
/// number and `verbose=true` a boolean.
pub fn parse_option(arg: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", arg))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing option name in '{}'", arg));
    }

    let value: serde_json::Value = serde_yaml::from_str(value)
        .map_err(|e| format!("invalid value for '{}': {}", key, e))?;
    Ok((key.to_string(), value))
}

pub async fn execute(
    config: &BrokerConfig,
    profile: Option<String>,
    protocol: Option<String>,
    overrides: Vec<(String, serde_json::Value)>,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let (protocol, mut options) = match (profile, protocol) {
        (Some(name), _) => {
            let profile = config.profile(&name)?;
            (profile.protocol.clone(), profile.connection_options()?)
        }
        (None, Some(protocol)) => (protocol, ConnectionOptions::new()),
        (None, None) => anyhow::bail!("either --profile or --protocol is required"),
    };
    options.extend(overrides);

    let factory = ConnectionFactory::from_config(config)?;
    let mut connection = factory
        .get_connection(&protocol, &options)
        .await
        .with_context(|| format!("Failed to connect with '{}'", protocol))?;

    let command = command.join(" ");
    tracing::debug!("Running '{}' over {}", command, protocol);

    let output = connection.execute(&command).await?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);

    if let Err(e) = connection.close().await {
        eprintln!(
            "{} Failed to close connection: {}",
            style("!").yellow().bold(),
            e
        );
    }

    if !output.success {
        std::process::exit(i32::try_from(output.exit_code).unwrap_or(1));
    }

    Ok(())
}
