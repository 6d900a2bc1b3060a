use console::style;
use hostbroker::{BrokerConfig, ConnectionFactory};

pub fn execute(config: &BrokerConfig) -> anyhow::Result<()> {
    let factory = ConnectionFactory::from_config(config)?;
    let registry = factory.registry();

    println!("{}", style("Protocols").bold().cyan());
    println!();
    for name in registry.protocols() {
        let implementation = registry
            .lookup(&name)
            .map(|d| d.implementation())
            .unwrap_or_default();
        println!(
            "  {} {:<10} {}",
            style("●").green().bold(),
            style(&name).white().bold(),
            style(implementation).dim()
        );
    }

    let skipped = registry.skipped();
    if !skipped.is_empty() {
        println!();
        println!("{}", style("Skipped").bold().yellow());
        println!();
        for candidate in skipped {
            println!(
                "  {} {:<10} {}",
                style("○").dim(),
                style(&candidate.name).white(),
                style(candidate.reason).dim()
            );
        }
    }

    if !config.connections.is_empty() {
        println!();
        println!("{}", style("Connections").bold().cyan());
        println!();
        for (name, profile) in &config.connections {
            println!(
                "  {:<16} {}",
                style(name).white(),
                style(&profile.protocol).dim()
            );
        }
    }

    Ok(())
}
