//! Plugin management commands

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use kiln_core::plugins::SweepReport;
use kiln_core::{PluginHost, PluginHostConfig, PluginInfo, PluginRegistry};
use kiln_plugin_api::PluginStatus;

use crate::config::ConfigLoader;

/// Plugin management arguments
#[derive(Args)]
pub struct PluginArgs {
    #[command(subcommand)]
    pub command: PluginCommands,
}

/// Plugin subcommands
#[derive(Subcommand)]
pub enum PluginCommands {
    /// List installed plugins
    List {
        /// Include plugins disabled in the registry
        #[arg(long)]
        all: bool,
        /// Load and enable plugins before listing, then shut them down
        #[arg(long)]
        load: bool,
    },
    /// Show plugin details
    Info {
        /// Plugin name
        name: String,
    },
    /// Show the load order and dependency problems
    Order,
    /// Enable a plugin in the registry
    Enable {
        /// Plugin name to enable
        name: String,
    },
    /// Disable a plugin in the registry
    Disable {
        /// Plugin name to disable
        name: String,
    },
    /// Load and enable all plugins, then wait for Ctrl-C
    Run,
}

/// Run plugin command
pub async fn run(args: PluginArgs) -> Result<()> {
    let config = ConfigLoader::load()?.host_config();
    let mut host = PluginHost::new(config);

    match args.command {
        PluginCommands::List { all, load } => list_plugins(&mut host, all, load),
        PluginCommands::Info { name } => show_plugin_info(&mut host, &name),
        PluginCommands::Order => show_order(&mut host),
        PluginCommands::Enable { name } => enable_plugin(&host, &name),
        PluginCommands::Disable { name } => disable_plugin(&host, &name),
        PluginCommands::Run => run_plugins(&mut host).await,
    }
}

fn list_plugins(host: &mut PluginHost, all: bool, load: bool) -> Result<()> {
    if load {
        host.load_all()?;
        report_sweep(&host.enable_plugins());
    } else {
        host.discover_all()?;
    }

    let plugins = host.list_plugins();
    let disabled = if all {
        registry_disabled(host.config())?
    } else {
        Vec::new()
    };

    if plugins.is_empty() && disabled.is_empty() {
        let dir = host.config().user_plugin_dir.display().to_string();
        println!("No plugins installed");
        println!();
        println!("Plugin directory: {dir}");
        println!();
        println!("To install a plugin:");
        println!("  1. Create a plugin directory: mkdir -p {dir}/my-plugin");
        println!("  2. Add its manifest: {dir}/my-plugin/plugin.toml");
        println!("  3. Copy the plugin library: cp libmy_plugin.so {dir}/my-plugin/");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Plugin").fg(Color::Cyan),
        Cell::new("Version").fg(Color::Cyan),
        Cell::new("Status").fg(Color::Cyan),
        Cell::new("Depends on").fg(Color::Cyan),
        Cell::new("Notes").fg(Color::Cyan),
    ]);

    for info in &plugins {
        table.add_row(vec![
            Cell::new(&info.name),
            Cell::new(&info.descriptor.version),
            status_cell(info),
            Cell::new(info.descriptor.hard_dependencies.join(", ")),
            Cell::new(diagnostics(info).join("; ")),
        ]);
    }
    for name in &disabled {
        table.add_row(vec![
            Cell::new(name),
            Cell::new("-"),
            Cell::new("disabled").fg(Color::DarkGrey),
            Cell::new(""),
            Cell::new("disabled in registry"),
        ]);
    }

    println!("{table}");

    if load {
        host.shutdown();
    }
    Ok(())
}

fn show_plugin_info(host: &mut PluginHost, name: &str) -> Result<()> {
    host.discover_all()?;

    let Some(info) = host.get_plugin_info(name) else {
        println!("Plugin '{}' not found", name);
        println!();
        println!("The plugin might not be installed or might be disabled.");
        println!("Run 'kiln plugin list --all' to see all plugins.");
        return Ok(());
    };

    let d = &info.descriptor;
    println!("Name:         {}", d.name);
    println!("Version:      {}", d.version);
    println!("Entry point:  {}", d.entry_point);
    println!(
        "Authors:      {}",
        if d.authors.is_empty() {
            "Unknown".to_string()
        } else {
            d.authors.join(", ")
        }
    );
    println!(
        "Description:  {}",
        d.description.as_deref().unwrap_or("No description")
    );
    if let Some(website) = &d.website {
        println!("Website:      {}", website);
    }
    if let Some(origin) = &info.origin {
        println!("Package:      {}", origin.display());
    }
    println!();
    println!("Depends on:   {}", list_or_none(&d.hard_dependencies));
    println!("Soft deps:    {}", list_or_none(&d.soft_dependencies));
    println!("Load before:  {}", list_or_none(&d.load_before));
    println!("Required by:  {}", list_or_none(&host.dependents_of(name)));

    let notes = diagnostics(&info);
    if !notes.is_empty() {
        println!();
        for note in notes {
            println!("! {}", note);
        }
    }

    Ok(())
}

fn show_order(host: &mut PluginHost) -> Result<()> {
    host.discover_all()?;
    let resolution = host.resolution();

    if resolution.order.is_empty() && resolution.missing.is_empty() {
        println!("No plugins discovered");
        return Ok(());
    }

    println!("Load order:");
    for (i, name) in resolution.order.iter().enumerate() {
        let marker = if resolution.is_circular(name) {
            "  (circular)"
        } else {
            ""
        };
        println!("  {:>3}. {}{}", i + 1, name, marker);
    }

    if !resolution.missing.is_empty() {
        println!();
        println!("Excluded (missing dependencies):");
        for name in &resolution.missing {
            println!("  {} needs {}", name, resolution.missing_for(name).join(", "));
        }
    }

    if !resolution.circular.is_empty() {
        println!();
        println!("Circular dependencies: {}", resolution.circular.join(", "));
    }

    Ok(())
}

fn enable_plugin(host: &PluginHost, name: &str) -> Result<()> {
    if host.enable_in_registry(name)? {
        println!("Enabled plugin: {}", name);
    } else {
        println!("Plugin '{}' is already enabled", name);
    }
    println!("Run 'kiln plugin list' to verify the plugin is discovered.");
    Ok(())
}

fn disable_plugin(host: &PluginHost, name: &str) -> Result<()> {
    if host.disable_in_registry(name)? {
        println!("Disabled plugin: {}", name);
    } else {
        println!("Plugin '{}' is already disabled", name);
    }
    Ok(())
}

async fn run_plugins(host: &mut PluginHost) -> Result<()> {
    host.load_all()?;
    let report = host.enable_plugins();
    report_sweep(&report);

    let enabled = host
        .list_plugins()
        .iter()
        .filter(|p| p.status == PluginStatus::Enabled)
        .count();
    if host.plugin_count() == 0 {
        host.shutdown();
        bail!("No plugins could be loaded");
    }

    println!("{} plugin(s) enabled. Press Ctrl-C to stop.", enabled);
    tokio::signal::ctrl_c().await?;

    println!();
    tracing::info!("Shutting down plugins");
    report_sweep(&host.shutdown());
    Ok(())
}

/// Names disabled in the operator registry.
fn registry_disabled(config: &PluginHostConfig) -> Result<Vec<String>> {
    let registry = PluginRegistry::load(&config.registry_path)?;
    Ok(registry.disabled_plugins().map(str::to_string).collect())
}

fn report_sweep(report: &SweepReport) {
    for (name, err) in &report.failed {
        eprintln!("✗ {}: {}", name, err);
    }
    for name in &report.vetoed {
        eprintln!("○ {}: vetoed", name);
    }
    for name in &report.deferred {
        eprintln!("○ {}: still required by enabled plugins", name);
    }
}

fn status_cell(info: &PluginInfo) -> Cell {
    let label = info.status.as_str().to_lowercase();
    let color = if info.failure.is_some() {
        Color::Red
    } else {
        match info.status {
            PluginStatus::Enabled => Color::Green,
            PluginStatus::Unloaded | PluginStatus::Disabled => Color::DarkGrey,
            _ => Color::Yellow,
        }
    };
    Cell::new(label).fg(color)
}

/// Problems worth showing next to a plugin.
fn diagnostics(info: &PluginInfo) -> Vec<String> {
    let mut notes = Vec::new();
    if !info.missing_dependencies.is_empty() {
        notes.push(format!("missing {}", info.missing_dependencies.join(", ")));
    }
    if info.circular {
        notes.push("dependency cycle".to_string());
    }
    if let Some(reason) = &info.failure {
        notes.push(format!("failed: {reason}"));
    }
    notes
}

fn list_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_plugin_api::PluginDescriptor;
    use tempfile::TempDir;

    fn info(name: &str) -> PluginInfo {
        PluginInfo {
            name: name.to_string(),
            descriptor: PluginDescriptor::new(name, format!("{name}::Plugin"), "1.0.0"),
            status: PluginStatus::Unloaded,
            origin: None,
            failure: None,
            missing_dependencies: Vec::new(),
            circular: false,
        }
    }

    #[test]
    fn test_plugin_args_parsing() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(subcommand)]
            cmd: PluginCommands,
        }

        let cli = TestCli::parse_from(["test", "list"]);
        assert!(matches!(cli.cmd, PluginCommands::List { all: false, load: false }));

        let cli = TestCli::parse_from(["test", "list", "--all", "--load"]);
        assert!(matches!(cli.cmd, PluginCommands::List { all: true, load: true }));

        let cli = TestCli::parse_from(["test", "enable", "my-plugin"]);
        assert!(matches!(cli.cmd, PluginCommands::Enable { name } if name == "my-plugin"));

        let cli = TestCli::parse_from(["test", "disable", "my-plugin"]);
        assert!(matches!(cli.cmd, PluginCommands::Disable { name } if name == "my-plugin"));

        let cli = TestCli::parse_from(["test", "info", "my-plugin"]);
        assert!(matches!(cli.cmd, PluginCommands::Info { name } if name == "my-plugin"));

        let cli = TestCli::parse_from(["test", "order"]);
        assert!(matches!(cli.cmd, PluginCommands::Order));

        let cli = TestCli::parse_from(["test", "run"]);
        assert!(matches!(cli.cmd, PluginCommands::Run));
    }

    #[test]
    fn test_enable_disable_roundtrip() {
        let dir = TempDir::new().unwrap();
        let config = PluginHostConfig::rooted(dir.path());
        let host = PluginHost::new(config.clone());

        disable_plugin(&host, "test-plugin").unwrap();
        assert_eq!(registry_disabled(&config).unwrap(), vec!["test-plugin"]);

        enable_plugin(&host, "test-plugin").unwrap();
        assert!(registry_disabled(&config).unwrap().is_empty());
    }

    #[test]
    fn test_diagnostics_lists_every_problem() {
        let mut plugin = info("a");
        assert!(diagnostics(&plugin).is_empty());

        plugin.missing_dependencies = vec!["b".to_string()];
        plugin.circular = true;
        plugin.failure = Some("boom".to_string());

        assert_eq!(
            diagnostics(&plugin),
            vec!["missing b", "dependency cycle", "failed: boom"]
        );
    }

    #[test]
    fn test_list_or_none() {
        assert_eq!(list_or_none(&[]), "-");
        assert_eq!(list_or_none(&["a".to_string(), "b".to_string()]), "a, b");
    }
}
