//! Stencil Runtime
//!
//! Boots the in-process host, registers the template module and renders one
//! template through the host-visible `Template` API.

mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use settings::{DemoSettings, Settings};
use std::path::PathBuf;
use stencil_host::Host;

stencil_template::export_module!(stencil_text::TextTemplate);

#[derive(Debug, Parser)]
#[command(name = "stencil", version, about = "Render a template through the plugin boundary")]
struct Cli {
    /// JSON settings file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Template file, instead of the one in the settings
    #[arg(long)]
    template: Option<PathBuf>,

    /// JSON data file, instead of the data in the settings
    #[arg(long)]
    data: Option<PathBuf>,

    /// Collect after rendering and report what was finalized
    #[arg(long)]
    gc: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(settings.level()?)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Stencil v{}", env!("CARGO_PKG_VERSION"));

    let mut demo = settings.demo.clone();
    if let Some(path) = &cli.template {
        demo.template = std::fs::read_to_string(path)
            .with_context(|| format!("reading template {}", path.display()))?;
        if let Some(name) = path.file_name() {
            demo.name = name.to_string_lossy().into_owned();
        }
    }
    if let Some(path) = &cli.data {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading data {}", path.display()))?;
        demo.data = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    }

    let host = Host::new(settings.host.clone()).context("starting host")?;
    host.load_module("stencil", stencil_module_init)
        .context("loading template module")?;
    tracing::debug!(live_references = host.live_references(), "module registered");

    let output = render(&host, &demo)?;
    print!("{output}");

    if cli.gc {
        let stats = host.gc();
        tracing::info!(
            finalized = stats.finalized,
            live_wraps = host.live_wraps(),
            live_references = host.live_references(),
            "collected"
        );
    }

    Ok(())
}

/// Script that drives the `Template` API the way a host program would.
/// Every settings value enters as a JSON literal.
fn script(demo: &DemoSettings) -> Result<String> {
    let mut body = format!(
        "const t = new stencil.Template({});\n",
        serde_json::to_string(&demo.name)?
    );
    if demo.helpers {
        body.push_str(if demo.hermetic {
            "t.addHermeticHelperFuncs();\n"
        } else {
            "t.addHelperFuncs();\n"
        });
    }
    if !demo.options.is_empty() {
        body.push_str(&format!("t.option(...{});\n", serde_json::to_string(&demo.options)?));
    }
    body.push_str(&format!("t.parse({});\n", serde_json::to_string(&demo.template)?));
    body.push_str(&format!("return t.executeString({});", serde_json::to_string(&demo.data)?));
    Ok(format!("(() => {{\n{body}\n}})()"))
}

fn render(host: &Host, demo: &DemoSettings) -> Result<String> {
    let source = script(demo)?;
    tracing::trace!(%source, "rendering");
    Ok(host.eval(&source)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_host::HostConfig;

    fn load() -> Host {
        let host = Host::new(HostConfig::default()).unwrap();
        host.load_module("stencil", stencil_module_init).unwrap();
        host
    }

    #[test]
    fn default_demo_renders() {
        let host = load();
        let output = render(&host, &Settings::default().demo).unwrap();
        assert_eq!(output, "Hello, stencil! WELCOME\n");
    }

    #[test]
    fn options_reach_the_engine() {
        let host = load();
        let mut demo = Settings::default().demo;
        demo.template = "{{ .missing }}".into();
        demo.options = vec!["missingkey=error".into()];
        let err = render(&host, &demo).unwrap_err();
        assert!(err.to_string().contains("map has no entry for key \"missing\""), "{err}");
    }

    #[test]
    fn json_data_converts() {
        let host = load();
        let mut demo = Settings::default().demo;
        demo.template = "{{ .a }} {{ .b.c }} {{ .d }}".into();
        demo.data = serde_json::json!({ "a": [1, 2.5], "b": { "c": true }, "d": null });
        let output = render(&host, &demo).unwrap();
        assert_eq!(output, "[1 2.5] true <no value>");
    }

    #[test]
    fn settings_text_cannot_escape_its_literal() {
        let host = load();
        let mut demo = Settings::default().demo;
        demo.name = "x'); throw new Error('injected".into();
        demo.template = "})(); {{ .name }}".into();
        let output = render(&host, &demo).unwrap();
        assert_eq!(output, "})(); stencil");
    }
}
