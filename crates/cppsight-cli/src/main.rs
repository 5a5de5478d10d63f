//! cppsight CLI
//!
//! Command-line front end for the preprocessor: enumerate the `#ifdef`
//! configurations of a translation unit, or dump the preprocessed text of
//! one or all of them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cppsight_core::{Diagnostic, ErrorSink, Settings};
use cppsight_preprocessor::Preprocessor;

#[derive(Parser)]
#[command(name = "cppsight")]
#[command(author, version, about = "Configuration-enumerating C/C++ preprocessor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configurations found in a source file
    Configs {
        /// Source file to inspect
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Extra include search directory (repeatable)
        #[arg(short = 'I', value_name = "DIR")]
        include: Vec<PathBuf>,
    },

    /// Print preprocessed output
    Preprocess {
        /// Source file to preprocess
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Only emit this configuration (e.g. "A;B=2")
        #[arg(short, long, value_name = "CFG")]
        config: Option<String>,

        /// Defines applied to every configuration, e.g. "A;B=2"
        #[arg(short = 'D', long, value_name = "DEFINES", default_value = "")]
        defines: String,

        /// Symbol that must never be defined (repeatable)
        #[arg(short = 'U', value_name = "NAME")]
        undef: Vec<String>,

        /// Extra include search directory (repeatable)
        #[arg(short = 'I', value_name = "DIR")]
        include: Vec<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Prints diagnostics to stderr as they arrive
struct ConsoleSink;

impl ErrorSink for ConsoleSink {
    fn report(&mut self, diagnostic: &Diagnostic) {
        let location = diagnostic
            .locations
            .first()
            .map(|loc| format!("{}: ", loc))
            .unwrap_or_default();
        eprintln!(
            "{}{}: {} [{}]",
            location, diagnostic.severity, diagnostic.message, diagnostic.id
        );
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Configs { file, include } => cmd_configs(&file, &include)?,
        Commands::Preprocess {
            file,
            config,
            defines,
            undef,
            include,
            format,
            output,
        } => cmd_preprocess(&file, config, defines, undef, include, &format, output)?,
    }

    Ok(())
}

fn cmd_configs(file: &PathBuf, include: &[PathBuf]) -> Result<()> {
    let source = std::fs::read_to_string(file)?;

    let mut settings = Settings::default();
    settings.include_paths = include.to_vec();
    let mut sink = ConsoleSink;
    let mut pp = Preprocessor::new(&mut settings, &mut sink);

    let result = pp.preprocess_source(&source, &file.to_string_lossy(), include);

    for cfg in &result.configurations {
        if cfg.is_empty() {
            println!("(default)");
        } else {
            println!("{}", cfg);
        }
    }

    Ok(())
}

fn cmd_preprocess(
    file: &PathBuf,
    config: Option<String>,
    defines: String,
    undef: Vec<String>,
    include: Vec<PathBuf>,
    format: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let source = std::fs::read_to_string(file)?;
    let filename = file.to_string_lossy().into_owned();

    let mut settings = Settings::default();
    settings.user_defines = defines.clone();
    settings.user_undefs = undef.into_iter().collect();
    settings.include_paths = include.clone();

    let mut sink = ConsoleSink;
    let mut pp = Preprocessor::new(&mut settings, &mut sink);
    let result = pp.preprocess_source(&source, &filename, &include);

    // with explicit defines there is exactly one configuration to emit
    let configurations: Vec<String> = if !defines.is_empty() {
        vec![defines]
    } else if let Some(cfg) = config {
        vec![cfg]
    } else {
        result.configurations.clone()
    };

    let mut rendered = String::new();
    let mut json_map = serde_json::Map::new();
    for cfg in &configurations {
        let text = pp.emit(&result.text, cfg, &filename);
        if format == "json" {
            json_map.insert(cfg.clone(), serde_json::Value::String(text));
        } else {
            if configurations.len() > 1 {
                rendered.push_str(&format!("// configuration: {:?}\n", cfg));
            }
            rendered.push_str(&text);
        }
    }

    if pp.missing_includes() {
        eprintln!("note: one or more includes could not be resolved");
    }

    let out = if format == "json" {
        serde_json::to_string_pretty(&serde_json::Value::Object(json_map))?
    } else {
        rendered
    };

    match output {
        Some(path) => std::fs::write(path, out)?,
        None => print!("{}", out),
    }

    Ok(())
}
