//! psdview command line
//!
//!   psdview render art.psd -o art.png --hide Background
//!   psdview tree art.psd
//!   psdview info art.psd
//!   psdview cache stats

use clap::{Parser, Subcommand, ValueEnum};
use psdview_lib::annotations::Template;
use psdview_lib::cache::FileCache;
use psdview_lib::config::AppConfig;
use psdview_lib::file::types::LayerNode;
use psdview_lib::render::RenderMode;
use psdview_lib::{OpenOptions, PsdDocument};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "psdview", version, about = "Render, inspect and re-save PSD documents")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bypass the composite cache
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flatten a document to PNG or JPEG
    Render {
        input: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        #[command(flatten)]
        visibility: VisibilityArgs,
        /// Fit the output within this many pixels on each side
        #[arg(long, value_name = "PX")]
        max_size: Option<u32>,
    },
    /// Print the layer tree
    Tree {
        input: PathBuf,
        #[arg(long)]
        json: bool,
        /// Only print the subtree of the first layer or group with this name
        #[arg(long, value_name = "NAME")]
        layer: Option<String>,
    },
    /// Print document metadata as JSON
    Info { input: PathBuf },
    /// Write the document back to PSD with visibility edits applied
    Save {
        input: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        #[command(flatten)]
        visibility: VisibilityArgs,
    },
    /// Inspect or clear the composite cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Summarize an annotation template
    Template { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    Stats,
    Clear,
}

#[derive(clap::Args, Debug, Default)]
struct VisibilityArgs {
    /// Hide a layer or group by name (repeatable)
    #[arg(long, value_name = "NAME")]
    hide: Vec<String>,
    /// Show a layer or group by name (repeatable)
    #[arg(long, value_name = "NAME")]
    show: Vec<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Full,
    Light,
}

impl From<ModeArg> for RenderMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => RenderMode::Full,
            ModeArg::Light => RenderMode::Light,
        }
    }
}

fn main() -> ExitCode {
    psdview_lib::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = match &cli.config {
        Some(path) => AppConfig::load(path).map_err(|e| format!("{:?}: {}", path, e))?,
        None => AppConfig::load_default(),
    };
    let cache = if cli.no_cache {
        None
    } else {
        FileCache::from_config(&config.cache)
    };

    match cli.command {
        Command::Render {
            input,
            output,
            mode,
            visibility,
            max_size,
        } => {
            let mut options = OpenOptions::from_config(&config, cache);
            if let Some(mode) = mode {
                options = options.with_mode(mode.into());
            }
            let doc = PsdDocument::open(&input, options)?;
            apply_visibility(&doc, &visibility)?;

            let result = match max_size {
                Some(px) => doc
                    .thumbnail(px, px)
                    .map_err(String::from)
                    .and_then(|img| img.save(&output).map_err(|e| e.to_string())),
                None => doc.export_composite(&output).map_err(String::from),
            };
            if let Some(composite) = doc.composite() {
                println!("{}", composite.status_message());
            }
            doc.close();
            result
        }
        Command::Tree { input, json, layer } => {
            let doc = PsdDocument::open(&input, OpenOptions::from_config(&config, None))?;
            let tree = select_subtree(doc.get_layer_tree(), layer.as_deref())?;
            if json {
                let text = serde_json::to_string_pretty(&tree).map_err(|e| e.to_string())?;
                println!("{}", text);
            } else {
                for node in &tree {
                    print_node(node, 0);
                }
                let total: usize = tree.iter().map(LayerNode::count).sum();
                println!("{} node(s)", total);
            }
            Ok(())
        }
        Command::Info { input } => {
            let doc = PsdDocument::open(&input, OpenOptions::from_config(&config, None))?;
            let text = serde_json::to_string_pretty(&doc.info()).map_err(|e| e.to_string())?;
            println!("{}", text);
            Ok(())
        }
        Command::Save {
            input,
            output,
            visibility,
        } => {
            let doc = PsdDocument::open(&input, OpenOptions::from_config(&config, None))?;
            apply_visibility(&doc, &visibility)?;
            let target = output.as_deref().unwrap_or(input.as_path());
            doc.save_to(target)?;
            println!("Saved {}", target.display());
            Ok(())
        }
        Command::Cache { action } => {
            let cache = cache.ok_or_else(|| "cache is disabled".to_string())?;
            match action {
                CacheAction::Stats => {
                    let stats = cache.stats();
                    let text = serde_json::to_string_pretty(&stats).map_err(|e| e.to_string())?;
                    println!("{}", text);
                }
                CacheAction::Clear => {
                    cache.clear();
                    println!("Cleared {}", cache.dir().display());
                }
            }
            Ok(())
        }
        Command::Template { path } => print_template(&path),
    }
}

fn apply_visibility(doc: &PsdDocument, args: &VisibilityArgs) -> Result<(), String> {
    let edits = args
        .hide
        .iter()
        .map(|n| (n, false))
        .chain(args.show.iter().map(|n| (n, true)));

    for (name, visible) in edits {
        if !doc.set_layer_visibility(name, visible) {
            return Err(format!("no layer or group named {:?}", name));
        }
    }
    Ok(())
}

fn select_subtree(tree: Vec<LayerNode>, name: Option<&str>) -> Result<Vec<LayerNode>, String> {
    let Some(name) = name else {
        return Ok(tree);
    };
    tree.iter()
        .find_map(|node| node.find_by_name(name))
        .map(|node| vec![node.clone()])
        .ok_or_else(|| format!("no layer or group named {:?}", name))
}

fn print_node(node: &LayerNode, depth: usize) {
    let marker = if node.visible { "x" } else { " " };
    let suffix = if node.is_group { "/" } else { "" };
    println!(
        "{}[{}] {}{} ({:.0}%)",
        "  ".repeat(depth),
        marker,
        node.name,
        suffix,
        node.opacity * 100.0
    );
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

fn print_template(path: &Path) -> Result<(), String> {
    let template = Template::load(path)?;
    println!("Template v{} ({} layers)", template.version, template.layers.len());
    for layer in &template.layers {
        println!(
            "  [{}] #{} {} {} - {} shape(s)",
            if layer.visible { "x" } else { " " },
            layer.id,
            layer.name,
            layer.color,
            layer.shapes.len()
        );
    }
    Ok(())
}
