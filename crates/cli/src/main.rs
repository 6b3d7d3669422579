//! iocat: command-line front end for a portable image catalog.
//!
//! Every invocation is one writer session against one catalog file. Copies of
//! the file can be edited independently and reconciled with `iocat merge`.

use std::fs::OpenOptions;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use iocat_core::{ImageKey, Mutation, WriterIdentity};
use iocat_engine::{Catalog, CatalogConfig, ConflictKind, ConflictReport};

#[derive(Parser)]
#[command(name = "iocat")]
#[command(about = "Tag, search and sync a portable image catalog")]
struct Cli {
    /// Catalog file to operate on
    #[arg(short = 'f', long, env = "IOCAT_CATALOG", default_value = "catalog.iocat")]
    catalog: PathBuf,

    /// Path to configuration file
    #[arg(short, long, env = "IOCAT_CONFIG")]
    config: Option<PathBuf>,

    /// Writer display name (overrides config file)
    #[arg(long, env = "IOCAT_WRITER")]
    writer: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new, empty catalog
    Init {
        /// Directory that image keys are relative to
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Add image files to the catalog
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Remove images from the catalog (metadata is kept in history)
    Remove {
        #[arg(required = true)]
        images: Vec<String>,
    },
    /// Add tags to an image
    Tag {
        image: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Remove tags from an image
    Untag {
        image: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Set or clear an image's display filename
    Rename {
        image: String,
        /// New name; omit to clear
        name: Option<String>,
    },
    /// Show one image's metadata
    Show { image: String },
    /// List images whose key, name or tags contain the text
    Search {
        #[arg(default_value = "")]
        text: String,
    },
    /// List tags with image counts
    Tags,
    /// Print the change log
    History {
        /// Only entries written by this writer
        #[arg(long)]
        mine: bool,
        /// Show at most this many of the newest entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Merge another copy of the catalog into this one
    Merge {
        other: PathBuf,
        /// Print what would change without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Check every entry's signature
    Verify,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("iocat=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(default_config_path);
    let mut config = match &config_path {
        Some(path) => CatalogConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CatalogConfig::default(),
    };
    if let Some(writer) = cli.writer {
        config.writer_name = writer;
    }
    if config.identity_path.is_none() {
        config.identity_path = dirs::config_dir().map(|d| d.join("iocat").join("identity.key"));
    }
    debug!(catalog = %cli.catalog.display(), writer = %config.writer_name, "starting");

    let identity = load_identity(&config)?;

    if let Command::Init { root } = &cli.command {
        let mut catalog = Catalog::create(&cli.catalog, identity, config)
            .with_context(|| format!("creating {}", cli.catalog.display()))?;
        if let Some(root) = root {
            let root = std::fs::canonicalize(root)
                .with_context(|| format!("library root {}", root.display()))?;
            catalog.set_library_root(&root)?;
        }
        info!(path = %cli.catalog.display(), "catalog created");
        return Ok(());
    }

    let mut catalog = Catalog::open(&cli.catalog, identity, config)
        .with_context(|| format!("opening {}", cli.catalog.display()))?;
    run(&mut catalog, cli.command)
}

fn run(catalog: &mut Catalog, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Init { .. } => bail!("{} already exists", catalog.path().display()),
        Command::Add { files } => {
            for file in files {
                let path = std::fs::canonicalize(&file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let key = catalog.key_for(&path)?;
                catalog.add_image(key.clone())?;
                println!("added {key}");
            }
        }
        Command::Remove { images } => {
            for image in images {
                let key = image_key(catalog, &image)?;
                catalog.remove_image(&key)?;
                println!("removed {key}");
            }
        }
        Command::Tag { image, tags } => {
            let key = image_key(catalog, &image)?;
            catalog.apply(Mutation::add_tags(key.clone(), tags))?;
            print_tags(catalog, &key);
        }
        Command::Untag { image, tags } => {
            let key = image_key(catalog, &image)?;
            catalog.apply(Mutation::remove_tags(key.clone(), tags))?;
            print_tags(catalog, &key);
        }
        Command::Rename { image, name } => {
            let key = image_key(catalog, &image)?;
            catalog.apply(Mutation::set_filename(key.clone(), name))?;
            if let Some(record) = catalog.record(&key) {
                println!("{key} -> {}", record.display_name());
            }
        }
        Command::Show { image } => {
            let key = image_key(catalog, &image)?;
            let Some(record) = catalog.record(&key) else {
                bail!("no image {key} in catalog");
            };
            println!("key:      {}", record.key);
            println!("name:     {}", record.display_name());
            println!("tags:     {}", join(record.tags.iter()));
            println!("modified: {} by {}", record.modified, record.last_writer);
        }
        Command::Search { text } => {
            for record in catalog.search(&text) {
                println!("{}\t{}\t{}", record.key, record.display_name(), join(record.tags.iter()));
            }
        }
        Command::Tags => {
            for (tag, count) in catalog.tag_counts() {
                println!("{count:>6}  {tag}");
            }
        }
        Command::History { mine, limit } => {
            let me = catalog.writer_id();
            let entries: Vec<_> = catalog
                .history()
                .iter()
                .filter(|e| !mine || e.writer == me)
                .collect();
            let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
            for entry in &entries[skip..] {
                println!(
                    "{:>6}  {}  {}  {}.{}: {} -> {}",
                    entry.seq, entry.hlc, entry.writer, entry.image, entry.field, entry.old, entry.new
                );
            }
        }
        Command::Merge { other, dry_run } => {
            let pending = catalog
                .begin_merge(&other)
                .with_context(|| format!("merging {}", other.display()))?;
            println!("{} entries from {}", pending.imported(), other.display());
            if dry_run {
                print_report(pending.report());
                pending.cancel();
            } else {
                match catalog.commit_merge(pending) {
                    Ok(report) => print_report(&report),
                    Err(e) if e.is_retryable() => {
                        eprintln!("merge failed, {} is unchanged; try again", catalog.path().display());
                        return Err(e.into());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Command::Verify => {
            catalog.verify_log()?;
            println!("{} entries verified", catalog.history().len());
        }
    }
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("iocat").join("config.toml"))
}

/// Read this writer's signing key, creating one on first use.
fn load_identity(config: &CatalogConfig) -> anyhow::Result<WriterIdentity> {
    let Some(path) = &config.identity_path else {
        return Ok(WriterIdentity::generate(config.writer_name.clone()));
    };
    if path.exists() {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("{} is not a 32-byte key", path.display()))?;
        return Ok(WriterIdentity::from_secret_bytes(&secret, config.writer_name.clone()));
    }

    let identity = WriterIdentity::generate(config.writer_name.clone());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_secret(path, &identity.secret_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), writer = %identity.writer_id(), "new writer identity");
    Ok(identity)
}

/// Write a key file readable only by its owner.
fn write_secret(path: &Path, secret: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path)?;
    file.write_all(secret)?;
    file.sync_all()
}

/// Accept either a catalog key or a path to a file under the library root.
fn image_key(catalog: &Catalog, arg: &str) -> anyhow::Result<ImageKey> {
    let path = Path::new(arg);
    if path.is_file() {
        return Ok(catalog.key_for(&std::fs::canonicalize(path)?)?);
    }
    Ok(ImageKey::new(arg)?)
}

fn print_tags(catalog: &Catalog, key: &ImageKey) {
    if let Some(record) = catalog.record(key) {
        println!("{key}: {}", join(record.tags.iter()));
    }
}

fn print_report(report: &ConflictReport) {
    if report.is_empty() {
        println!("no conflicts");
        return;
    }
    for notice in report.iter() {
        let what = match notice.kind {
            ConflictKind::Discarded => "overwritten",
            ConflictKind::DeletionOverridden => "removal undone by a concurrent edit",
        };
        println!(
            "{}.{}: {} {} by {}",
            notice.image, notice.field, what, notice.discarded.new, notice.discarded.writer
        );
    }
}

fn join<'a>(items: impl Iterator<Item = &'a String>) -> String {
    items.map(String::as_str).collect::<Vec<_>>().join(", ")
}
