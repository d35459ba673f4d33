use anyhow::{Context, Result};
use clap::Parser;
use il2cpp_structs::{output, IndexOptions, Metadata, StructIndex};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[clap(author, version, about = "Generate IL2CPP struct layouts from a metadata table dump")]
struct Cli {
    /// JSON dump of the metadata tables
    tables: PathBuf,

    /// Where to write the struct document
    #[clap(short, long, default_value = "structs.json")]
    output: PathBuf,

    /// Only emit structs for type definitions
    #[clap(long)]
    no_generic_instances: bool,

    /// Leave the owning image out of each struct
    #[clap(long)]
    no_image_names: bool,

    /// Log each build pass
    #[clap(short, long)]
    verbose: bool,
}

fn read_metadata(tables: &Path) -> Result<Metadata> {
    let mut cache = tables.as_os_str().to_owned();
    cache.push(".bc");
    let cache = PathBuf::from(cache);

    Ok(if cache.exists() {
        let input = File::open(&cache).context("Failed to open table dump cache")?;
        Metadata::from_bincode(BufReader::new(input)).context("Failed to parse table dump cache")?
    } else {
        let input = File::open(tables).context("Failed to open table dump")?;
        println!("Table dump cache has not been created yet, this may take a while...");
        let metadata =
            Metadata::from_json(BufReader::new(input)).context("Failed to parse table dump")?;
        let cache_file = File::create(&cache).context("Failed to create table dump cache")?;
        metadata
            .write_bincode(BufWriter::new(cache_file))
            .context("Failed to serialize table dump cache")?;
        metadata
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    let metadata = read_metadata(&cli.tables)?;
    let options = IndexOptions {
        generic_instances: !cli.no_generic_instances,
        image_names: !cli.no_image_names,
    };
    let index = StructIndex::build(&metadata, &options).context("Failed to build struct index")?;
    let document = output::project(&index);

    let out = File::create(&cli.output).context("Failed to create output file")?;
    serde_json::to_writer_pretty(BufWriter::new(out), &document)
        .context("Failed to write struct document")?;
    println!("Wrote {} structs to {}", document.len(), cli.output.display());

    Ok(())
}
