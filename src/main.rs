use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use elfpatch::disasm::BackendKind;
use elfpatch::{AssemblyPreview, EditorConfig, PatchEngine};

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and patch ELF binaries in place", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// JSON editor configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Force a disassembler backend (iced or capstone)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print architecture, entry point, segments and code ranges
    Info {
        file: PathBuf,
    },
    /// List instructions
    Disasm {
        file: PathBuf,

        /// Start address (hex) or symbol; defaults to the entry point
        #[arg(long)]
        at: Option<String>,

        /// Number of instructions; defaults to the configured listing length
        #[arg(long)]
        count: Option<usize>,

        /// One JSON object per instruction
        #[arg(long)]
        json: bool,
    },
    /// Patch one location and save the file
    Patch(PatchArgs),
}

#[derive(Args, Debug)]
struct PatchArgs {
    file: PathBuf,

    /// Target address (hex) or symbol
    #[arg(long)]
    at: String,

    /// Replace the instruction with assembled text
    #[arg(long, conflicts_with_all = ["bytes", "nop"])]
    asm: Option<String>,

    /// Write raw hex bytes, e.g. "90 90"
    #[arg(long, conflicts_with = "nop")]
    bytes: Option<String>,

    /// Replace the instruction with NOPs
    #[arg(long)]
    nop: bool,

    /// Show the effect without writing
    #[arg(long)]
    dry_run: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<EditorConfig> {
    let mut config = match &cli.config {
        Some(path) => EditorConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => EditorConfig::default(),
    };
    if cli.backend.is_some() {
        config.backend = cli.backend;
    }
    Ok(config)
}

fn open(file: &Path, config: &EditorConfig) -> anyhow::Result<PatchEngine> {
    PatchEngine::open(file, config).with_context(|| format!("opening {}", file.display()))
}

fn cmd_info(file: &Path, config: &EditorConfig) -> anyhow::Result<()> {
    let engine = open(file, config)?;
    println!("file:         {}", engine.path().display());
    println!("architecture: {}", engine.architecture());
    println!("entry:        {:#x}", engine.entry_address());
    println!(
        "codecs:       {} / {}",
        engine.disassembler_name(),
        engine.assembler_name()
    );
    println!("segments:");
    for seg in engine.image().segments() {
        println!("  {}", seg);
    }
    println!("code ranges:");
    for range in engine.code().iter() {
        match engine.symbol_at(range.start) {
            Some(name) => println!("  {}  <{}>", range, name),
            None => println!("  {}", range),
        }
    }
    println!("symbols:      {}", engine.symbols().len());
    for (address, name) in engine.symbols().sorted() {
        println!("  {:#x}  {}", address, name);
    }
    Ok(())
}

fn cmd_disasm(
    file: &Path,
    config: &EditorConfig,
    at: Option<&str>,
    count: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let mut engine = open(file, config)?;
    let start = match at {
        Some(text) => engine.resolve_location(text)?,
        None => match engine.first_instruction() {
            Some(ins) => ins.address,
            None => bail!("{} has no decodable code", file.display()),
        },
    };
    let count = count.unwrap_or(config.listing_count);
    let listing = engine
        .listing_from(start, count)
        .with_context(|| format!("no instruction starts at {:#x}", start))?;

    for ins in &listing {
        if json {
            println!("{}", serde_json::to_string(ins)?);
            continue;
        }
        if let Some(name) = &ins.symbol {
            println!("\n<{}>:", name);
        }
        println!("{}", ins);
    }
    Ok(())
}

fn cmd_patch(args: &PatchArgs, config: &EditorConfig) -> anyhow::Result<()> {
    if args.asm.is_none() && args.bytes.is_none() && !args.nop {
        bail!("one of --asm, --bytes or --nop is required");
    }
    let mut engine = open(&args.file, config)?;
    let address = engine.resolve_location(&args.at)?;

    if args.dry_run {
        if let Some(text) = &args.asm {
            match engine.preview_assembly(address, text) {
                Some(AssemblyPreview::Unchanged) => println!("unchanged"),
                Some(AssemblyPreview::Fits { bytes, padding }) => {
                    println!("fits: {} ({} padding)", hex::encode(&bytes), padding)
                }
                Some(AssemblyPreview::Overflows { fitting, spill }) => println!(
                    "overflows: {} + {} spilling into following code",
                    hex::encode(&fitting),
                    hex::encode(&spill)
                ),
                None => bail!("{:?} does not assemble at {:#x}", text, address),
            }
        } else if let Some(hex_text) = &args.bytes {
            match engine.preview_bytes(address, hex_text) {
                Some(preview) => {
                    println!("{}", preview.instruction);
                    if !preview.leftover.is_empty() {
                        println!("leftover: {}", hex::encode(&preview.leftover));
                    }
                }
                None => bail!("{:?} does not decode at {:#x}", hex_text, address),
            }
        } else if args.nop {
            let ins = engine
                .instruction_at(address)
                .with_context(|| format!("no instruction starts at {:#x}", address))?;
            println!("would replace {} bytes: {}", ins.len(), ins.text);
        }
        return Ok(());
    }

    let outcome = if let Some(text) = &args.asm {
        engine.patch_instruction(address, text)?
    } else if let Some(hex_text) = &args.bytes {
        engine.patch_bytes(address, hex_text)?
    } else if args.nop {
        engine.nop_instruction(address)?
    } else {
        bail!("one of --asm, --bytes or --nop is required");
    };

    let saved = engine
        .save()
        .with_context(|| format!("saving {}", args.file.display()))?;
    info!(address = %format_args!("{:#x}", address), saved, "Patch applied");
    println!(
        "{:#x}: wrote {} ({} padding, {} spilled)",
        outcome.address,
        hex::encode(&outcome.bytes),
        outcome.padding,
        outcome.spill
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.log_json {
        elfpatch::logging::init_tracing_json(&cli.log_level);
    } else {
        elfpatch::logging::init_tracing(&cli.log_level);
    }
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Info { file } => cmd_info(file, &config),
        Command::Disasm {
            file,
            at,
            count,
            json,
        } => cmd_disasm(file, &config, at.as_deref(), *count, *json),
        Command::Patch(args) => cmd_patch(args, &config),
    }
}
