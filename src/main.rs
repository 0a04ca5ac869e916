use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use log::LevelFilter;
use post_fx_stack::gpu::{HeadlessDevice, NamedTextures, ScratchTexturePool};
use post_fx_stack::{ApplyOptions, Catalog, FxContext, HashRandom, Stack, StackConfig};

#[derive(Debug, Default, Clone)]
struct Cli {
    stack: Option<PathBuf>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    catalog: Option<PathBuf>,
    dump_glsl: bool,
    seed: Option<u64>,
    verbose: bool,
}

const USAGE: &str = "usage: fx-stack --stack <stack.json> --input <in.png> --output <out.png> \
[--catalog <effects.json>] [--dump-glsl] [--seed <u64>] [--verbose]";

fn flag_value<'a>(args: &'a [String], i: usize, name: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing value for {name}"))
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--stack" => {
                cli.stack = Some(PathBuf::from(flag_value(args, i, "--stack")?));
                i += 2;
            }
            "--input" => {
                cli.input = Some(PathBuf::from(flag_value(args, i, "--input")?));
                i += 2;
            }
            "--output" => {
                cli.output = Some(PathBuf::from(flag_value(args, i, "--output")?));
                i += 2;
            }
            "--catalog" => {
                cli.catalog = Some(PathBuf::from(flag_value(args, i, "--catalog")?));
                i += 2;
            }
            "--seed" => {
                let raw = flag_value(args, i, "--seed")?;
                cli.seed = Some(
                    raw.parse()
                        .with_context(|| format!("--seed expects an unsigned integer, got {raw}"))?,
                );
                i += 2;
            }
            "--dump-glsl" => {
                cli.dump_glsl = true;
                i += 1;
            }
            "--verbose" | "-v" => {
                cli.verbose = true;
                i += 1;
            }
            "--help" | "-h" => return Err(anyhow!(USAGE)),
            other => return Err(anyhow!("unknown argument: {other}\n{USAGE}")),
        }
    }
    Ok(cli)
}

/// Logger for the CLI: `warn` by default, everything with `--verbose`.
/// `RUST_LOG` directives are applied on top in [`init_logging`].
fn logger_builder(verbose: bool) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Warn
    });
    builder
}

fn init_logging(verbose: bool) {
    let _ = logger_builder(verbose).parse_default_env().try_init();
}

fn run(cli: Cli) -> Result<()> {
    let stack_path = cli.stack.ok_or_else(|| anyhow!("--stack is required\n{USAGE}"))?;
    let input_path = cli.input.ok_or_else(|| anyhow!("--input is required\n{USAGE}"))?;
    let output_path = cli.output.ok_or_else(|| anyhow!("--output is required\n{USAGE}"))?;

    let mut catalog = Catalog::builtin().context("built-in effect catalog is invalid")?;
    if let Some(path) = &cli.catalog {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {}", path.display()))?;
        catalog
            .extend_from_json(&text)
            .with_context(|| format!("invalid catalog {}", path.display()))?;
    }

    let text = std::fs::read_to_string(&stack_path)
        .with_context(|| format!("failed to read stack {}", stack_path.display()))?;
    let config = StackConfig::from_json(&text)
        .with_context(|| format!("invalid stack {}", stack_path.display()))?;

    let image = image::open(&input_path)
        .with_context(|| format!("failed to load {}", input_path.display()))?
        .to_rgba8();
    let mut device = HeadlessDevice::new([image.width(), image.height()]);
    let mut pool = ScratchTexturePool::new();
    let mut textures = NamedTextures::new();
    let source = device.upload_image(image);
    textures.insert("input", source);

    let mut stack = match cli.seed {
        Some(seed) => Stack::with_random(Box::new(HashRandom::seeded(seed))),
        None => Stack::new(),
    };
    stack.configure(&config);

    let ctx = FxContext {
        catalog: &catalog,
        device: &mut device,
        pool: &mut pool,
        textures: &textures,
    };
    let report = stack.apply(ctx, source, None, &ApplyOptions::default());

    if cli.dump_glsl {
        for (index, pass) in stack.passes().iter().enumerate() {
            println!("// ---- pass {index}: {}", pass.effect_names().join(", "));
            println!("{}", pass.source());
        }
    }

    device
        .display_pixels()
        .save(&output_path)
        .with_context(|| format!("failed to write {}", output_path.display()))?;
    println!(
        "[fx-stack] {} passes, {} executed, saved {}",
        report.pass_count,
        report.passes_executed,
        output_path.display()
    );
    if let Some(pass) = report.aborted_at {
        println!("[fx-stack] pass {pass} failed; output is the image before it");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&args)?;
    init_logging(cli.verbose);
    run(cli)
}
