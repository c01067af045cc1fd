//! lc3-bus: two LC-3 VMs exchanging words over a lock-free ring buffer.

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use lc3_bus::asm::assemble;
use lc3_bus::asm::encoding::{ImageFormat, ObjFileFormat, TextFormat};
use lc3_bus::config::Config;
use lc3_bus::err::report;
use lc3_bus::harness::{ring_benchmark, Harness};
use lc3_bus::parse::parse_ast;
use lc3_bus::sim::device::ChannelDisplay;

const USAGE: &str = "\
usage:
    lc3-bus run [PRODUCER CONSUMER] [--budget N] [--wait POLICY] [--config FILE] [--lenient]
    lc3-bus asm INPUT [-o OUTPUT] [--text]
    lc3-bus bench [COUNT]
    lc3-bus sample-config

POLICY is one of: spin, yield, backoff, bounded:LIMIT";

/// A program image could not be read, or a source file could not be assembled.
const EXIT_LOAD_FAILED: u8 = 1;
const EXIT_USAGE: u8 = 2;
/// A VM raised an error (or its thread panicked) while running.
const EXIT_VM_FAILED: u8 = 3;

enum Command {
    Run {
        images: Option<(PathBuf, PathBuf)>,
        budget: Option<u64>,
        wait: Option<String>,
        config: Option<PathBuf>,
        lenient: bool,
    },
    Asm {
        input: PathBuf,
        output: Option<PathBuf>,
        text: bool,
    },
    Bench {
        count: u32,
    },
    SampleConfig,
}

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    dispatch().map(ExitCode::from)
}

fn dispatch() -> anyhow::Result<u8> {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!("{USAGE}");
            return Ok(EXIT_USAGE);
        }
    };

    match command {
        Command::Run { images, budget, wait, config, lenient } => {
            let mut config = match config {
                Some(path) => Config::load_with_file(&path)?,
                None => Config::load(),
            };
            if let Some((producer, consumer)) = images {
                config.producer = Some(producer);
                config.consumer = Some(consumer);
            }
            if let Some(budget) = budget {
                config.budget = Some(budget);
            }
            if let Some(wait) = wait {
                match wait.parse() {
                    Ok(policy) => config.wait = Some(policy),
                    Err(e) => {
                        eprintln!("error: {e}");
                        return Ok(EXIT_USAGE);
                    }
                }
            }
            if lenient {
                config.lenient_decode = Some(true);
            }
            run(config)
        },
        Command::Asm { input, output, text } => asm(&input, output, text),
        Command::Bench { count } => {
            println!("{}", ring_benchmark(count));
            Ok(0)
        },
        Command::SampleConfig => {
            print!("{}", Config::sample_config());
            Ok(0)
        },
    }
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let (sub, rest) = args.split_first().ok_or("missing command")?;

    let mut positional = vec![];
    let mut flags = rest.iter();

    match sub.as_str() {
        "run" => {
            let (mut budget, mut wait, mut config, mut lenient) = (None, None, None, false);
            while let Some(arg) = flags.next() {
                match arg.as_str() {
                    "--budget" => {
                        let n = next_value(arg, &mut flags)?;
                        budget = Some(n.parse().map_err(|_| format!("invalid budget {n:?}"))?);
                    },
                    "--wait" => wait = Some(next_value(arg, &mut flags)?),
                    "--config" => config = Some(PathBuf::from(next_value(arg, &mut flags)?)),
                    "--lenient" => lenient = true,
                    a if a.starts_with('-') => return Err(format!("unknown option {a}")),
                    a => positional.push(PathBuf::from(a)),
                }
            }

            let images = match <[PathBuf; 2]>::try_from(positional) {
                Ok([producer, consumer]) => Some((producer, consumer)),
                Err(p) if p.is_empty() => None,
                Err(_) => return Err("expected both a producer and a consumer image".to_string()),
            };
            Ok(Command::Run { images, budget, wait, config, lenient })
        },
        "asm" => {
            let (mut output, mut text) = (None, false);
            while let Some(arg) = flags.next() {
                match arg.as_str() {
                    "-o" | "--output" => output = Some(PathBuf::from(next_value(arg, &mut flags)?)),
                    "--text" => text = true,
                    a if a.starts_with('-') => return Err(format!("unknown option {a}")),
                    a => positional.push(PathBuf::from(a)),
                }
            }

            match <[PathBuf; 1]>::try_from(positional) {
                Ok([input]) => Ok(Command::Asm { input, output, text }),
                Err(_) => Err("expected exactly one input file".to_string()),
            }
        },
        "bench" => match rest {
            [] => Ok(Command::Bench { count: 10_000_000 }),
            [n] => n.parse()
                .map(|count| Command::Bench { count })
                .map_err(|_| format!("invalid count {n:?}")),
            _ => Err("too many arguments".to_string()),
        },
        "sample-config" if rest.is_empty() => Ok(Command::SampleConfig),
        "-h" | "--help" | "help" => {
            println!("{USAGE}");
            std::process::exit(0);
        },
        s => Err(format!("unknown command {s:?}")),
    }
}

fn next_value(flag: &str, flags: &mut std::slice::Iter<String>) -> Result<String, String> {
    flags.next().cloned().ok_or_else(|| format!("{flag} requires a value"))
}

fn run(config: Config) -> anyhow::Result<u8> {
    let mut pair = match Harness::new(config).load() {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("{e}");
            if let Some(cause) = std::error::Error::source(&e) {
                eprintln!("  caused by: {cause}");
            }
            return Ok(EXIT_LOAD_FAILED);
        }
    };

    let (display, writer) = ChannelDisplay::stdout();
    pair.set_display(display);
    let result = pair.run();
    // Both VMs (and their displays) are dropped by now, so the writer drains and exits.
    let _ = writer.join();

    match result {
        Ok(reports) => {
            println!();
            println!("{reports}");
            Ok(0)
        },
        Err(e) => {
            eprintln!("{}", report(&e, ""));
            Ok(EXIT_VM_FAILED)
        }
    }
}

fn asm(input: &Path, output: Option<PathBuf>, text: bool) -> anyhow::Result<u8> {
    let src = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;

    let obj = match parse_ast(&src) {
        Ok(ast) => assemble(ast).map_err(|e| report(&e, &src)),
        Err(e) => Err(report(&e, &src)),
    };
    let obj = match obj {
        Ok(obj) => obj,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(EXIT_LOAD_FAILED);
        }
    };

    let output = output.unwrap_or_else(|| input.with_extension(if text { "hex" } else { "obj" }));
    let bytes = match text {
        true  => TextFormat::serialize(&obj).into_bytes(),
        false => ImageFormat::serialize(&obj),
    };
    std::fs::write(&output, bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;

    log::info!("assembled {} words at x{:04X} into {}", obj.words().len(), obj.origin(), output.display());
    Ok(0)
}
