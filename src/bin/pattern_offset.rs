use clap::Parser;
use formatstring::architectures::{arch_by_name, local_arch};
use formatstring::pattern::compute_offset;
use log::debug;
use std::io::BufRead;
use std::process;

/// Compute the offset of your buffer, given the result of pattern_create
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// The result of pattern_create
    #[arg(value_name = "BUFFER")]
    buffer: Option<String>,

    /// The starting offset
    #[arg(short = 's', long = "start-offset", value_name = "OFFSET", default_value_t = 1)]
    start_offset: usize,

    /// The architecture (x86_32, x86_64, arm, sparc, ...)
    #[arg(short = 'a', long = "arch", value_name = "ARCH")]
    arch: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default()).init();

    let args = Args::parse();

    let arch = match &args.arch {
        Some(name) => match arch_by_name(name) {
            Ok(arch) => arch,
            Err(_) => {
                eprintln!("error: unknown architecture: {name}");
                process::exit(1);
            }
        },
        None => local_arch()?,
    };
    debug!("decoding against {arch}");

    let buffer = match args.buffer {
        Some(buffer) => buffer,
        None => {
            println!("Enter the result of the format string on a pattern given by pattern_create:");
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            line
        }
    };

    match compute_offset(&buffer, args.start_offset, &arch) {
        Some((offset, 0)) => println!("Found buffer at offset {offset}"),
        Some((offset, padding)) => {
            println!("Found buffer at offset {offset} with a padding of {padding} bytes")
        }
        None => println!("Buffer not found, look forward (or check the architecture)."),
    }

    Ok(())
}
