use clap::Parser;
use formatstring::pattern::make_pattern;

/// Generate a pattern to get the offset of your buffer
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// The size of your buffer
    #[arg(value_name = "BUF_SIZE")]
    buffer_size: usize,

    /// The starting offset
    #[arg(short = 's', long = "start-offset", value_name = "OFFSET", default_value_t = 1)]
    start_offset: usize,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default()).init();

    let args = Args::parse();
    println!("{}", make_pattern(args.buffer_size, args.start_offset));
}
