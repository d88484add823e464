//! Command-line parsing.

use anyhow::{bail, Context, Result};

/// Recovery start sequence when `-s` is not given.
pub const DEFAULT_START_SEQUENCE: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Recover from the rerequest server instead of listening live.
    pub gap_fill: bool,
    pub start_sequence: u64,
    /// Global message cap. 0 = unbounded.
    pub max_messages: u64,
    /// `-c`; falls back to `max_messages` when absent.
    pub recover_count: Option<u64>,
    /// Type bytes to report. Empty = all.
    pub types: Vec<u8>,
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            gap_fill: false,
            start_sequence: DEFAULT_START_SEQUENCE,
            max_messages: 0,
            recover_count: None,
            types: Vec::new(),
            verbose: false,
        }
    }
}

impl Options {
    /// Messages to recover in gap-fill mode. 0 = until the server runs dry.
    pub fn recovery_total(&self) -> u64 {
        self.recover_count.unwrap_or(self.max_messages)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Run(Options),
    Help,
}

pub fn parse<I, S>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args: Vec<S> = args.into_iter().collect();
    let mut opts = Options::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_ref() {
            "-g" => opts.gap_fill = true,
            "-v" => opts.verbose = true,
            "-h" | "--help" => return Ok(Command::Help),
            "-s" => {
                opts.start_sequence = value(&args, &mut i, "-s")?
                    .parse()
                    .context("-s must be a sequence number")?
            }
            "-n" => {
                opts.max_messages = value(&args, &mut i, "-n")?
                    .parse()
                    .context("-n must be a message count")?
            }
            "-c" => {
                opts.recover_count = Some(
                    value(&args, &mut i, "-c")?
                        .parse()
                        .context("-c must be a message count")?,
                )
            }
            "-t" => {
                let t = value(&args, &mut i, "-t")?;
                match t.as_bytes() {
                    [b] => opts.types.push(*b),
                    _ => bail!("-t takes a single-byte message type, got {t:?}"),
                }
            }
            other => bail!("unknown option: {other}"),
        }
        i += 1;
    }

    Ok(Command::Run(opts))
}

/// The argument after the flag at `*i`.
fn value<'a, S: AsRef<str>>(args: &'a [S], i: &mut usize, flag: &str) -> Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(AsRef::as_ref)
        .with_context(|| format!("{flag} requires a value"))
}

pub fn print_usage() {
    println!("Usage: moldfeedd [-g] [-s <seq>] [-n <count>] [-c <count>] [-t <type>]... [-v]");
    println!();
    println!("Decodes a MoldUDP64 multicast feed, or recovers a range from the rerequest server.");
    println!();
    println!("Options:");
    println!("  -g          gap-fill mode: recover via rerequests instead of listening live");
    println!("  -s <seq>    first sequence to recover (default: {DEFAULT_START_SEQUENCE})");
    println!("  -n <count>  stop after <count> messages (default: 0, unbounded)");
    println!("  -c <count>  messages to recover in gap-fill mode (default: the -n value)");
    println!("  -t <type>   only report this message type; repeatable");
    println!("  -v          print every field and enable debug logging");
    println!("  -h          show this help");
    println!();
    println!("Config is read from $MOLDFEED_CONFIG or config/config.toml.");
}
