use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use luna_compiler::compiler::compile;
use luna_compiler::disasm::Listing;
use luna_compiler::dump::{self, DumpOptions, Endianness, NumberFormat};
use luna_compiler::error::chunkid;
use luna_compiler::proto::Proto;
use luna_core::string::StringInterner;

/// Compile Lua 5.2 source into a binary chunk.
#[derive(Parser, Debug)]
#[command(name = "lunac", version, about)]
struct Args {
    /// List the bytecode; repeat to include constants, locals and upvalues
    #[arg(short = 'l', action = clap::ArgAction::Count)]
    list: u8,

    /// Parse only, do not write an output file
    #[arg(short = 'p')]
    parse_only: bool,

    /// Strip debug information
    #[arg(short = 's')]
    strip: bool,

    /// Output file
    #[arg(short = 'o', value_name = "FILE", default_value = "luac.out")]
    output: PathBuf,

    /// Write multi-byte values in big-endian order
    #[arg(long)]
    big_endian: bool,

    /// How numbers are stored in the chunk
    #[arg(long, value_enum, default_value_t = NumberArg::Floats)]
    number_format: NumberArg,

    /// Log what the compiler does
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Source file, or `-` for standard input
    input: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum NumberArg {
    /// 8-byte doubles
    Floats,
    /// 4-byte integers only
    Ints,
    /// 32-bit integers tagged, other numbers as doubles
    Int32,
}

impl From<NumberArg> for NumberFormat {
    fn from(arg: NumberArg) -> Self {
        match arg {
            NumberArg::Floats => NumberFormat::FloatsOrDoubles,
            NumberArg::Ints => NumberFormat::IntsOnly,
            NumberArg::Int32 => NumberFormat::NumPatchInt32,
        }
    }
}

impl Args {
    fn dump_options(&self) -> DumpOptions {
        DumpOptions {
            strip: self.strip,
            endianness: if self.big_endian {
                Endianness::Big
            } else {
                Endianness::Little
            },
            number_format: self.number_format.into(),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("lunac: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}

fn run(args: &Args) -> Result<()> {
    let opts = args.dump_options();
    let (source, chunkname) = read_input(&args.input)?;
    let (proto, strings) = load(&source, &chunkname, &opts)?;

    if args.list > 0 {
        let listing = Listing::new(&proto, &strings).full(args.list > 1);
        print!("{listing}");
    }
    if args.parse_only {
        return Ok(());
    }
    write_output(&proto, &strings, &args.output, &opts)
}

/// Read the whole input and derive its chunk name.
fn read_input(input: &str) -> Result<(Vec<u8>, String)> {
    if input == "-" {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf).context("cannot read stdin")?;
        return Ok((buf, "=stdin".to_string()));
    }
    let buf = std::fs::read(input).with_context(|| format!("cannot open {input}"))?;
    Ok((buf, format!("@{input}")))
}

/// Compile source text, or read back an already compiled chunk.
fn load(source: &[u8], chunkname: &str, opts: &DumpOptions) -> Result<(Proto, StringInterner)> {
    if dump::is_binary_chunk(source) {
        let mut strings = StringInterner::new();
        let proto = dump::undump(source, opts, &mut strings)
            .map_err(|e| anyhow!("{}: bad binary format ({e})", chunkid(chunkname)))?;
        log::debug!("loaded precompiled chunk {chunkname}");
        return Ok((proto, strings));
    }
    Ok(compile(source, chunkname)?)
}

fn write_output(proto: &Proto, strings: &StringInterner, path: &Path, opts: &DumpOptions) -> Result<()> {
    let file = File::create(path).with_context(|| format!("cannot open {}", path.display()))?;
    dump::dump(proto, strings, BufWriter::new(file), opts)
        .with_context(|| format!("cannot write {}", path.display()))?;
    log::debug!("wrote {}", path.display());
    Ok(())
}
