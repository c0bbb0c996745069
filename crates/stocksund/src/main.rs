#![forbid(unsafe_code)]

//! Stocksund CLI: canonicalize XML documents and digest their canonical form.

use std::io::Write;
use std::path::PathBuf;
use std::process;

use base64::Engine;
use clap::{Args, Parser, Subcommand};
use stocksund_c14n::{C14nMode, Canonicalizer};
use stocksund_core::{algorithm, Error};
use stocksund_crypto::DigestWriter;
use stocksund_xml::Document;

#[derive(Parser)]
#[command(
    name = "stocksund",
    about = "Stocksund — Pure Rust XML canonicalization (C14N, Exclusive C14N)",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the canonical form of an XML document
    C14n {
        /// Input XML file
        file: PathBuf,

        #[command(flatten)]
        c14n: C14nArgs,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the base64 digest of the canonical form of an XML document
    Digest {
        /// Input XML file
        file: PathBuf,

        /// Digest algorithm URI
        #[arg(long, default_value = algorithm::SHA256)]
        digest: String,

        #[command(flatten)]
        c14n: C14nArgs,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List supported algorithms
    Info,
}

#[derive(Args)]
struct C14nArgs {
    /// Canonicalization algorithm URI
    #[arg(long, conflicts_with_all = ["exclusive", "with_comments"])]
    algorithm: Option<String>,

    /// Use Exclusive XML Canonicalization
    #[arg(long)]
    exclusive: bool,

    /// Keep comments
    #[arg(long = "with-comments")]
    with_comments: bool,

    /// InclusiveNamespaces PrefixList (exclusive mode only)
    #[arg(long = "inclusive-prefixes")]
    inclusive_prefixes: Option<String>,

    /// Canonicalize only the element with this ID and its subtree
    #[arg(long = "node-id")]
    node_id: Option<String>,

    /// Register additional ID attribute names
    #[arg(long = "id-attr")]
    id_attr: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Commands::C14n { verbose, .. } | Commands::Digest { verbose, .. } => *verbose,
        Commands::Info => false,
    };
    init_logging(verbose);

    let result = match cli.command {
        Commands::C14n {
            file,
            c14n,
            output,
            verbose: _,
        } => cmd_c14n(file, c14n, output),

        Commands::Digest {
            file,
            digest,
            c14n,
            verbose: _,
        } => cmd_digest(file, &digest, c14n),

        Commands::Info => cmd_info(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_c14n(file: PathBuf, args: C14nArgs, output: Option<PathBuf>) -> Result<(), Error> {
    let xml = read_file(&file)?;
    tracing::debug!(file = %file.display(), "canonicalizing");
    let out = canonicalize(&xml, &args, Vec::new())?;
    write_output(output, &out)
}

fn cmd_digest(file: PathBuf, digest_uri: &str, args: C14nArgs) -> Result<(), Error> {
    let xml = read_file(&file)?;
    let sink = DigestWriter::new(digest_uri)?;
    let writer = canonicalize(&xml, &args, sink)?;
    tracing::debug!(bytes = writer.bytes_written(), digest = writer.uri(), "digested");
    let value = base64::engine::general_purpose::STANDARD.encode(writer.finish());
    println!("{value}");
    Ok(())
}

fn cmd_info() -> Result<(), Error> {
    println!("Stocksund — Pure Rust XML Canonicalization");
    println!();
    println!("Supported canonicalization:");
    for mode in [
        C14nMode::Inclusive,
        C14nMode::InclusiveWithComments,
        C14nMode::Exclusive,
        C14nMode::ExclusiveWithComments,
    ] {
        println!("  {}", mode.uri());
    }
    println!();
    println!("Supported digest algorithms:");
    for uri in [
        algorithm::SHA1,
        algorithm::SHA224,
        algorithm::SHA256,
        algorithm::SHA384,
        algorithm::SHA512,
    ] {
        println!("  {uri}");
    }
    Ok(())
}

// ── Utility functions ────────────────────────────────────────────────

fn canonicalize<W: Write>(xml: &str, args: &C14nArgs, sink: W) -> Result<W, Error> {
    let mut doc = Document::parse(xml)?;
    for attr in &args.id_attr {
        doc.add_id_attr(attr);
    }

    let mut c14n = match &args.algorithm {
        Some(uri) => Canonicalizer::with_algorithm(sink, uri)?,
        None => Canonicalizer::with_mode(
            sink,
            C14nMode::from_flags(args.exclusive, args.with_comments),
        ),
    };
    c14n.set_inclusive_namespace_prefix_list(args.inclusive_prefixes.as_deref());

    match &args.node_id {
        Some(id) => {
            let node = doc
                .find_by_id(id)
                .ok_or_else(|| Error::Other(format!("no element with ID {id:?}")))?;
            c14n.write_node(&doc, node)?;
        }
        None => c14n.write_document(&doc)?,
    }
    Ok(c14n.into_inner())
}

fn read_file(path: &PathBuf) -> Result<String, Error> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::Other(format!("{}: {e}", path.display())))
}

fn write_output(path: Option<PathBuf>, data: &[u8]) -> Result<(), Error> {
    match path {
        Some(p) => {
            std::fs::write(&p, data)
                .map_err(|e| Error::Other(format!("{}: {e}", p.display())))
        }
        None => std::io::stdout()
            .write_all(data)
            .map_err(|e| Error::Other(format!("stdout: {e}"))),
    }
}
