#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use quire::compress::{self, CompressOptions};
use quire::docx::{self, DocxLayout};
use quire::images::{self, ImageLayout};
use quire::layout::{Orientation, PageSize};
use quire::merge;
use quire::number::{self, NumberingOptions, Position};
use quire::parse::{self, IMAGE_EXTENSIONS, PDF_EXTENSIONS};
use quire::pdf::{self, Metadata};
use quire::rotate::{self, Rotation};
use quire::split::{self, SplitMode};

#[derive(Parser)]
#[command(name = "quire", version, about = "Merge, split, stamp and build PDFs")]
struct Cli {
    /// num parallel threads (default number of CPUs)
    #[arg(short = 'j', long, global = true)]
    threads: Option<usize>,

    /// only print warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// more logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// combine PDFs into one, in the order given
    Merge {
        /// input PDF files, dirs or glob patterns
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// output PDF path, "-" for stdout
        #[arg(short, long, default_value = "merged.pdf")]
        output: PathBuf,
    },
    /// copy selected pages into a new PDF
    Extract {
        /// input PDF file, "-" for stdin
        input: PathBuf,

        /// page selection (e.g. "1", "1,3-5,10")
        #[arg(short, long)]
        pages: String,

        /// output PDF path, "-" for stdout
        #[arg(short, long, default_value = "extracted.pdf")]
        output: PathBuf,
    },
    /// split a PDF into several files (one per page by default)
    Split {
        /// input PDF file
        input: PathBuf,

        /// output dir (default next to input file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// one file per comma-separated range (e.g. "1-3,4-6")
        #[arg(long, conflicts_with = "every")]
        ranges: Option<String>,

        /// one file per N pages
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        every: Option<u32>,
    },
    /// rotate pages clockwise
    Rotate {
        /// input PDF file, "-" for stdin
        input: PathBuf,

        /// angle in degrees
        #[arg(short, long, allow_hyphen_values = true)]
        angle: Rotation,

        /// page selection (default all pages)
        #[arg(short, long)]
        pages: Option<String>,

        /// output PDF path, "-" for stdout
        #[arg(short, long, default_value = "rotated.pdf")]
        output: PathBuf,
    },
    /// stamp page numbers
    Number {
        /// input PDF file, "-" for stdin
        input: PathBuf,

        /// where the number goes
        #[arg(long, default_value = "bottom-center")]
        position: Position,

        /// label text; {n} number, {total} last number, {page} physical page
        #[arg(long, default_value = "{n}")]
        format: String,

        /// number shown on the first selected page
        #[arg(long, default_value_t = 1)]
        start: u32,

        /// font size in points
        #[arg(long, default_value_t = 12.0)]
        size: f32,

        /// distance from the page edge in points
        #[arg(long, default_value_t = 30.0)]
        margin: f32,

        /// page selection (default all pages)
        #[arg(short, long)]
        pages: Option<String>,

        /// output PDF path, "-" for stdout
        #[arg(short, long, default_value = "numbered.pdf")]
        output: PathBuf,
    },
    /// shrink a PDF
    Compress {
        /// input PDF file, "-" for stdin
        input: PathBuf,

        /// JPEG quality for re-encoded images (1-100)
        #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: u8,

        /// leave images untouched
        #[arg(long)]
        no_images: bool,

        /// output PDF path, "-" for stdout
        #[arg(short, long, default_value = "compressed.pdf")]
        output: PathBuf,
    },
    /// combine images into a single PDF
    Images {
        /// input image files, dirs or glob patterns (png, jpg, tiff, bmp, gif)
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// output PDF path, "-" for stdout
        #[arg(short, long, default_value = "output.pdf")]
        output: PathBuf,

        /// page size (scales each image to fit; default page = image size)
        #[arg(long)]
        pagesize: Option<PageSize>,

        /// page orientation with --pagesize
        #[arg(long, default_value = "auto")]
        orientation: Orientation,

        /// blank border in points (default 20 with --pagesize, else 0)
        #[arg(long)]
        margin: Option<f32>,

        /// DPI of input images, used for page sizing (72-2400; default from file, else 300)
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(72..=2400))]
        dpi: Option<u32>,

        /// PDF title metadata
        #[arg(long)]
        title: Option<String>,

        /// PDF author metadata
        #[arg(long)]
        author: Option<String>,
    },
    /// convert DOCX text to PDF
    Docx {
        /// input DOCX file, "-" for stdin
        input: PathBuf,

        /// output PDF path, "-" for stdout
        #[arg(short, long, default_value = "output.pdf")]
        output: PathBuf,

        #[arg(long, default_value = "a4")]
        pagesize: PageSize,

        #[arg(long, default_value = "portrait")]
        orientation: Orientation,

        /// page margin in points
        #[arg(long, default_value_t = 72.0)]
        margin: f32,

        /// body text size in points
        #[arg(long, default_value_t = 11.0)]
        font_size: f32,

        /// PDF title metadata (default from the document properties)
        #[arg(long)]
        title: Option<String>,

        /// PDF author metadata
        #[arg(long)]
        author: Option<String>,
    },
    /// show page count, version, page size and title
    Info {
        /// input PDF file, "-" for stdin
        input: PathBuf,
    },
    /// generate shell completions
    Completions {
        /// shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn init_logging(quiet: bool, verbose: u8) {
    let default = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

fn print_info(input: &Path) -> Result<()> {
    let bytes = pdf::read_input(input)?;
    let summary = pdf::summarize(&bytes)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    println!("File:     {}", input.display());
    println!("Pages:    {}", summary.pages);
    println!("Version:  {}", summary.version);
    if let Some((w, h)) = summary.first_page {
        println!("Size:     {:.0} x {:.0} pt", w, h);
    }
    if let Some(title) = summary.title {
        println!("Title:    {}", title);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    match cli.command {
        Commands::Merge { inputs, output } => {
            let inputs = parse::expand_input_paths(&inputs, PDF_EXTENSIONS)?;
            anyhow::ensure!(!inputs.is_empty(), "No input PDFs provided");
            merge::merge_files(&inputs, &output)?;
        }
        Commands::Extract {
            input,
            pages,
            output,
        } => {
            split::extract_file(&input, &pages, &output)?;
        }
        Commands::Split {
            input,
            output,
            ranges,
            every,
        } => {
            let output_dir = output.unwrap_or_else(|| {
                input
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."))
                    .to_path_buf()
            });
            let mode = match (ranges, every) {
                (Some(expr), _) => SplitMode::Ranges(expr),
                (None, Some(n)) => SplitMode::Every(n as usize),
                (None, None) => SplitMode::Pages,
            };
            split::split_file(&input, &mode, &output_dir)?;
        }
        Commands::Rotate {
            input,
            angle,
            pages,
            output,
        } => {
            rotate::rotate_file(&input, angle, pages.as_deref(), &output)?;
        }
        Commands::Number {
            input,
            position,
            format,
            start,
            size,
            margin,
            pages,
            output,
        } => {
            let options = NumberingOptions {
                position,
                format,
                start,
                font_size: size,
                margin,
                pages,
            };
            number::number_file(&input, &options, &output)?;
        }
        Commands::Compress {
            input,
            quality,
            no_images,
            output,
        } => {
            let options = CompressOptions {
                jpeg_quality: (!no_images).then_some(quality),
            };
            compress::compress_file(&input, &options, &output)?;
        }
        Commands::Images {
            images,
            output,
            pagesize,
            orientation,
            margin,
            dpi,
            title,
            author,
        } => {
            let images = parse::expand_input_paths(&images, IMAGE_EXTENSIONS)?;
            anyhow::ensure!(!images.is_empty(), "No input images provided");
            let default_margin = if pagesize.is_some() { 20.0 } else { 0.0 };
            let layout = ImageLayout {
                page_size: pagesize,
                orientation,
                margin: margin.unwrap_or(default_margin),
                dpi,
            };
            images::images_file(&images, &layout, &Metadata { title, author }, &output)?;
        }
        Commands::Docx {
            input,
            output,
            pagesize,
            orientation,
            margin,
            font_size,
            title,
            author,
        } => {
            let layout = DocxLayout {
                page_size: pagesize,
                orientation,
                margin,
                font_size,
            };
            docx::docx_file(&input, &layout, &Metadata { title, author }, &output)?;
        }
        Commands::Info { input } => print_info(&input)?,
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "quire",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}
