//! j2k CLI - encode, decode and inspect JPEG 2000 files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use log::{LevelFilter, debug};

use j2k_codec::codec::{
    self, Alpha, Buffer, Codec as _, CompressionMethod, DciProfile, FileInfo, Format, NativeCodec,
    NativeOptions, Order, Progress, SampleType, registry, subsampled_size,
};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// JPEG 2000 (J2C / JP2 / JPX) encoder, decoder and inspector
#[derive(Parser)]
#[command(name = "j2k")]
#[command(version)]
#[command(about = "Encode, decode and inspect JPEG 2000 images", long_about = None)]
#[command(after_help = "EXAMPLES:
    j2k info -i image.jp2
    j2k decode -i image.jp2 -o image.ppm --subsample 2
    j2k encode -i image.ppm -o image.jp2 --method quality --quality 80
    j2k encode -i pixels.raw -o image.j2c -w 512 -H 512 -n 1 -d 12 --container j2c
    j2k list")]
struct Cli {
    /// Log more (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Worker threads; 0 uses every processor
    #[arg(long, default_value = "0", global = true)]
    threads: usize,

    /// Print progress to stderr
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a J2C/JP2/JPX file to PNM, PAM or raw samples
    #[command(visible_alias = "d")]
    Decode {
        #[arg(short, long, help = "Path to the JPEG 2000 file")]
        input: PathBuf,

        #[arg(short, long, help = "Path for the decoded image")]
        output: PathBuf,

        #[arg(short, long, default_value = "pnm", value_enum)]
        format: OutputFormat,

        /// Reduce each dimension by this power of two
        #[arg(short, long, default_value = "1")]
        subsample: u32,

        /// Expand palettised images through their lookup table
        #[arg(long)]
        lut: bool,
    },

    /// Encode a PNM/PAM image or raw samples
    ///
    /// Raw input is interleaved, one byte per sample up to 8 bits and two
    /// native-endian bytes above that.
    #[command(visible_alias = "e")]
    Encode {
        #[arg(short, long, help = "Path to a PNM/PAM image or raw samples")]
        input: PathBuf,

        #[arg(short, long, help = "Path for the encoded file")]
        output: PathBuf,

        /// Width of raw input
        #[arg(short, long)]
        width: Option<u32>,

        /// Height of raw input
        #[arg(short = 'H', long)]
        height: Option<u32>,

        /// Channels of raw input
        #[arg(short = 'n', long)]
        channels: Option<u8>,

        /// Bits per sample of raw input
        #[arg(short, long)]
        depth: Option<u8>,

        #[arg(short, long, default_value = "lossless", value_enum)]
        method: Method,

        /// 0..=100 for the quality method
        #[arg(short, long, default_value = "50")]
        quality: u8,

        /// Budget in KiB for the size method
        #[arg(long, default_value = "50")]
        size: usize,

        /// Quality layers, 1..=50
        #[arg(long, default_value = "12")]
        layers: u8,

        #[arg(long, default_value = "rpcl", value_enum)]
        order: ProgressionOrder,

        /// Tile edge in pixels; 0 codes a single tile
        #[arg(long, default_value = "1024")]
        tile: u16,

        /// Apply the colour transform to RGB input
        #[arg(long)]
        ycc: bool,

        /// Use the reversible wavelet for lossy methods
        #[arg(long)]
        reversible: bool,

        #[arg(long, default_value = "2k", value_enum)]
        dci: Dci,

        #[arg(long, default_value = "jp2", value_enum)]
        container: Container,

        /// Treat the last channel of 2- or 4-channel input as straight alpha
        #[arg(long)]
        alpha: bool,

        /// Text stored in a COM marker
        #[arg(long)]
        comment: Option<String>,
    },

    /// Show metadata and coding parameters
    #[command(visible_alias = "i")]
    Info {
        #[arg(short, long, help = "Path to the JPEG 2000 file")]
        input: PathBuf,
    },

    /// List registered codecs and their capabilities
    #[command(visible_alias = "l")]
    List,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// PGM (1 channel) or PPM (3 channels)
    Pnm,
    /// PAM with a tuple type, any channel count
    Pam,
    /// Interleaved samples in native byte order
    Raw,
}

#[derive(Clone, Copy, ValueEnum)]
enum Method {
    Lossless,
    Size,
    Quality,
    Cinema,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressionOrder {
    Lrcp,
    Rlcp,
    Rpcl,
    Pcrl,
    Cprl,
}

#[derive(Clone, Copy, ValueEnum)]
enum Dci {
    #[value(name = "2k")]
    Dci2k,
    #[value(name = "4k")]
    Dci4k,
}

#[derive(Clone, Copy, ValueEnum)]
enum Container {
    J2c,
    Jp2,
    Jpx,
}

impl From<Method> for CompressionMethod {
    fn from(m: Method) -> Self {
        match m {
            Method::Lossless => Self::Lossless,
            Method::Size => Self::Size,
            Method::Quality => Self::Quality,
            Method::Cinema => Self::Cinema,
        }
    }
}

impl From<ProgressionOrder> for Order {
    fn from(o: ProgressionOrder) -> Self {
        match o {
            ProgressionOrder::Lrcp => Self::Lrcp,
            ProgressionOrder::Rlcp => Self::Rlcp,
            ProgressionOrder::Rpcl => Self::Rpcl,
            ProgressionOrder::Pcrl => Self::Pcrl,
            ProgressionOrder::Cprl => Self::Cprl,
        }
    }
}

impl From<Dci> for DciProfile {
    fn from(d: Dci) -> Self {
        match d {
            Dci::Dci2k => Self::Dci2k,
            Dci::Dci4k => Self::Dci4k,
        }
    }
}

impl From<Container> for Format {
    fn from(c: Container) -> Self {
        match c {
            Container::J2c => Self::J2c,
            Container::Jp2 => Self::Jp2,
            Container::Jpx => Self::Jpx,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
    registry::register_builtin_codecs();

    let result = match cli.command {
        Commands::Decode {
            input,
            output,
            format,
            subsample,
            lut,
        } => {
            let codec = NativeCodec::new(NativeOptions {
                apply_lut: lut,
                threads: cli.threads,
                comment: None,
            });
            decode_image(&codec, &input, &output, &format, subsample, cli.progress)
        }
        Commands::Encode {
            input,
            output,
            width,
            height,
            channels,
            depth,
            method,
            quality,
            size,
            layers,
            order,
            tile,
            ycc,
            reversible,
            dci,
            container,
            alpha,
            comment,
        } => {
            let codec = NativeCodec::new(NativeOptions {
                apply_lut: false,
                threads: cli.threads,
                comment,
            });
            let mut info = FileInfo::default();
            info.format = container.into();
            let settings = &mut info.settings;
            settings.method = method.into();
            settings.quality = quality.min(100);
            settings.file_size = size;
            settings.layers = layers;
            settings.order = order.into();
            settings.tile_size = tile;
            settings.ycc = ycc;
            settings.reversible = reversible;
            settings.dci_profile = dci.into();
            let raw = RawGeometry {
                width,
                height,
                channels,
                depth,
            };
            encode_image(&codec, &input, &output, info, raw, alpha, cli.progress)
        }
        Commands::Info { input } => show_info(&input),
        Commands::List => list_codecs(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn progress_reporter<'a>(enabled: bool) -> Option<Progress<'a>> {
    enabled.then(|| {
        Progress::new().with_progress(|done, total| {
            if done == total || done % 64 == 0 {
                eprint!("\r{:3}%", done * 100 / total.max(1));
                if done == total {
                    eprintln!();
                }
            }
            true
        })
    })
}

fn decode_image(
    codec: &NativeCodec,
    input: &Path,
    output: &Path,
    format: &OutputFormat,
    subsample: u32,
    show_progress: bool,
) -> CliResult<()> {
    let mut file = fs::File::open(input)?;
    let info = codec.file_info(&mut file)?;
    let lut = codec.options().apply_lut && !info.lut.is_empty();
    let channels = if lut { info.lut_channels } else { info.channels.min(4) };
    let depth = if lut { 8 } else { info.depth };
    let sample_type = if depth <= 8 { SampleType::UChar } else { SampleType::UShort };
    let width = subsampled_size(info.width, subsample);
    let height = subsampled_size(info.height, subsample);

    let sample_size = codec::size_of_sample(sample_type);
    let mut pixels = vec![0u8; width as usize * height as usize * channels as usize * sample_size];
    let mut buffer = Buffer::interleaved(&mut pixels[..], width, height, channels, sample_type)?;
    for ch in buffer.channels_mut() {
        ch.depth = depth;
    }
    let progress = progress_reporter(show_progress);
    if !codec.read_file(&mut file, &mut buffer, subsample, progress.as_ref())?.is_complete() {
        return Err("decode cancelled".into());
    }
    drop(buffer);

    let mut out = fs::File::create(output)?;
    let maxval = (1u32 << depth) - 1;
    match format {
        OutputFormat::Pnm => {
            let magic = match channels {
                1 => "P5",
                3 => "P6",
                n => return Err(format!("{n} channels do not fit PGM/PPM; use --format pam").into()),
            };
            write!(out, "{magic}\n{width} {height}\n{maxval}\n")?;
            out.write_all(&to_big_endian(&pixels, sample_size))?;
        }
        OutputFormat::Pam => {
            let tuple = match (channels, info.alpha != Alpha::None) {
                (1, _) => "GRAYSCALE",
                (2, true) => "GRAYSCALE_ALPHA",
                (3, _) => "RGB",
                (4, true) => "RGB_ALPHA",
                _ => "UNKNOWN",
            };
            write!(
                out,
                "P7\nWIDTH {width}\nHEIGHT {height}\nDEPTH {channels}\nMAXVAL {maxval}\nTUPLTYPE {tuple}\nENDHDR\n"
            )?;
            out.write_all(&to_big_endian(&pixels, sample_size))?;
        }
        OutputFormat::Raw => out.write_all(&pixels)?,
    }
    println!(
        "✓ Decoded {}x{} image ({} channels, {} bits) to {:?}",
        width, height, channels, depth, output
    );
    Ok(())
}

struct RawGeometry {
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u8>,
    depth: Option<u8>,
}

/// Samples of an input image, two native-endian bytes each above 8 bits.
struct Image {
    width: u32,
    height: u32,
    channels: u8,
    depth: u8,
    samples: Vec<u8>,
}

fn encode_image(
    codec: &NativeCodec,
    input: &Path,
    output: &Path,
    mut info: FileInfo,
    raw: RawGeometry,
    alpha: bool,
    show_progress: bool,
) -> CliResult<()> {
    let data = fs::read(input)?;
    let image = if data.starts_with(b"P5") || data.starts_with(b"P6") || data.starts_with(b"P7") {
        read_pnm(&data)?
    } else {
        let (Some(width), Some(height), Some(channels), Some(depth)) =
            (raw.width, raw.height, raw.channels, raw.depth)
        else {
            return Err("raw input needs --width, --height, --channels and --depth".into());
        };
        Image {
            width,
            height,
            channels,
            depth,
            samples: data,
        }
    };
    debug!(
        "input {}x{}x{} at {} bits",
        image.width, image.height, image.channels, image.depth
    );

    info.width = image.width;
    info.height = image.height;
    info.channels = image.channels;
    info.depth = image.depth;
    if alpha && (image.channels == 2 || image.channels == 4) {
        info.alpha = Alpha::Straight;
    }

    let sample_type = if image.depth <= 8 { SampleType::UChar } else { SampleType::UShort };
    let mut buffer = Buffer::interleaved(
        &image.samples[..],
        image.width,
        image.height,
        image.channels,
        sample_type,
    )?;
    for ch in buffer.channels_mut() {
        ch.depth = image.depth;
    }

    let progress = progress_reporter(show_progress);
    let mut encoded = Vec::new();
    if !codec.write_file(&mut encoded, &info, &buffer, progress.as_ref())?.is_complete() {
        return Err("encode cancelled".into());
    }
    fs::write(output, &encoded)?;
    println!(
        "✓ Encoded {}x{} image to {:?} ({} bytes)",
        image.width,
        image.height,
        output,
        encoded.len()
    );
    Ok(())
}

/// Swaps native 16-bit samples to the big-endian order of PNM.
fn to_big_endian(pixels: &[u8], sample_size: usize) -> Vec<u8> {
    if sample_size == 1 {
        return pixels.to_vec();
    }
    pixels
        .chunks_exact(2)
        .flat_map(|s| u16::from_ne_bytes([s[0], s[1]]).to_be_bytes())
        .collect()
}

/// Reads a P5, P6 or P7 image.
fn read_pnm(data: &[u8]) -> CliResult<Image> {
    let mut pos = 2;
    let next_token = |pos: &mut usize| -> CliResult<String> {
        loop {
            while *pos < data.len() && data[*pos].is_ascii_whitespace() {
                *pos += 1;
            }
            if *pos < data.len() && data[*pos] == b'#' {
                while *pos < data.len() && data[*pos] != b'\n' {
                    *pos += 1;
                }
                continue;
            }
            break;
        }
        let start = *pos;
        while *pos < data.len() && !data[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if start == *pos {
            return Err("truncated PNM header".into());
        }
        Ok(String::from_utf8_lossy(&data[start..*pos]).into_owned())
    };

    let (width, height, channels, maxval) = if data.starts_with(b"P7") {
        let (mut w, mut h, mut d, mut m) = (0u32, 0u32, 0u8, 0u32);
        loop {
            let key = next_token(&mut pos)?;
            match key.as_str() {
                "WIDTH" => w = next_token(&mut pos)?.parse()?,
                "HEIGHT" => h = next_token(&mut pos)?.parse()?,
                "DEPTH" => d = next_token(&mut pos)?.parse()?,
                "MAXVAL" => m = next_token(&mut pos)?.parse()?,
                "TUPLTYPE" => {
                    next_token(&mut pos)?;
                }
                "ENDHDR" => break,
                other => return Err(format!("unknown PAM header field {other}").into()),
            }
        }
        (w, h, d, m)
    } else {
        let channels = if data.starts_with(b"P5") { 1 } else { 3 };
        let w = next_token(&mut pos)?.parse::<u32>()?;
        let h = next_token(&mut pos)?.parse::<u32>()?;
        let m = next_token(&mut pos)?.parse::<u32>()?;
        (w, h, channels, m)
    };
    // Exactly one whitespace byte separates the header from the samples.
    pos += 1;

    if maxval == 0 || maxval > 65535 {
        return Err(format!("unsupported maxval {maxval}").into());
    }
    if !(1..=4).contains(&channels) {
        return Err(format!("unsupported PAM depth {channels}").into());
    }
    let depth = (32 - maxval.leading_zeros()) as u8;
    let sample_size = if maxval < 256 { 1 } else { 2 };
    let count = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(channels as usize))
        .and_then(|n| n.checked_mul(sample_size))
        .ok_or("PNM dimensions too large")?;
    let body = data.get(pos..).unwrap_or_default();
    let samples = if sample_size == 1 {
        body.get(..count).ok_or("truncated PNM samples")?.to_vec()
    } else {
        body.get(..count)
            .ok_or("truncated PNM samples")?
            .chunks_exact(2)
            .flat_map(|s| u16::from_be_bytes([s[0], s[1]]).to_ne_bytes())
            .collect()
    };
    Ok(Image {
        width,
        height,
        channels,
        depth,
        samples,
    })
}

fn show_info(input: &Path) -> CliResult<()> {
    let codec = NativeCodec::default();
    let mut file = fs::File::open(input)?;
    let info = codec.file_info(&mut file)?;
    let comments = codec.comments(&mut file)?;
    let settings = &info.settings;

    println!("File: {:?}", input);
    println!("Size: {} bytes", fs::metadata(input)?.len());
    println!();
    println!("Format:       {:?}", info.format);
    println!("  Dimensions: {}x{}", info.width, info.height);
    println!("  Channels:   {}", info.channels);
    println!("  Bit depth:  {} bits", info.depth);
    for c in 0..(info.channels as usize).min(codec::MAX_CHANNELS) {
        let s = info.subsampling[c];
        println!("  Channel {c}:  {:?}, subsampling {}x{}", info.channel_map[c], s.x, s.y);
    }
    println!("  Colour:     {:?}", info.color_space);
    if info.profile_len() > 0 {
        println!("  ICC:        {} bytes", info.profile_len());
    }
    println!("  Alpha:      {:?}", info.alpha);
    if info.dpi > 0.0 {
        println!("  DPI:        {:.2}", info.dpi);
    }
    if !info.pixel_aspect.is_unknown() {
        println!("  Aspect:     {}/{}", info.pixel_aspect.num, info.pixel_aspect.den);
    }
    if info.lut_size() > 0 {
        println!("  LUT:        {} entries x {} columns", info.lut_size(), info.lut_channels);
    }
    println!();
    println!("Coding:");
    println!("  Wavelet:    {}", if settings.reversible { "5/3 reversible" } else { "9/7 irreversible" });
    println!("  Layers:     {}", settings.layers);
    println!("  Order:      {:?}", settings.order);
    println!("  Colour xfm: {}", settings.ycc);
    if settings.tile_size > 0 {
        println!("  Tiles:      {0}x{0}", settings.tile_size);
    }
    for text in comments {
        println!("  Comment:    {text}");
    }
    Ok(())
}

fn list_codecs() -> CliResult<()> {
    let default = registry::default_codec();
    println!("Registered codecs:");
    println!();
    for codec in registry::codec_list() {
        let is_default = default
            .as_ref()
            .is_some_and(|d| d.four_char_code() == codec.four_char_code());
        println!(
            "  {} ({}){}",
            codec.name(),
            codec.four_char_code(),
            if is_default { "  [default]" } else { "" }
        );
        println!("    Read:  {:?}", codec.read_flags());
        println!("    Write: {:?}", codec.write_flags());
        println!();
    }
    Ok(())
}
