//! JP2 and JPX file format boxes (ISO/IEC 15444-1 Annex I, 15444-2 Annex M).
//!
//! Only the boxes that carry image metadata are interpreted: `ftyp`, `ihdr`,
//! `colr`, `pclr`, `cmap`, `cdef`, `res ` and the first `jp2c`. Everything else
//! is skipped.

use log::{debug, trace, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::bit_io::{ByteReader, ByteWriter};
use super::image::J2kComponentInfo;
use crate::codec::{
    Alpha, ChannelName, ColorSpace, FileInfo, Format, LutEntry, MAX_CHANNELS, MAX_LUT_ENTRIES,
    Rational,
};
use crate::error::{J2kError, Result};
use crate::icc::classify_profile;

/// Bytes [`detect_format`] needs: the signature box and the start of `ftyp`.
pub const SNIFF_LEN: usize = 24;

/// The 12-byte JP2 signature box.
pub const SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

/// SOC followed by the SIZ marker.
const CODESTREAM_START: [u8; 4] = [0xFF, 0x4F, 0xFF, 0x51];

const BRAND_JP2: &[u8; 4] = b"jp2 ";
const BRAND_JPX: &[u8; 4] = b"jpx ";

const FTYP: &[u8; 4] = b"ftyp";
const RREQ: &[u8; 4] = b"rreq";
const JP2H: &[u8; 4] = b"jp2h";
const IHDR: &[u8; 4] = b"ihdr";
const BPCC: &[u8; 4] = b"bpcc";
const COLR: &[u8; 4] = b"colr";
const PCLR: &[u8; 4] = b"pclr";
const CMAP: &[u8; 4] = b"cmap";
const CDEF: &[u8; 4] = b"cdef";
const RES: &[u8; 4] = b"res ";
const RESC: &[u8; 4] = b"resc";
const RESD: &[u8; 4] = b"resd";
const JP2C: &[u8; 4] = b"jp2c";

/// Metres per inch.
const INCH: f64 = 0.0254;

/// Identifies a raw codestream or a JP2-family file from its first bytes.
pub fn detect_format(head: &[u8]) -> Format {
    if head.starts_with(&CODESTREAM_START) {
        return Format::J2c;
    }
    if !head.starts_with(&SIGNATURE) {
        return Format::Unknown;
    }
    match head.get(16..24) {
        Some(ftyp) if &ftyp[..4] == FTYP && &ftyp[4..] == BRAND_JPX => Format::Jpx,
        _ => Format::Jp2,
    }
}

/// `EnumCS` values of a method 1 colour specification box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum EnumeratedColourSpace {
    Cmyk = 12,
    CieLab = 14,
    Srgb = 16,
    Greyscale = 17,
    Sycc = 18,
    EsRgb = 20,
    RommRgb = 21,
    EsYcc = 24,
}

impl EnumeratedColourSpace {
    fn from_color_space(cs: ColorSpace) -> Option<Self> {
        Some(match cs {
            ColorSpace::Srgb => Self::Srgb,
            ColorSpace::SLum => Self::Greyscale,
            ColorSpace::Sycc => Self::Sycc,
            ColorSpace::EsRgb => Self::EsRgb,
            ColorSpace::EsYcc => Self::EsYcc,
            ColorSpace::Romm => Self::RommRgb,
            ColorSpace::Cmyk => Self::Cmyk,
            ColorSpace::CieLab => Self::CieLab,
            _ => return None,
        })
    }

    fn color_space(self) -> ColorSpace {
        match self {
            Self::Cmyk => ColorSpace::Cmyk,
            Self::CieLab => ColorSpace::CieLab,
            Self::Srgb => ColorSpace::Srgb,
            Self::Greyscale => ColorSpace::SLum,
            Self::Sycc => ColorSpace::Sycc,
            Self::EsRgb => ColorSpace::EsRgb,
            Self::RommRgb => ColorSpace::Romm,
            Self::EsYcc => ColorSpace::EsYcc,
        }
    }

    /// Whether plain JP2 readers must understand this space.
    fn allowed_in_jp2(self) -> bool {
        matches!(self, Self::Srgb | Self::Greyscale | Self::Sycc)
    }
}

/// Contents of a `colr` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColourSpecification {
    Enumerated(EnumeratedColourSpace),
    /// Method 2 (restricted) or 3 (any) ICC profile.
    Icc { method: u8, profile: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageHeader {
    pub height: u32,
    pub width: u32,
    pub components: u16,
    /// `depth - 1`, sign in bit 7; 255 when components differ.
    pub bpc: u8,
}

/// A `pclr` box: `entries[e][column]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Palette {
    /// `(depth, signed)` of each column.
    pub columns: Vec<(u8, bool)>,
    pub entries: Vec<Vec<u32>>,
}

/// One `cmap` entry: output channel from a component, directly or through a palette column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentMapping {
    pub component: u16,
    /// 0 direct, 1 palette.
    pub mapping_type: u8,
    pub column: u8,
}

/// One `cdef` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDefinition {
    pub channel: u16,
    /// 0 colour, 1 opacity, 2 premultiplied opacity.
    pub kind: u16,
    /// Colour index starting at 1; 0 for the whole image.
    pub association: u16,
}

/// Resolution in a `resc`/`resd` box: `num / den * 10^exp` samples per metre.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionBox {
    pub vertical: (u16, u16, i8),
    pub horizontal: (u16, u16, i8),
}

impl ResolutionBox {
    /// Shares one numerator between both directions, so the aspect ratio is
    /// exactly `horizontal den / vertical den`.
    pub fn new(horizontal_ppm: f64, aspect: Rational) -> Self {
        let aspect = if aspect.is_unknown() || aspect.num < 0 {
            Rational::new(1, 1)
        } else {
            aspect.reduced()
        };
        let (mut num, mut den) = (aspect.num as u64, aspect.den as u64);
        while num > u16::MAX as u64 || den > u16::MAX as u64 {
            num = (num / 2).max(1);
            den = (den / 2).max(1);
        }
        // horizontal = N / num, vertical = N / den
        let mut value = horizontal_ppm * num as f64;
        let mut exp = 0i32;
        while value > u16::MAX as f64 && exp < 127 {
            value /= 10.0;
            exp += 1;
        }
        while value > 0.0 && value < 6553.5 && exp > -128 {
            value *= 10.0;
            exp -= 1;
        }
        let n = (value.round() as u64).clamp(1, u16::MAX as u64) as u16;
        Self {
            vertical: (n, den as u16, exp as i8),
            horizontal: (n, num as u16, exp as i8),
        }
    }

    fn per_metre((num, den, exp): (u16, u16, i8)) -> f64 {
        if den == 0 {
            return 0.0;
        }
        num as f64 / den as f64 * 10f64.powi(exp as i32)
    }

    pub fn horizontal_dpi(&self) -> f64 {
        Self::per_metre(self.horizontal) * INCH
    }

    /// Vertical over horizontal resolution.
    pub fn aspect(&self) -> Rational {
        let (vn, vd, ve) = self.vertical;
        let (hn, hd, he) = self.horizontal;
        if vd == 0 || hn == 0 {
            return Rational::UNKNOWN;
        }
        let mut num = vn as u128 * hd as u128;
        let mut den = vd as u128 * hn as u128;
        let diff = ve as i32 - he as i32;
        let scale = 10u128.checked_pow(diff.unsigned_abs()).unwrap_or(u128::MAX);
        if diff >= 0 {
            num = num.saturating_mul(scale);
        } else {
            den = den.saturating_mul(scale);
        }
        let g = gcd128(num, den).max(1);
        let (mut num, mut den) = (num / g, den / g);
        while num > i32::MAX as u128 || den > u32::MAX as u128 {
            num = (num / 2).max(1);
            den = (den / 2).max(1);
        }
        Rational::new(num as i32, den as u32)
    }
}

fn gcd128(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Metadata of a JP2/JPX file; `format` is [`Format::J2c`] for a bare codestream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Jp2Header {
    pub format: Format,
    pub image: ImageHeader,
    pub colour: Option<ColourSpecification>,
    pub palette: Option<Palette>,
    pub mapping: Vec<ComponentMapping>,
    pub channels: Vec<ChannelDefinition>,
    pub capture: Option<ResolutionBox>,
    pub display: Option<ResolutionBox>,
}

struct Jp2Box<'a> {
    box_type: [u8; 4],
    data: &'a [u8],
}

fn box_error(box_type: &[u8; 4], reason: &'static str) -> J2kError {
    J2kError::InvalidBox {
        box_type: String::from_utf8_lossy(box_type).into_owned(),
        reason,
    }
}

/// Sequential reader over the boxes of one level.
struct BoxReader<'a> {
    reader: ByteReader<'a>,
}

impl<'a> BoxReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            reader: ByteReader::new(data),
        }
    }

    fn next_box(&mut self) -> Result<Option<Jp2Box<'a>>> {
        if self.reader.is_empty() {
            return Ok(None);
        }
        let lbox = self.reader.read_u32()?;
        let raw = self.reader.read_bytes(4)?;
        let box_type = [raw[0], raw[1], raw[2], raw[3]];
        let len = match lbox {
            0 => self.reader.remaining(),
            1 => {
                let xl = self.reader.read_u64()?;
                xl.checked_sub(16)
                    .ok_or_else(|| box_error(&box_type, "XLBox smaller than its header"))?
                    as usize
            }
            2..=7 => return Err(box_error(&box_type, "LBox smaller than its header")),
            n => n as usize - 8,
        };
        if len > self.reader.remaining() {
            return Err(J2kError::Truncated("box extends past the end of the file"));
        }
        let data = self.reader.read_bytes(len)?;
        trace!("box '{}' ({len} bytes)", String::from_utf8_lossy(&box_type));
        Ok(Some(Jp2Box { box_type, data }))
    }
}

/// Splits a file into its metadata and its codestream.
pub fn read_container(data: &[u8]) -> Result<(Jp2Header, &[u8])> {
    match detect_format(data) {
        Format::J2c => {
            return Ok((
                Jp2Header {
                    format: Format::J2c,
                    ..Jp2Header::default()
                },
                data,
            ));
        }
        Format::Unknown => return Err(J2kError::UnknownFormat),
        _ => {}
    }

    let mut boxes = BoxReader::new(&data[SIGNATURE.len()..]);
    let mut header = Jp2Header::default();
    let ftyp = boxes
        .next_box()?
        .filter(|b| &b.box_type == FTYP)
        .ok_or_else(|| box_error(FTYP, "file type box must follow the signature"))?;
    header.format = read_ftyp(ftyp.data)?;

    let mut have_header = false;
    while let Some(b) = boxes.next_box()? {
        match &b.box_type {
            JP2H if !have_header => {
                read_jp2h(b.data, &mut header)?;
                have_header = true;
            }
            JP2C => {
                if !have_header {
                    warn!("codestream box precedes the JP2 header box");
                }
                return Ok((header, b.data));
            }
            other => trace!("skipping box '{}'", String::from_utf8_lossy(other)),
        }
    }
    Err(box_error(JP2C, "no contiguous codestream box"))
}

fn read_ftyp(data: &[u8]) -> Result<Format> {
    let mut r = ByteReader::new(data);
    let brand = r.read_bytes(4)?;
    let _minor = r.read_u32()?;
    if r.remaining() % 4 != 0 {
        return Err(box_error(FTYP, "compatibility list is not a multiple of 4 bytes"));
    }
    let compatible: Vec<&[u8]> = r.rest().chunks(4).collect();
    let jpx = brand == BRAND_JPX;
    if !jpx && !compatible.contains(&&BRAND_JP2[..]) && brand != BRAND_JP2 {
        debug!("file type box does not list 'jp2 ' compatibility");
    }
    Ok(if jpx { Format::Jpx } else { Format::Jp2 })
}

fn read_jp2h(data: &[u8], header: &mut Jp2Header) -> Result<()> {
    let mut boxes = BoxReader::new(data);
    let mut have_ihdr = false;
    while let Some(b) = boxes.next_box()? {
        let mut r = ByteReader::new(b.data);
        match &b.box_type {
            IHDR => {
                header.image = ImageHeader {
                    height: r.read_u32()?,
                    width: r.read_u32()?,
                    components: r.read_u16()?,
                    bpc: r.read_u8()?,
                };
                if r.read_u8()? != 7 {
                    return Err(box_error(IHDR, "compression type is not JPEG 2000"));
                }
                have_ihdr = true;
            }
            COLR => {
                // The first colour specification that is understood wins.
                if header.colour.is_none() {
                    header.colour = read_colr(b.data)?;
                }
            }
            PCLR => header.palette = Some(read_pclr(&mut r)?),
            CMAP => {
                if r.remaining() % 4 != 0 {
                    return Err(box_error(CMAP, "length is not a multiple of 4"));
                }
                while !r.is_empty() {
                    header.mapping.push(ComponentMapping {
                        component: r.read_u16()?,
                        mapping_type: r.read_u8()?,
                        column: r.read_u8()?,
                    });
                }
            }
            CDEF => {
                let n = r.read_u16()? as usize;
                if r.remaining() != 6 * n {
                    return Err(box_error(CDEF, "length does not match the entry count"));
                }
                for _ in 0..n {
                    header.channels.push(ChannelDefinition {
                        channel: r.read_u16()?,
                        kind: r.read_u16()?,
                        association: r.read_u16()?,
                    });
                }
            }
            RES => {
                let mut inner = BoxReader::new(b.data);
                while let Some(rb) = inner.next_box()? {
                    match &rb.box_type {
                        RESC => header.capture = Some(read_resolution(rb.data)?),
                        RESD => header.display = Some(read_resolution(rb.data)?),
                        _ => {}
                    }
                }
            }
            BPCC => {}
            other => trace!("skipping header box '{}'", String::from_utf8_lossy(other)),
        }
    }
    if !have_ihdr {
        return Err(box_error(IHDR, "JP2 header box lacks an image header"));
    }
    Ok(())
}

fn read_colr(data: &[u8]) -> Result<Option<ColourSpecification>> {
    let mut r = ByteReader::new(data);
    let method = r.read_u8()?;
    let _precedence = r.read_u8()?;
    let _approx = r.read_u8()?;
    Ok(match method {
        1 => {
            let value = r.read_u32()?;
            match EnumeratedColourSpace::try_from(value) {
                Ok(cs) => Some(ColourSpecification::Enumerated(cs)),
                Err(_) => {
                    warn!("ignoring unknown enumerated colour space {value}");
                    None
                }
            }
        }
        2 | 3 => Some(ColourSpecification::Icc {
            method,
            profile: r.rest().to_vec(),
        }),
        other => {
            warn!("ignoring colour specification method {other}");
            None
        }
    })
}

fn read_pclr(r: &mut ByteReader) -> Result<Palette> {
    let entries = r.read_u16()? as usize;
    let columns = r.read_u8()? as usize;
    if entries == 0 || entries > 1024 || columns == 0 {
        return Err(box_error(PCLR, "palette size out of range"));
    }
    let mut palette = Palette::default();
    for _ in 0..columns {
        let b = r.read_u8()?;
        let depth = (b & 0x7F) + 1;
        if depth > 38 {
            return Err(box_error(PCLR, "column depth out of range"));
        }
        palette.columns.push((depth, b & 0x80 != 0));
    }
    for _ in 0..entries {
        let mut row = Vec::with_capacity(columns);
        for &(depth, _) in &palette.columns {
            let bytes = r.read_bytes((depth as usize).div_ceil(8))?;
            row.push(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64) as u32);
        }
        palette.entries.push(row);
    }
    Ok(palette)
}

fn read_resolution(data: &[u8]) -> Result<ResolutionBox> {
    let mut r = ByteReader::new(data);
    let (vn, vd, hn, hd) = (r.read_u16()?, r.read_u16()?, r.read_u16()?, r.read_u16()?);
    let (ve, he) = (r.read_u8()? as i8, r.read_u8()? as i8);
    Ok(ResolutionBox {
        vertical: (vn, vd, ve),
        horizontal: (hn, hd, he),
    })
}

fn write_box(out: &mut ByteWriter, box_type: &[u8; 4], payload: &[u8]) {
    let len = payload.len() as u64 + 8;
    if len > u32::MAX as u64 {
        out.write_u32(1);
        out.write_bytes(box_type);
        let xl = len + 8;
        out.write_u32((xl >> 32) as u32);
        out.write_u32(xl as u32);
    } else {
        out.write_u32(len as u32);
        out.write_bytes(box_type);
    }
    out.write_bytes(payload);
}

/// Wraps `codestream` in a JP2 or JPX file, or returns it as-is for [`Format::J2c`].
pub fn write_container(header: &Jp2Header, codestream: &[u8]) -> Vec<u8> {
    if header.format == Format::J2c {
        return codestream.to_vec();
    }
    let jpx = header.format == Format::Jpx;
    let mut out = ByteWriter::new();
    out.write_bytes(&SIGNATURE);

    let mut ftyp = ByteWriter::new();
    ftyp.write_bytes(if jpx { BRAND_JPX } else { BRAND_JP2 });
    ftyp.write_u32(0);
    ftyp.write_bytes(if jpx { BRAND_JPX } else { BRAND_JP2 });
    write_box(&mut out, FTYP, &ftyp.into_inner());

    if jpx {
        // One-byte masks; the only standard feature listed is an
        // unrestricted Part 1 codestream.
        let mut rreq = ByteWriter::new();
        rreq.write_u8(1);
        rreq.write_u8(0x80);
        rreq.write_u8(0x80);
        rreq.write_u16(1);
        rreq.write_u16(5);
        rreq.write_u8(0x80);
        rreq.write_u16(0);
        write_box(&mut out, RREQ, &rreq.into_inner());
    }

    write_box(&mut out, JP2H, &jp2h_payload(header, jpx));
    write_box(&mut out, JP2C, codestream);
    out.into_inner()
}

fn jp2h_payload(header: &Jp2Header, jpx: bool) -> Vec<u8> {
    let mut jp2h = ByteWriter::new();

    let mut ihdr = ByteWriter::new();
    ihdr.write_u32(header.image.height);
    ihdr.write_u32(header.image.width);
    ihdr.write_u16(header.image.components);
    ihdr.write_u8(header.image.bpc);
    ihdr.write_u8(7);
    ihdr.write_u8(0);
    ihdr.write_u8(0);
    write_box(&mut jp2h, IHDR, &ihdr.into_inner());

    if let Some(colour) = &header.colour {
        let mut colr = ByteWriter::new();
        match colour {
            ColourSpecification::Enumerated(cs) => {
                colr.write_u8(1);
                colr.write_u8(0);
                colr.write_u8(u8::from(jpx));
                colr.write_u32((*cs).into());
            }
            ColourSpecification::Icc { method, profile } => {
                colr.write_u8(*method);
                colr.write_u8(0);
                colr.write_u8(u8::from(jpx));
                colr.write_bytes(profile);
            }
        }
        write_box(&mut jp2h, COLR, &colr.into_inner());
    }

    if let Some(palette) = &header.palette {
        let mut pclr = ByteWriter::new();
        pclr.write_u16(palette.entries.len() as u16);
        pclr.write_u8(palette.columns.len() as u8);
        for &(depth, signed) in &palette.columns {
            pclr.write_u8((depth - 1) | if signed { 0x80 } else { 0 });
        }
        for row in &palette.entries {
            for (&v, &(depth, _)) in row.iter().zip(&palette.columns) {
                let bytes = (depth as usize).div_ceil(8);
                pclr.write_bytes(&v.to_be_bytes()[4 - bytes..]);
            }
        }
        write_box(&mut jp2h, PCLR, &pclr.into_inner());
    }

    if !header.mapping.is_empty() {
        let mut cmap = ByteWriter::new();
        for m in &header.mapping {
            cmap.write_u16(m.component);
            cmap.write_u8(m.mapping_type);
            cmap.write_u8(m.column);
        }
        write_box(&mut jp2h, CMAP, &cmap.into_inner());
    }

    if !header.channels.is_empty() {
        let mut cdef = ByteWriter::new();
        cdef.write_u16(header.channels.len() as u16);
        for d in &header.channels {
            cdef.write_u16(d.channel);
            cdef.write_u16(d.kind);
            cdef.write_u16(d.association);
        }
        write_box(&mut jp2h, CDEF, &cdef.into_inner());
    }

    if header.capture.is_some() || header.display.is_some() {
        let mut res = ByteWriter::new();
        for (ty, value) in [(RESC, header.capture), (RESD, header.display)] {
            if let Some(v) = value {
                let mut payload = ByteWriter::new();
                payload.write_u16(v.vertical.0);
                payload.write_u16(v.vertical.1);
                payload.write_u16(v.horizontal.0);
                payload.write_u16(v.horizontal.1);
                payload.write_u8(v.vertical.2 as u8);
                payload.write_u8(v.horizontal.2 as u8);
                write_box(&mut res, ty, &payload.into_inner());
            }
        }
        write_box(&mut jp2h, RES, &res.into_inner());
    }

    jp2h.into_inner()
}

fn colour_names(cs: ColorSpace) -> [ChannelName; MAX_CHANNELS] {
    match cs {
        ColorSpace::Cmyk => [
            ChannelName::Cyan,
            ChannelName::Magenta,
            ChannelName::Yellow,
            ChannelName::Black,
        ],
        _ => [
            ChannelName::Red,
            ChannelName::Green,
            ChannelName::Blue,
            ChannelName::Black,
        ],
    }
}

/// Colour channels a space defines.
fn colour_count(cs: ColorSpace) -> usize {
    match cs {
        ColorSpace::SLum | ColorSpace::IccLum => 1,
        ColorSpace::Cmyk => 4,
        _ => 3,
    }
}

/// Names channels beyond the colour channels as alpha of unknown kind.
fn guess_alpha(info: &mut FileInfo, channels: usize) {
    let colours = colour_count(info.color_space);
    if channels > colours && colours < MAX_CHANNELS {
        info.channel_map[colours] = ChannelName::Alpha;
        info.alpha = Alpha::Unknown;
    }
}

/// Colour guess for a bare codestream: 1-2 channels are grey, 3-4 sRGB, and
/// a 2nd or 4th channel is alpha.
pub fn guess_codestream_metadata(info: &mut FileInfo) {
    info.color_space = match info.channels {
        1 | 2 => ColorSpace::SLum,
        3 | 4 => ColorSpace::Srgb,
        _ => ColorSpace::Unknown,
    };
    if matches!(info.channels, 2 | 4) {
        guess_alpha(info, info.channels as usize);
    }
}

fn association(name: ChannelName) -> (u16, u16) {
    match name {
        ChannelName::Red | ChannelName::Cyan => (0, 1),
        ChannelName::Green | ChannelName::Magenta => (0, 2),
        ChannelName::Blue | ChannelName::Yellow => (0, 3),
        ChannelName::Black => (0, 4),
        ChannelName::Alpha => (1, 0),
    }
}

impl Jp2Header {
    /// Container metadata for writing `info` over codestream components `components`.
    ///
    /// A JP2 request becomes JPX when the colour description needs it.
    pub fn from_file_info(info: &FileInfo, components: &[J2kComponentInfo]) -> Result<Self> {
        let mut format = match info.format {
            Format::J2c => Format::J2c,
            Format::Jpx => Format::Jpx,
            Format::Jp2 | Format::Unknown => Format::Jp2,
        };
        let first = components.first().copied().ok_or_else(|| J2kError::argument("no components"))?;
        let uniform = components
            .iter()
            .all(|c| c.depth == first.depth && c.signed == first.signed);
        let image = ImageHeader {
            height: info.height,
            width: info.width,
            components: components.len() as u16,
            bpc: if uniform {
                (first.depth - 1) | if first.signed { 0x80 } else { 0 }
            } else {
                255
            },
        };

        let (colour, needs_jpx) = match (info.color_space, &info.icc_profile) {
            (cs, Some(profile)) if cs.has_icc_profile() || cs == ColorSpace::Unknown => {
                let method = match classify_profile(profile) {
                    ColorSpace::IccAny => 3,
                    _ if cs == ColorSpace::IccAny => 3,
                    _ => 2,
                };
                (
                    ColourSpecification::Icc {
                        method,
                        profile: profile.clone(),
                    },
                    method == 3,
                )
            }
            (cs, None) if cs.has_icc_profile() => {
                return Err(J2kError::argument(format!("{cs:?} needs an ICC profile")));
            }
            (cs, _) => {
                let enumerated = EnumeratedColourSpace::from_color_space(cs).unwrap_or(
                    if info.output_channels() < 3 {
                        EnumeratedColourSpace::Greyscale
                    } else {
                        EnumeratedColourSpace::Srgb
                    },
                );
                (
                    ColourSpecification::Enumerated(enumerated),
                    !enumerated.allowed_in_jp2(),
                )
            }
        };
        if needs_jpx && format == Format::Jp2 {
            debug!("{:?} cannot be described in JP2; writing JPX", info.color_space);
            format = Format::Jpx;
        }

        let mut header = Jp2Header {
            format,
            image,
            colour: Some(colour),
            ..Jp2Header::default()
        };

        let (names, outputs) = if info.lut.is_empty() {
            (info.channel_map, components.len())
        } else {
            if components.len() != 1 {
                return Err(J2kError::argument("a lookup table needs exactly one index channel"));
            }
            if info.lut.len() > MAX_LUT_ENTRIES || !(1..=MAX_CHANNELS as u8).contains(&info.lut_channels) {
                return Err(J2kError::argument("lookup table size out of range"));
            }
            let columns = info.lut_channels as usize;
            header.palette = Some(Palette {
                columns: vec![(8, false); columns],
                entries: info
                    .lut
                    .iter()
                    .map(|e| e.0[..columns].iter().map(|&v| v as u32).collect())
                    .collect(),
            });
            header.mapping = (0..columns as u8)
                .map(|column| ComponentMapping {
                    component: 0,
                    mapping_type: 1,
                    column,
                })
                .collect();
            (info.lut_map, columns)
        };

        let outputs = outputs.min(MAX_CHANNELS);
        let natural = colour_names(info.color_space);
        // A trailing Alpha name without an alpha mode is the default map.
        let default_map = (0..outputs).all(|i| {
            names[i] == natural[i] || (i == 3 && names[i] == ChannelName::Alpha && !info.has_alpha())
        });
        if info.has_alpha() || !default_map {
            header.channels = (0..outputs)
                .map(|i| {
                    let (kind, association) = association(names[i]);
                    let kind = match (kind, info.alpha) {
                        (1, Alpha::Premultiplied) => 2,
                        (k, _) => k,
                    };
                    ChannelDefinition {
                        channel: i as u16,
                        kind,
                        association,
                    }
                })
                .collect();
        }

        let capture = info.dpi > 0.0;
        if capture || !info.pixel_aspect.is_unknown() {
            let ppm = if capture { info.dpi as f64 / INCH } else { 1.0 };
            let res = ResolutionBox::new(ppm, info.pixel_aspect);
            if capture {
                header.capture = Some(res);
            } else {
                header.display = Some(res);
            }
        }
        Ok(header)
    }

    /// Fills the container-level fields of `info`. `info.channels` must
    /// already hold the codestream component count.
    pub fn apply(&self, info: &mut FileInfo) {
        info.format = self.format;
        if self.format == Format::J2c {
            guess_codestream_metadata(info);
            return;
        }

        match &self.colour {
            Some(ColourSpecification::Enumerated(cs)) => info.color_space = cs.color_space(),
            Some(ColourSpecification::Icc { profile, .. }) => {
                info.color_space = classify_profile(profile);
                info.icc_profile = Some(profile.clone());
            }
            None => guess_codestream_metadata(info),
        }

        let mut outputs = info.channels as usize;
        if let Some(palette) = &self.palette {
            let usable = !self.mapping.is_empty()
                && self.mapping.len() <= MAX_CHANNELS
                && palette.entries.len() <= MAX_LUT_ENTRIES
                && self.mapping.iter().all(|m| {
                    m.mapping_type == 1
                        && m.component == 0
                        && (m.column as usize) < palette.columns.len()
                });
            if usable {
                info.lut = palette
                    .entries
                    .iter()
                    .map(|row| {
                        let mut entry = LutEntry::default();
                        for (i, m) in self.mapping.iter().enumerate() {
                            let (depth, _) = palette.columns[m.column as usize];
                            let v = row[m.column as usize];
                            entry.0[i] = if depth > 8 {
                                v.checked_shr((depth - 8) as u32).unwrap_or(0) as u8
                            } else {
                                (v << (8 - depth)) as u8
                            };
                        }
                        entry
                    })
                    .collect();
                info.lut_channels = self.mapping.len() as u8;
                outputs = self.mapping.len();
            } else {
                warn!("palette mapping is not supported; returning component values");
            }
        }

        let names = colour_names(info.color_space);
        let target = if info.lut.is_empty() {
            &mut info.channel_map
        } else {
            &mut info.lut_map
        };
        if self.channels.is_empty() {
            if info.lut.is_empty() {
                guess_alpha(info, outputs);
            }
        } else {
            for d in &self.channels {
                let Some(slot) = target.get_mut(d.channel as usize) else {
                    continue;
                };
                match d.kind {
                    0 if (1..=4).contains(&d.association) => {
                        *slot = names[d.association as usize - 1];
                    }
                    1 | 2 => {
                        *slot = ChannelName::Alpha;
                        info.alpha = if d.kind == 1 {
                            Alpha::Straight
                        } else {
                            Alpha::Premultiplied
                        };
                    }
                    _ => {}
                }
            }
        }

        if let Some(res) = self.capture {
            info.dpi = res.horizontal_dpi() as f32;
            info.pixel_aspect = res.aspect();
        } else if let Some(res) = self.display {
            info.pixel_aspect = res.aspect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray8() -> Vec<J2kComponentInfo> {
        vec![J2kComponentInfo {
            depth: 8,
            signed: false,
            dx: 1,
            dy: 1,
        }]
    }

    fn rgba8() -> Vec<J2kComponentInfo> {
        gray8().repeat(4)
    }

    fn round_trip(info: &FileInfo, components: &[J2kComponentInfo]) -> (Jp2Header, FileInfo) {
        let header = Jp2Header::from_file_info(info, components).unwrap();
        let file = write_container(&header, &[0xFF, 0x4F, 0xFF, 0x51, 1, 2, 3]);
        let (read, codestream) = read_container(&file).unwrap();
        assert_eq!(codestream, &[0xFF, 0x4F, 0xFF, 0x51, 1, 2, 3]);
        assert_eq!(read, header);
        let mut back = FileInfo::new(info.width, info.height, components.len() as u8, 8);
        read.apply(&mut back);
        (read, back)
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(&[0xFF, 0x4F, 0xFF, 0x51]), Format::J2c);
        assert_eq!(detect_format(b"\x89PNG\r\n\x1a\n"), Format::Unknown);
        assert_eq!(detect_format(&[]), Format::Unknown);

        let header = Jp2Header {
            format: Format::Jpx,
            colour: Some(ColourSpecification::Enumerated(EnumeratedColourSpace::Srgb)),
            ..Jp2Header::default()
        };
        let jpx = write_container(&header, &[0xFF, 0x4F]);
        assert_eq!(detect_format(&jpx[..SNIFF_LEN]), Format::Jpx);
        let jp2 = write_container(
            &Jp2Header {
                format: Format::Jp2,
                ..header
            },
            &[0xFF, 0x4F],
        );
        assert_eq!(detect_format(&jp2), Format::Jp2);
        assert_eq!(&jp2[..12], &SIGNATURE);
    }

    #[test]
    fn test_rgba_with_resolution() {
        let mut info = FileInfo::new(640, 480, 4, 8);
        info.format = Format::Jp2;
        info.color_space = ColorSpace::Srgb;
        info.alpha = Alpha::Premultiplied;
        info.dpi = 300.0;
        info.pixel_aspect = Rational::new(4, 3);
        let (header, back) = round_trip(&info, &rgba8());
        assert_eq!(header.format, Format::Jp2);
        assert_eq!(header.channels.len(), 4);
        assert_eq!(back.color_space, ColorSpace::Srgb);
        assert_eq!(back.alpha, Alpha::Premultiplied);
        assert_eq!(back.channel_map[3], ChannelName::Alpha);
        assert!((back.dpi - 300.0).abs() < 0.05, "{}", back.dpi);
        assert_eq!(back.pixel_aspect, Rational::new(4, 3));
    }

    #[test]
    fn test_aspect_only_uses_display_resolution() {
        let mut info = FileInfo::new(10, 10, 1, 8);
        info.pixel_aspect = Rational::new(2, 1);
        let (header, back) = round_trip(&info, &gray8());
        assert!(header.capture.is_none());
        assert!(header.display.is_some());
        assert_eq!(back.dpi, 0.0);
        assert_eq!(back.pixel_aspect, Rational::new(2, 1));
        assert_eq!(back.color_space, ColorSpace::SLum);
        assert!(header.channels.is_empty());
    }

    #[test]
    fn test_extended_spaces_upgrade_to_jpx() {
        let mut info = FileInfo::new(4, 4, 3, 8);
        info.format = Format::Jp2;
        info.color_space = ColorSpace::EsRgb;
        let (header, back) = round_trip(&info, &gray8().repeat(3));
        assert_eq!(header.format, Format::Jpx);
        assert_eq!(back.format, Format::Jpx);
        assert_eq!(back.color_space, ColorSpace::EsRgb);
    }

    #[test]
    fn test_icc_profiles() {
        let gray = crate::icc::create_profile(ColorSpace::SLum).unwrap();
        let mut info = FileInfo::new(4, 4, 1, 8);
        info.color_space = ColorSpace::IccLum;
        info.icc_profile = Some(gray.clone());
        let (header, back) = round_trip(&info, &gray8());
        assert_eq!(header.format, Format::Jp2);
        assert_eq!(back.color_space, ColorSpace::IccLum);
        assert_eq!(back.icc_profile.as_deref(), Some(&gray[..]));

        let cmyk = crate::icc::create_profile(ColorSpace::Cmyk).unwrap();
        info.color_space = ColorSpace::IccAny;
        info.icc_profile = Some(cmyk.clone());
        let (header, back) = round_trip(&info, &gray8());
        assert_eq!(header.format, Format::Jpx);
        assert_eq!(back.color_space, ColorSpace::IccAny);
        assert_eq!(back.profile_len(), cmyk.len());

        info.icc_profile = None;
        assert!(Jp2Header::from_file_info(&info, &gray8()).is_err());
    }

    #[test]
    fn test_palette() {
        let mut info = FileInfo::new(4, 4, 1, 8);
        info.color_space = ColorSpace::Srgb;
        info.lut = (0..16u8).map(|i| LutEntry([i, 255 - i, i * 2, 0])).collect();
        info.lut_channels = 3;
        let (header, back) = round_trip(&info, &gray8());
        assert_eq!(header.mapping.len(), 3);
        assert_eq!(back.lut, info.lut);
        assert_eq!(back.lut_channels, 3);
        assert_eq!(back.output_channels(), 3);

        info.lut_channels = 0;
        assert!(Jp2Header::from_file_info(&info, &gray8()).is_err());
    }

    #[test]
    fn test_codestream_guess() {
        let mut info = FileInfo::new(4, 4, 2, 8);
        guess_codestream_metadata(&mut info);
        assert_eq!(info.color_space, ColorSpace::SLum);
        assert_eq!(info.alpha, Alpha::Unknown);
        assert_eq!(info.channel_map[1], ChannelName::Alpha);

        let mut info = FileInfo::new(4, 4, 3, 8);
        guess_codestream_metadata(&mut info);
        assert_eq!(info.color_space, ColorSpace::Srgb);
        assert_eq!(info.alpha, Alpha::None);
    }

    #[test]
    fn test_malformed_boxes() {
        let header = Jp2Header {
            format: Format::Jp2,
            colour: Some(ColourSpecification::Enumerated(EnumeratedColourSpace::Srgb)),
            ..Jp2Header::default()
        };
        let file = write_container(&header, &[0xFF, 0x4F, 0xFF, 0x51]);
        for n in 0..file.len() {
            let _ = read_container(&file[..n]);
        }
        assert!(matches!(read_container(b"nothing"), Err(J2kError::UnknownFormat)));
        // Drop the codestream box entirely.
        let without = &file[..file.len() - 12];
        assert!(read_container(without).is_err());
    }
}
