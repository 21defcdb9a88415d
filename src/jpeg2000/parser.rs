//! JPEG 2000 codestream parser.
//!
//! Reads the main header (SOC, SIZ, COD/COC, QCD/QCC, COM) and every tile-part
//! (SOT ... SOD + data), gathering the bytes of each tile in order.

use log::{debug, trace};

use super::bit_io::ByteReader;
use super::image::{
    J2kCod, J2kCodingStyle, J2kComponentInfo, J2kQuantization, J2kSiz, QUANT_DERIVED,
    QUANT_EXPOUNDED, QUANT_NONE, SCOD_PRECINCTS,
};
use super::markers::J2kMarker;
use crate::codec::Order;
use crate::error::{J2kError, Result};

/// Coding parameters of the main header.
#[derive(Debug, Clone, Default)]
pub struct J2kHeader {
    pub siz: J2kSiz,
    pub cod: J2kCod,
    /// COC overrides per component.
    pub coc: Vec<Option<J2kCodingStyle>>,
    pub qcd: J2kQuantization,
    /// QCC overrides per component.
    pub qcc: Vec<Option<J2kQuantization>>,
    /// Text of COM segments with Latin registration.
    pub comments: Vec<String>,
}

/// One tile as found in the codestream.
#[derive(Debug, Clone, Default)]
pub struct J2kTile {
    pub cod: Option<J2kCod>,
    pub coc: Vec<Option<J2kCodingStyle>>,
    pub qcd: Option<J2kQuantization>,
    pub qcc: Vec<Option<J2kQuantization>>,
    /// Packet data of every tile-part, concatenated.
    pub data: Vec<u8>,
    pub parts: usize,
}

/// Parameters in force for one tile after applying tile-part overrides.
#[derive(Debug, Clone)]
pub struct J2kTileParams {
    pub cod: J2kCod,
    pub styles: Vec<J2kCodingStyle>,
    pub quant: Vec<J2kQuantization>,
}

#[derive(Debug, Clone, Default)]
pub struct J2kCodestream {
    pub header: J2kHeader,
    /// Indexed by tile number.
    pub tiles: Vec<J2kTile>,
}

impl J2kCodestream {
    /// Resolves tile COC > tile COD > main COC > main COD, and likewise for quantization.
    pub fn tile_params(&self, index: usize) -> J2kTileParams {
        let h = &self.header;
        let tile = self.tiles.get(index);
        let cod = tile
            .and_then(|t| t.cod.clone())
            .unwrap_or_else(|| h.cod.clone());
        let components = h.siz.components.len();

        let styles = (0..components)
            .map(|c| {
                let tile_coc = tile.and_then(|t| t.coc.get(c).cloned().flatten());
                let tile_cod = tile.and_then(|t| t.cod.as_ref().map(|cod| cod.style.clone()));
                tile_coc
                    .or(tile_cod)
                    .or_else(|| h.coc.get(c).cloned().flatten())
                    .unwrap_or_else(|| h.cod.style.clone())
            })
            .collect();
        let quant = (0..components)
            .map(|c| {
                let tile_qcc = tile.and_then(|t| t.qcc.get(c).cloned().flatten());
                let tile_qcd = tile.and_then(|t| t.qcd.clone());
                tile_qcc
                    .or(tile_qcd)
                    .or_else(|| h.qcc.get(c).cloned().flatten())
                    .unwrap_or_else(|| h.qcd.clone())
            })
            .collect();
        J2kTileParams { cod, styles, quant }
    }
}

/// A parser over a complete codestream held in memory.
pub struct J2kParser<'a> {
    reader: ByteReader<'a>,
    data: &'a [u8],
    header: J2kHeader,
}

fn segment_error(marker: J2kMarker, reason: &'static str) -> J2kError {
    J2kError::InvalidMarkerSegment {
        marker: marker.code(),
        reason,
    }
}

impl<'a> J2kParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: ByteReader::new(data),
            data,
            header: J2kHeader::default(),
        }
    }

    /// Reads up to (not including) the first SOT and returns the header.
    pub fn parse_main_header(&mut self) -> Result<J2kHeader> {
        if self.reader.read_u16()? != J2kMarker::StartOfCodestream.code() {
            return Err(J2kError::invalid("codestream does not start with SOC"));
        }
        let mut have_siz = false;
        let (mut have_cod, mut have_qcd) = (false, false);
        loop {
            let code = self
                .reader
                .peek_u16()
                .ok_or(J2kError::Truncated("main header"))?;
            if code == J2kMarker::StartOfTile.code() {
                break;
            }
            self.reader.skip(2)?;
            let Some(marker) = marker_of(code) else {
                let payload = self.read_segment(code)?;
                debug!("skipping unknown marker {code:#06X} ({} bytes)", payload.len());
                continue;
            };
            if !have_siz && marker != J2kMarker::ImageAndTileSize {
                return Err(J2kError::invalid("SIZ must follow SOC"));
            }
            let payload = self.read_segment(code)?;
            match marker {
                J2kMarker::ImageAndTileSize => {
                    self.header.siz = parse_siz(payload)?;
                    let n = self.header.siz.components.len();
                    self.header.coc = vec![None; n];
                    self.header.qcc = vec![None; n];
                    have_siz = true;
                }
                J2kMarker::CodingStyleDefault => {
                    self.header.cod = parse_cod(payload)?;
                    have_cod = true;
                }
                J2kMarker::CodingStyleComponent => {
                    let (c, style) = parse_coc(payload, self.header.siz.components.len())?;
                    self.header.coc[c] = Some(style);
                }
                J2kMarker::QuantizationDefault => {
                    self.header.qcd = parse_qcd(payload, J2kMarker::QuantizationDefault)?;
                    have_qcd = true;
                }
                J2kMarker::QuantizationComponent => {
                    let (c, q) = parse_qcc(payload, self.header.siz.components.len())?;
                    self.header.qcc[c] = Some(q);
                }
                J2kMarker::Comment => {
                    if let Some(text) = parse_com(payload) {
                        self.header.comments.push(text);
                    }
                }
                J2kMarker::RegionOfInterest
                | J2kMarker::ProgressionOrderChange
                | J2kMarker::PackedPacketHeadersMain => {
                    return Err(J2kError::unsupported(format!("{marker:?} marker segment")));
                }
                other => trace!("skipping {other:?}"),
            }
        }
        if !have_cod || !have_qcd {
            return Err(J2kError::invalid("main header lacks COD or QCD"));
        }
        Ok(self.header.clone())
    }

    /// Reads the whole codestream.
    pub fn parse_codestream(mut self) -> Result<J2kCodestream> {
        let header = self.parse_main_header()?;
        let tile_count = header.siz.tile_count();
        let components = header.siz.components.len();
        let mut tiles = vec![
            J2kTile {
                coc: vec![None; components],
                qcc: vec![None; components],
                ..J2kTile::default()
            };
            tile_count
        ];

        while let Some(code) = self.reader.peek_u16() {
            if code == J2kMarker::EndOfCodestream.code() {
                break;
            }
            if code != J2kMarker::StartOfTile.code() {
                return Err(J2kError::invalid(format!("expected SOT, found {code:#06X}")));
            }
            let sot_pos = self.reader.position();
            self.reader.skip(2)?;
            let payload = self.read_segment(code)?;
            let mut sot = ByteReader::new(payload);
            let index = sot.read_u16()? as usize;
            let psot = sot.read_u32()? as usize;
            let part = sot.read_u8()?;
            let tile = tiles
                .get_mut(index)
                .ok_or_else(|| segment_error(J2kMarker::StartOfTile, "tile index out of range"))?;

            let end = if psot == 0 {
                // Runs to the end of the codestream.
                match self.data.len() {
                    n if self.data.ends_with(&J2kMarker::EndOfCodestream.code().to_be_bytes()) => n - 2,
                    n => n,
                }
            } else {
                sot_pos + psot
            };
            if end > self.data.len() {
                return Err(J2kError::Truncated("tile-part extends past the end of the codestream"));
            }

            loop {
                let code = self.reader.read_u16()?;
                if code == J2kMarker::StartOfData.code() {
                    break;
                }
                let payload = self.read_segment(code)?;
                match marker_of(code) {
                    Some(J2kMarker::CodingStyleDefault) => tile.cod = Some(parse_cod(payload)?),
                    Some(J2kMarker::CodingStyleComponent) => {
                        let (c, style) = parse_coc(payload, components)?;
                        tile.coc[c] = Some(style);
                    }
                    Some(J2kMarker::QuantizationDefault) => {
                        tile.qcd = Some(parse_qcd(payload, J2kMarker::QuantizationDefault)?)
                    }
                    Some(J2kMarker::QuantizationComponent) => {
                        let (c, q) = parse_qcc(payload, components)?;
                        tile.qcc[c] = Some(q);
                    }
                    Some(
                        m @ (J2kMarker::RegionOfInterest
                        | J2kMarker::ProgressionOrderChange
                        | J2kMarker::PackedPacketHeadersTilePart),
                    ) => {
                        return Err(J2kError::unsupported(format!("{m:?} marker segment")));
                    }
                    _ => trace!("tile {index}: skipping marker {code:#06X}"),
                }
            }

            let start = self.reader.position();
            if start > end {
                return Err(segment_error(J2kMarker::StartOfTile, "tile-part header overruns Psot"));
            }
            tile.data.extend_from_slice(&self.data[start..end]);
            tile.parts += 1;
            trace!("tile {index} part {part}: {} bytes", end - start);
            self.reader.skip(end - start)?;
        }

        Ok(J2kCodestream { header, tiles })
    }

    /// Reads `Lxxx` and returns the rest of the segment.
    fn read_segment(&mut self, code: u16) -> Result<&'a [u8]> {
        let len = self.reader.read_u16()? as usize;
        if len < 2 {
            return Err(J2kError::InvalidMarkerSegment {
                marker: code,
                reason: "segment length below 2",
            });
        }
        self.reader.read_bytes(len - 2)
    }
}

fn marker_of(code: u16) -> Option<J2kMarker> {
    if code >> 8 != 0xFF {
        return None;
    }
    J2kMarker::try_from((code & 0xFF) as u8).ok()
}

pub fn parse_siz(payload: &[u8]) -> Result<J2kSiz> {
    let mut r = ByteReader::new(payload);
    let mut siz = J2kSiz {
        rsiz: r.read_u16()?,
        x1: r.read_u32()?,
        y1: r.read_u32()?,
        x0: r.read_u32()?,
        y0: r.read_u32()?,
        tile_width: r.read_u32()?,
        tile_height: r.read_u32()?,
        tile_x0: r.read_u32()?,
        tile_y0: r.read_u32()?,
        components: Vec::new(),
    };
    let count = r.read_u16()? as usize;
    if r.remaining() != 3 * count {
        return Err(segment_error(J2kMarker::ImageAndTileSize, "length does not match Csiz"));
    }
    for _ in 0..count {
        let ssiz = r.read_u8()?;
        siz.components.push(J2kComponentInfo {
            depth: (ssiz & 0x7F) + 1,
            signed: ssiz & 0x80 != 0,
            dx: r.read_u8()?,
            dy: r.read_u8()?,
        });
    }
    siz.validate()?;
    Ok(siz)
}

/// SPcod / SPcoc: decomposition levels through precinct sizes.
fn parse_coding_style(r: &mut ByteReader, precincts: bool, marker: J2kMarker) -> Result<J2kCodingStyle> {
    let levels = r.read_u8()?;
    let cb_width_exp = r.read_u8()? + 2;
    let cb_height_exp = r.read_u8()? + 2;
    let cb_style = r.read_u8()?;
    let transform = r.read_u8()?;
    if levels > 32 {
        return Err(segment_error(marker, "more than 32 decomposition levels"));
    }
    if cb_width_exp > 10 || cb_height_exp > 10 || cb_width_exp + cb_height_exp > 12 {
        return Err(segment_error(marker, "code-block size out of range"));
    }
    if transform > 1 {
        return Err(J2kError::unsupported("custom wavelet transforms"));
    }
    let mut style = J2kCodingStyle {
        levels,
        cb_width_exp,
        cb_height_exp,
        cb_style,
        reversible: transform == 1,
        precincts: Vec::new(),
    };
    if precincts {
        for r_index in 0..=levels as usize {
            let b = r.read_u8()?;
            let (ppx, ppy) = (b & 0x0F, b >> 4);
            if r_index > 0 && (ppx == 0 || ppy == 0) {
                return Err(segment_error(marker, "zero precinct size above resolution 0"));
            }
            style.precincts.push((ppx, ppy));
        }
    }
    Ok(style)
}

pub fn parse_cod(payload: &[u8]) -> Result<J2kCod> {
    let marker = J2kMarker::CodingStyleDefault;
    let mut r = ByteReader::new(payload);
    let scod = r.read_u8()?;
    let order = Order::try_from(r.read_u8()?)
        .map_err(|_| segment_error(marker, "unknown progression order"))?;
    let layers = r.read_u16()?;
    let mct = r.read_u8()?;
    if layers == 0 {
        return Err(segment_error(marker, "zero quality layers"));
    }
    if mct > 1 {
        return Err(J2kError::unsupported("multiple component transform extensions"));
    }
    let style = parse_coding_style(&mut r, scod & SCOD_PRECINCTS != 0, marker)?;
    Ok(J2kCod {
        scod,
        order,
        layers,
        mct,
        style,
    })
}

fn read_component_index(r: &mut ByteReader, components: usize, marker: J2kMarker) -> Result<usize> {
    let c = if components < 257 {
        r.read_u8()? as usize
    } else {
        r.read_u16()? as usize
    };
    if c >= components {
        return Err(segment_error(marker, "component index out of range"));
    }
    Ok(c)
}

pub fn parse_coc(payload: &[u8], components: usize) -> Result<(usize, J2kCodingStyle)> {
    let marker = J2kMarker::CodingStyleComponent;
    let mut r = ByteReader::new(payload);
    let c = read_component_index(&mut r, components, marker)?;
    let scoc = r.read_u8()?;
    Ok((c, parse_coding_style(&mut r, scoc & SCOD_PRECINCTS != 0, marker)?))
}

pub fn parse_qcd(payload: &[u8], marker: J2kMarker) -> Result<J2kQuantization> {
    let mut r = ByteReader::new(payload);
    let sqcd = r.read_u8()?;
    let style = sqcd & 0x1F;
    let mut q = J2kQuantization {
        style,
        guard_bits: sqcd >> 5,
        steps: Vec::new(),
    };
    match style {
        QUANT_NONE => {
            while !r.is_empty() {
                q.steps.push((r.read_u8()? >> 3, 0));
            }
        }
        QUANT_DERIVED | QUANT_EXPOUNDED => {
            while r.remaining() >= 2 {
                let v = r.read_u16()?;
                q.steps.push(((v >> 11) as u8, v & 0x7FF));
            }
        }
        _ => return Err(segment_error(marker, "unknown quantization style")),
    }
    if q.steps.is_empty() {
        return Err(segment_error(marker, "no quantization steps"));
    }
    Ok(q)
}

pub fn parse_qcc(payload: &[u8], components: usize) -> Result<(usize, J2kQuantization)> {
    let marker = J2kMarker::QuantizationComponent;
    let mut r = ByteReader::new(payload);
    let c = read_component_index(&mut r, components, marker)?;
    Ok((c, parse_qcd(r.rest(), marker)?))
}

fn parse_com(payload: &[u8]) -> Option<String> {
    let mut r = ByteReader::new(payload);
    let registration = r.read_u16().ok()?;
    (registration == 1).then(|| String::from_utf8_lossy(r.rest()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::writer::J2kWriter;

    fn sample_header() -> (J2kSiz, J2kCod, J2kQuantization) {
        let siz = J2kSiz {
            x1: 64,
            y1: 48,
            tile_width: 32,
            tile_height: 32,
            components: vec![
                J2kComponentInfo {
                    depth: 12,
                    signed: true,
                    dx: 1,
                    dy: 2
                };
                2
            ],
            ..J2kSiz::default()
        };
        let cod = J2kCod {
            scod: SCOD_PRECINCTS,
            order: Order::Pcrl,
            layers: 4,
            mct: 0,
            style: J2kCodingStyle {
                levels: 2,
                precincts: vec![(4, 4), (5, 5), (6, 6)],
                ..J2kCodingStyle::default()
            },
        };
        let qcd = J2kQuantization {
            style: QUANT_EXPOUNDED,
            guard_bits: 2,
            steps: vec![(10, 5), (11, 6), (11, 7), (12, 8), (9, 1), (9, 2), (10, 3)],
        };
        (siz, cod, qcd)
    }

    #[test]
    fn test_parse_main_header_and_tiles() {
        let (siz, cod, qcd) = sample_header();
        let mut w = J2kWriter::new();
        w.write_main_header(&siz, &cod, &[qcd.clone(), qcd.clone()], Some("hello"));
        for t in 0..siz.tile_count() as u16 {
            w.write_tile_part(t, 0, 1, &[t as u8; 5]);
        }
        let bytes = w.finish();

        let stream = J2kParser::new(&bytes).parse_codestream().unwrap();
        assert_eq!(stream.header.siz, siz);
        assert_eq!(stream.header.cod, cod);
        assert_eq!(stream.header.qcd, qcd);
        assert_eq!(stream.header.comments, vec!["hello".to_string()]);
        assert_eq!(stream.tiles.len(), 4);
        assert_eq!(stream.tiles[3].data, vec![3; 5]);
        assert_eq!(stream.tiles[3].parts, 1);
    }

    #[test]
    fn test_override_precedence() {
        let (siz, cod, qcd) = sample_header();
        let mut stream = J2kCodestream {
            header: J2kHeader {
                siz,
                cod: cod.clone(),
                coc: vec![
                    Some(J2kCodingStyle {
                        levels: 1,
                        ..J2kCodingStyle::default()
                    }),
                    None,
                ],
                qcd,
                qcc: vec![None, None],
                comments: Vec::new(),
            },
            tiles: vec![J2kTile::default(); 4],
        };
        let p = stream.tile_params(0);
        assert_eq!(p.styles[0].levels, 1);
        assert_eq!(p.styles[1].levels, 2);

        // A tile COD beats a main-header COC.
        stream.tiles[0].cod = Some(J2kCod {
            style: J2kCodingStyle {
                levels: 3,
                ..J2kCodingStyle::default()
            },
            ..cod
        });
        stream.tiles[0].coc = vec![
            None,
            Some(J2kCodingStyle {
                levels: 4,
                ..J2kCodingStyle::default()
            }),
        ];
        let p = stream.tile_params(0);
        assert_eq!(p.styles[0].levels, 3);
        assert_eq!(p.styles[1].levels, 4);
        assert_eq!(stream.tile_params(1).styles[0].levels, 1);
    }

    #[test]
    fn test_malformed_streams() {
        let (siz, cod, qcd) = sample_header();
        let mut w = J2kWriter::new();
        w.write_main_header(&siz, &cod, &[qcd.clone(), qcd], None);
        w.write_tile_part(0, 0, 1, &[1, 2, 3, 4]);
        let bytes = w.finish();

        assert!(J2kParser::new(&bytes[2..]).parse_codestream().is_err());
        // Cutting inside the tile-part makes Psot overrun the data.
        let cut = &bytes[..bytes.len() - 4];
        assert!(matches!(
            J2kParser::new(cut).parse_codestream(),
            Err(J2kError::Truncated(_))
        ));
        for n in 0..bytes.len() {
            let _ = J2kParser::new(&bytes[..n]).parse_codestream();
        }

        let mut bad = bytes.clone();
        // Zero layers in COD.
        let cod_at = bytes.windows(2).position(|w| w == [0xFF, 0x52]).unwrap();
        bad[cod_at + 6] = 0;
        bad[cod_at + 7] = 0;
        assert!(J2kParser::new(&bad).parse_codestream().is_err());
    }
}
